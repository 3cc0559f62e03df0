pub mod orchestrator;
pub mod pool;
pub mod runner;

pub use orchestrator::Orchestrator;
pub use pool::{ShutdownReport, WorkerPool};
pub use runner::{ConversionRunner, RunOutcome};
