pub mod clock;
pub mod config;
pub mod converter;
pub mod db;
pub mod error;
pub mod guard;
pub mod logging;
pub mod model;
pub mod sanitize;
pub mod service;
pub mod share;
pub mod storage;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config};
pub use converter::{Converter, ConverterRegistry};
pub use db::Database;
pub use error::{
    ConfigError, ConversionError, DatabaseError, Result, SecurityError, ServiceError,
    StorageError, WorkerError,
};
pub use guard::{compare_token_constant_time, generate_csrf_token, resolve_safe_path, verify_csrf};
pub use logging::init_logging;
pub use model::{ConversionKind, Job, JobId, JobStatus, ShareToken, UserId};
pub use service::{
    ConversionService, JobPage, JobQuery, JobStats, OutputFile, ServiceBuilder, ShareGrant,
    StatusView, SubmitResult,
};
pub use share::ShareTokenManager;
pub use storage::{FileStorage, StorageBackend};
pub use store::{JobFilter, JobStore, Redemption, TokenStore};
pub use worker::{Orchestrator, ShutdownReport, WorkerPool};
