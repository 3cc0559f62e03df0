//! Shared test utilities for docshift integration tests.
//!
//! - `TestHarness`: a running service over a temp upload root and an
//!   in-memory database, with a manual clock
//! - scripted converters for driving the worker pool

pub mod converters;
pub mod harness;

pub use converters::*;
pub use harness::TestHarness;
