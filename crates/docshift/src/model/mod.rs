//! Domain records: jobs, conversion kinds, share tokens.

pub mod job;
pub mod kind;
pub mod share_token;

pub use job::{Job, JobId, JobStatus, NewJob, TransitionError, UserId};
pub use kind::{ConversionKind, SourceFamily, ALLOWED_EXTENSIONS};
pub use share_token::ShareToken;
