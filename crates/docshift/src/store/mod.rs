//! Persistence contracts for jobs and share tokens.
//!
//! The orchestrator, token manager, and service only see these traits;
//! `crate::db` provides the SQLite implementations.

use chrono::{DateTime, Utc};

use crate::db::DatabaseError;
use crate::model::{Job, JobId, JobStatus, NewJob, ShareToken, UserId};

/// Owner-scoped listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Case-insensitive substring of the original filename.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl JobFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// Outcome of an atomic redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// The access was counted; carries the token after the increment.
    Granted(ShareToken),
    NotFound,
    Expired,
    Exhausted,
}

pub trait JobStore: Send + Sync {
    /// Inserts a job in `UPLOADED` and returns it with its assigned id.
    fn create(&self, new_job: NewJob) -> Result<Job, DatabaseError>;

    fn find_by_id(&self, id: JobId) -> Result<Option<Job>, DatabaseError>;

    /// Newest first, paginated per `filter`.
    fn find_by_owner(&self, owner: UserId, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError>;

    /// Counts all matches of `filter`, ignoring pagination.
    fn count_by_owner(&self, owner: UserId, filter: &JobFilter) -> Result<u64, DatabaseError>;

    /// Overwrites every mutable column. Returns false if the job no longer exists.
    fn update(&self, job: &Job) -> Result<bool, DatabaseError>;

    /// Writes `job` only if the stored status is one of `expected`.
    ///
    /// Returns false when the row is missing or in another status, in which
    /// case nothing was written.
    fn compare_and_update(&self, expected: &[JobStatus], job: &Job) -> Result<bool, DatabaseError>;

    fn delete(&self, id: JobId) -> Result<bool, DatabaseError>;

    /// Per-status counts for one owner, in `JobStatus::ALL` order.
    fn count_by_status(&self, owner: UserId) -> Result<Vec<(JobStatus, u64)>, DatabaseError> {
        JobStatus::ALL
            .into_iter()
            .map(|status| {
                let filter = JobFilter {
                    status: Some(status),
                    ..JobFilter::default()
                };
                Ok((status, self.count_by_owner(owner, &filter)?))
            })
            .collect()
    }
}

pub trait TokenStore: Send + Sync {
    /// Inserts a token. A duplicate value is a `DatabaseError::Constraint`.
    fn create(&self, token: &ShareToken) -> Result<(), DatabaseError>;

    fn find_by_token(&self, value: &str) -> Result<Option<ShareToken>, DatabaseError>;

    fn update(&self, token: &ShareToken) -> Result<bool, DatabaseError>;

    /// Increments the access count iff the token exists, `now` is before its
    /// expiry, and the count is below its quota, as a single atomic step.
    fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Redemption, DatabaseError>;

    /// Removes every token bound to `job_id`, returning how many were removed.
    fn delete_for_job(&self, job_id: JobId) -> Result<u64, DatabaseError>;
}
