//! Conversion job record and its state machine.
//!
//! `Job` is a plain value. Transitions never mutate in place; they return
//! the next version of the record, which the caller then persists through a
//! [`JobStore`](crate::store::JobStore).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::kind::ConversionKind;

pub type JobId = i64;
pub type UserId = i64;

/// Message recorded when a failure carries no text of its own.
pub const UNKNOWN_FAILURE: &str = "conversion failed for an unknown reason";

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        Self::Uploaded,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Statuses from which a conversion may be submitted.
    pub const SUBMITTABLE: [JobStatus; 2] = [Self::Uploaded, Self::Failed];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn accepts_submission(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// A transition that the current status does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {action} a job that is {from}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub action: &'static str,
}

/// Fields supplied by the upload boundary when a job is first recorded.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: UserId,
    pub original_filename: String,
    pub stored_filename: String,
    pub source_path: PathBuf,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub conversion_kind: ConversionKind,
    pub created_at: DateTime<Utc>,
}

/// A tracked request to convert one uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: UserId,
    pub original_filename: String,
    pub stored_filename: String,
    #[serde(skip)]
    pub source_path: PathBuf,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub conversion_kind: ConversionKind,
    pub status: JobStatus,
    pub output_filename: Option<String>,
    #[serde(skip)]
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds the initial `UPLOADED` record for a freshly assigned id.
    pub fn uploaded(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            owner_id: new.owner_id,
            original_filename: new.original_filename,
            stored_filename: new.stored_filename,
            source_path: new.source_path,
            file_size: new.file_size,
            mime_type: new.mime_type,
            conversion_kind: new.conversion_kind,
            status: JobStatus::Uploaded,
            output_filename: None,
            output_path: None,
            error_message: None,
            created_at: new.created_at,
            processed_at: None,
        }
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }

    /// Moves an `UPLOADED` or `FAILED` job into `PROCESSING` with the given kind.
    ///
    /// Any output or error left from an earlier attempt is cleared.
    pub fn begin_processing(&self, kind: ConversionKind) -> Result<Job, TransitionError> {
        if !self.status.accepts_submission() {
            return Err(TransitionError {
                from: self.status,
                action: "submit",
            });
        }
        Ok(Job {
            conversion_kind: kind,
            status: JobStatus::Processing,
            output_filename: None,
            output_path: None,
            error_message: None,
            processed_at: None,
            ..self.clone()
        })
    }

    /// Records a successful conversion.
    pub fn complete(
        &self,
        output_filename: impl Into<String>,
        output_path: PathBuf,
        at: DateTime<Utc>,
    ) -> Result<Job, TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                action: "complete",
            });
        }
        Ok(Job {
            status: JobStatus::Completed,
            output_filename: Some(output_filename.into()),
            output_path: Some(output_path),
            error_message: None,
            processed_at: Some(at),
            ..self.clone()
        })
    }

    /// Records a failed conversion. An empty message is replaced so the
    /// stored error is never blank.
    pub fn fail(&self, message: impl Into<String>, at: DateTime<Utc>) -> Result<Job, TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                action: "fail",
            });
        }
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_FAILURE.to_string()
        } else {
            message
        };
        Ok(Job {
            status: JobStatus::Failed,
            output_filename: None,
            output_path: None,
            error_message: Some(message),
            processed_at: Some(at),
            ..self.clone()
        })
    }

    /// Checks the status/output/error/processed_at coupling.
    pub fn is_consistent(&self) -> bool {
        let has_output = self
            .output_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        let has_error = self.error_message.as_ref().is_some_and(|m| !m.is_empty());

        has_output == (self.status == JobStatus::Completed)
            && has_error == (self.status == JobStatus::Failed)
            && self.processed_at.is_some() == self.status.is_terminal()
    }
}
