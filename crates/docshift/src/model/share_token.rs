use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::JobId;
use crate::sanitize::token_prefix;

/// A bearer credential granting bounded anonymous access to one job's output.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareToken {
    pub token: String,
    pub job_id: JobId,
    pub expires_at: DateTime<Utc>,
    pub access_count: u32,
    pub max_access: u32,
    pub created_at: DateTime<Utc>,
}

impl ShareToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.access_count >= self.max_access
    }

    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_exhausted()
    }

    pub fn remaining_accesses(&self) -> u32 {
        self.max_access.saturating_sub(self.access_count)
    }
}

// Keeps the secret out of logs and panic messages.
impl fmt::Debug for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareToken")
            .field("token", &format_args!("{}...", token_prefix(&self.token)))
            .field("job_id", &self.job_id)
            .field("expires_at", &self.expires_at)
            .field("access_count", &self.access_count)
            .field("max_access", &self.max_access)
            .field("created_at", &self.created_at)
            .finish()
    }
}
