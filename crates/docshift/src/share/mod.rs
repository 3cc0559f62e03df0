//! Share tokens: issuance for completed jobs and quota-limited redemption.

pub mod token;

use std::sync::Arc;

use chrono::Duration;
use log::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ShareConfig;
use crate::error::{Result, ServiceError};
use crate::model::{Job, JobStatus, ShareToken};
use crate::sanitize::token_prefix;
use crate::store::{JobStore, Redemption, TokenStore};

pub use token::generate_token;

pub struct ShareTokenManager {
    tokens: Arc<dyn TokenStore>,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    settings: ShareConfig,
}

impl ShareTokenManager {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        jobs: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        settings: ShareConfig,
    ) -> Self {
        Self {
            tokens,
            jobs,
            clock,
            settings,
        }
    }

    /// Issues a fresh token for a `COMPLETED` job.
    pub fn issue(&self, job: &Job) -> Result<ShareToken> {
        if job.status != JobStatus::Completed {
            return Err(ServiceError::validation(format!(
                "only completed conversions can be shared (job {} is {})",
                job.id, job.status
            )));
        }

        let now = self.clock.now();
        let expires_at = Duration::try_hours(self.settings.expiry_hours)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "share token lifetime of {} hours is out of range",
                    self.settings.expiry_hours
                ))
            })?;
        let token = ShareToken {
            token: generate_token(self.settings.token_length)?,
            job_id: job.id,
            expires_at,
            access_count: 0,
            max_access: self.settings.max_access,
            created_at: now,
        };

        self.tokens.create(&token).map_err(|e| {
            if e.is_constraint() {
                ServiceError::conflict("share token collision, please retry")
            } else {
                e.into()
            }
        })?;

        info!(
            "Issued share token {}... for job {} (expires {})",
            token_prefix(&token.token),
            job.id,
            token.expires_at
        );
        Ok(token)
    }

    /// Counts one access against `value` and returns the shared job.
    pub fn redeem(&self, value: &str) -> Result<Job> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ServiceError::not_found("share link"));
        }

        let token = match self.tokens.consume(value, self.clock.now())? {
            Redemption::Granted(token) => token,
            Redemption::NotFound => {
                debug!("Unknown share token {}...", token_prefix(value));
                return Err(ServiceError::not_found("share link"));
            }
            Redemption::Expired => {
                debug!("Expired share token {}...", token_prefix(value));
                return Err(ServiceError::Expired);
            }
            Redemption::Exhausted => {
                debug!("Exhausted share token {}...", token_prefix(value));
                return Err(ServiceError::QuotaExceeded);
            }
        };

        match self.jobs.find_by_id(token.job_id)? {
            Some(job) => {
                debug!(
                    "Share token {}... redeemed ({}/{})",
                    token_prefix(value),
                    token.access_count,
                    token.max_access
                );
                Ok(job)
            }
            None => {
                warn!("Share token {}... points at a missing job", token_prefix(value));
                Err(ServiceError::not_found("share link"))
            }
        }
    }
}
