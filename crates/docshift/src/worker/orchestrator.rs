use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use super::pool::{ShutdownReport, WorkerPool};
use super::runner::ConversionRunner;
use crate::clock::Clock;
use crate::error::{Result, ServiceError};
use crate::model::{ConversionKind, Job, JobId, JobStatus};
use crate::store::JobStore;

/// Recorded when a job was moved to `PROCESSING` but could not be queued.
pub const ENQUEUE_FAILED_MESSAGE: &str = "conversion could not be queued: service is shutting down";

/// Accepts conversion requests and hands them to the worker pool.
///
/// Submission persists `PROCESSING` before queueing, so pollers see the job
/// as running from the moment it is accepted.
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    pool: WorkerPool,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn start(
        jobs: Arc<dyn JobStore>,
        runner: ConversionRunner,
        clock: Arc<dyn Clock>,
        worker_count: usize,
    ) -> Result<Self> {
        let pool = WorkerPool::start(Arc::new(runner), worker_count)?;
        Ok(Self { jobs, pool, clock })
    }

    /// Moves `job` into `PROCESSING` with `kind` and queues it.
    ///
    /// Returns the job as persisted. A job that is `PROCESSING` or
    /// `COMPLETED`, or that changed since it was read, is a `Conflict` and is
    /// left untouched.
    pub fn submit(&self, job: &Job, kind: ConversionKind) -> Result<Job> {
        let processing = job
            .begin_processing(kind)
            .map_err(|e| ServiceError::conflict(e.to_string()))?;

        if !self
            .jobs
            .compare_and_update(&JobStatus::SUBMITTABLE, &processing)?
        {
            return Err(ServiceError::conflict(format!(
                "job {} is already being converted or has completed",
                job.id
            )));
        }

        if let Err(e) = self.pool.submit(job.id) {
            error!("Failed to queue job {}: {}", job.id, e);
            if let Ok(failed) = processing.fail(ENQUEUE_FAILED_MESSAGE, self.clock.now()) {
                self.jobs
                    .compare_and_update(&[JobStatus::Processing], &failed)?;
            }
            return Err(e.into());
        }

        info!("Job {} queued as {}", job.id, kind);
        Ok(processing)
    }

    /// Current record of a job. A plain read; never waits on workers.
    pub fn get_status(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.find_by_id(job_id)?)
    }

    pub fn is_accepting(&self) -> bool {
        self.pool.is_accepting()
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.pool.shutdown(timeout)
    }
}
