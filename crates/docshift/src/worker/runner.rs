//! Executes one conversion job from `PROCESSING` to a terminal status.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::converter::ConverterRegistry;
use crate::error::ConversionError;
use crate::guard::resolve_safe_path;
use crate::model::{Job, JobId, JobStatus};
use crate::sanitize::{redact_path, unique_filename};
use crate::storage::StorageBackend;
use crate::store::JobStore;

/// Recorded on jobs that were still queued when the pool was force-stopped.
pub const ABORTED_MESSAGE: &str = "conversion aborted: service shut down before the job started";

/// What a single run did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The job was missing, no longer `PROCESSING`, or could not be written.
    Skipped,
}

pub struct ConversionRunner {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn StorageBackend>,
    converters: ConverterRegistry,
    clock: Arc<dyn Clock>,
}

impl ConversionRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn StorageBackend>,
        converters: ConverterRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs,
            storage,
            converters,
            clock,
        }
    }

    /// Runs the conversion for `job_id` and records the outcome.
    ///
    /// Never panics and never returns an error: every failure after the job
    /// is loaded ends in a `FAILED` record.
    pub fn run(&self, job_id: JobId) -> RunOutcome {
        let span = tracing::info_span!("conversion", job_id, kind = tracing::field::Empty);
        let _enter = span.enter();

        let job = match self.jobs.find_by_id(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("Job {} was deleted before it ran", job_id);
                return RunOutcome::Skipped;
            }
            Err(e) => {
                error!("Failed to load job {}: {}", job_id, e);
                return RunOutcome::Skipped;
            }
        };
        span.record("kind", job.conversion_kind.as_str());

        if job.status != JobStatus::Processing {
            debug!("Job {} is {}, not running it", job_id, job.status);
            return RunOutcome::Skipped;
        }

        let result = self.execute(&job);
        let now = self.clock.now();
        let next = match &result {
            Ok((filename, path)) => job.complete(filename.clone(), path.clone(), now),
            Err(e) => job.fail(e.to_string(), now),
        };
        let next = match next {
            Ok(next) => next,
            Err(e) => {
                error!("Job {}: {}", job_id, e);
                return RunOutcome::Skipped;
            }
        };

        match self.jobs.compare_and_update(&[JobStatus::Processing], &next) {
            Ok(true) => match result {
                Ok((filename, _)) => {
                    info!("Job {} completed: {}", job_id, filename);
                    RunOutcome::Completed
                }
                Err(e) => {
                    warn!("Job {} failed: {}", job_id, e);
                    RunOutcome::Failed
                }
            },
            Ok(false) => {
                info!("Job {} changed while converting, discarding result", job_id);
                self.discard_output(&next);
                RunOutcome::Skipped
            }
            Err(e) => {
                error!("Failed to record outcome of job {}: {}", job_id, e);
                self.discard_output(&next);
                RunOutcome::Skipped
            }
        }
    }

    /// Records a queued job as failed without running it.
    pub fn abort(&self, job_id: JobId, reason: &str) -> RunOutcome {
        let job = match self.jobs.find_by_id(job_id) {
            Ok(Some(job)) if job.status == JobStatus::Processing => job,
            Ok(_) => return RunOutcome::Skipped,
            Err(e) => {
                error!("Failed to load job {} for abort: {}", job_id, e);
                return RunOutcome::Skipped;
            }
        };
        let failed = match job.fail(reason, self.clock.now()) {
            Ok(failed) => failed,
            Err(_) => return RunOutcome::Skipped,
        };
        match self.jobs.compare_and_update(&[JobStatus::Processing], &failed) {
            Ok(true) => {
                info!("Job {} aborted", job_id);
                RunOutcome::Failed
            }
            Ok(false) => RunOutcome::Skipped,
            Err(e) => {
                error!("Failed to record abort of job {}: {}", job_id, e);
                RunOutcome::Skipped
            }
        }
    }

    /// Steps a to d: source check, output location, output name, convert.
    fn execute(&self, job: &Job) -> Result<(String, PathBuf), ConversionError> {
        let source = resolve_safe_path(&job.source_path, Some(self.storage.root()))?;
        if !source.is_file() {
            return Err(ConversionError::SourceMissing(PathBuf::from(redact_path(&source))));
        }

        let output_dir = self.storage.converted_dir(job.owner_id)?;
        let output_filename =
            unique_filename(&job.original_filename, job.conversion_kind.target_extension());
        let dest = output_dir.join(&output_filename);

        let converter = self.converters.get(job.conversion_kind)?;
        debug!(
            "Converting {} -> {}",
            redact_path(&source),
            redact_path(&dest)
        );

        let converted = catch_unwind(AssertUnwindSafe(|| converter.convert(&source, &dest)))
            .unwrap_or_else(|payload| Err(ConversionError::Panicked(panic_message(payload))))
            .and_then(|()| {
                if dest.is_file() {
                    Ok(())
                } else {
                    Err(ConversionError::NoOutput)
                }
            });

        if let Err(e) = converted {
            self.remove_partial(&dest);
            return Err(e);
        }
        Ok((output_filename, dest))
    }

    fn remove_partial(&self, dest: &std::path::Path) {
        if dest.exists() {
            if let Err(e) = self.storage.delete_at_path(dest) {
                warn!("Failed to remove partial output {}: {}", redact_path(dest), e);
            }
        }
    }

    fn discard_output(&self, job: &Job) {
        if let Some(path) = &job.output_path {
            self.remove_partial(path);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::converter::write_output;
    use crate::db::{Database, SqliteJobStore};
    use crate::model::{ConversionKind, NewJob};
    use crate::storage::FileStorage;
    use chrono::Utc;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        jobs: Arc<SqliteJobStore>,
        storage: Arc<FileStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let storage = Arc::new(FileStorage::new(temp.path().join("uploads")));
            let jobs = Arc::new(SqliteJobStore::new(Database::open_in_memory().unwrap()));
            Self {
                _temp: temp,
                jobs,
                storage,
            }
        }

        fn runner(&self, converters: ConverterRegistry) -> ConversionRunner {
            ConversionRunner::new(
                self.jobs.clone(),
                self.storage.clone(),
                converters,
                Arc::new(ManualClock::new(Utc::now())),
            )
        }

        /// Uploads a file and moves its job into PROCESSING.
        fn processing_job(&self) -> Job {
            let source = self.storage.store_upload(42, "report.pdf", b"%PDF").unwrap();
            let job = self
                .jobs
                .create(NewJob {
                    owner_id: 42,
                    original_filename: "report.pdf".to_string(),
                    stored_filename: redact_path(&source),
                    source_path: source,
                    file_size: 4,
                    mime_type: Some("application/pdf".to_string()),
                    conversion_kind: ConversionKind::PdfToWord,
                    created_at: Utc::now(),
                })
                .unwrap();
            let processing = job.begin_processing(ConversionKind::PdfToWord).unwrap();
            assert!(self.jobs.update(&processing).unwrap());
            processing
        }
    }

    fn writes(bytes: &'static [u8]) -> ConverterRegistry {
        ConverterRegistry::uniform(Arc::new(move |_: &Path, dest: &Path| write_output(dest, bytes)))
    }

    #[test]
    fn test_successful_run() {
        let fx = Fixture::new();
        let job = fx.processing_job();

        assert_eq!(fx.runner(writes(b"docx")).run(job.id), RunOutcome::Completed);

        let stored = fx.jobs.find_by_id(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.is_consistent());
        let output = stored.output_path.unwrap();
        assert!(output.starts_with(fx.storage.root().join("42").join("converted")));
        assert!(stored.output_filename.unwrap().ends_with("_report.docx"));
        assert_eq!(std::fs::read(output).unwrap(), b"docx");
    }

    #[test]
    fn test_converter_error_fails_job() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let failing = ConverterRegistry::uniform(Arc::new(
            |_: &Path, _: &Path| -> Result<(), ConversionError> {
                Err(ConversionError::Pdf("broken xref table".to_string()))
            },
        ));

        assert_eq!(fx.runner(failing).run(job.id), RunOutcome::Failed);

        let stored = fx.jobs.find_by_id(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error_message.as_ref().unwrap().contains("broken xref table"));
        assert!(stored.is_consistent());
    }

    #[test]
    fn test_panicking_converter_fails_job() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let panicking = ConverterRegistry::uniform(Arc::new(
            |_: &Path, _: &Path| -> Result<(), ConversionError> { panic!("decoder exploded") },
        ));

        assert_eq!(fx.runner(panicking).run(job.id), RunOutcome::Failed);
        let stored = fx.jobs.find_by_id(job.id).unwrap().unwrap();
        assert!(stored.error_message.unwrap().contains("decoder exploded"));
    }

    #[test]
    fn test_missing_source_fails_fast() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        std::fs::remove_file(&job.source_path).unwrap();

        assert_eq!(fx.runner(writes(b"x")).run(job.id), RunOutcome::Failed);
        let stored = fx.jobs.find_by_id(job.id).unwrap().unwrap();
        let message = stored.error_message.unwrap();
        assert!(message.contains("does not exist"));
        assert!(!message.contains(fx.storage.root().to_string_lossy().as_ref()));
    }

    #[test]
    fn test_converter_without_output_fails() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let silent = ConverterRegistry::uniform(Arc::new(
            |_: &Path, _: &Path| -> Result<(), ConversionError> { Ok(()) },
        ));

        assert_eq!(fx.runner(silent).run(job.id), RunOutcome::Failed);
    }

    #[test]
    fn test_partial_output_removed_on_failure() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let partial = ConverterRegistry::uniform(Arc::new(
            |_: &Path, dest: &Path| -> Result<(), ConversionError> {
                write_output(dest, b"half")?;
                Err(ConversionError::Docx("ran out of paragraphs".to_string()))
            },
        ));

        fx.runner(partial).run(job.id);
        let converted = fx.storage.converted_dir(42).unwrap();
        assert_eq!(std::fs::read_dir(converted).unwrap().count(), 0);
    }

    #[test]
    fn test_job_deleted_mid_flight_discards_output() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let jobs = fx.jobs.clone();
        let id = job.id;
        let deleting = ConverterRegistry::uniform(Arc::new(
            move |_: &Path, dest: &Path| -> Result<(), ConversionError> {
                write_output(dest, b"late")?;
                jobs.delete(id).map_err(|e| ConversionError::Docx(e.to_string()))?;
                Ok(())
            },
        ));

        assert_eq!(fx.runner(deleting).run(job.id), RunOutcome::Skipped);
        let converted = fx.storage.converted_dir(42).unwrap();
        assert_eq!(std::fs::read_dir(converted).unwrap().count(), 0);
    }

    #[test]
    fn test_non_processing_job_is_skipped() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let runner = fx.runner(writes(b"x"));
        assert_eq!(runner.run(job.id), RunOutcome::Completed);
        assert_eq!(runner.run(job.id), RunOutcome::Skipped);
        assert_eq!(runner.run(9999), RunOutcome::Skipped);
    }

    #[test]
    fn test_abort_fails_processing_job() {
        let fx = Fixture::new();
        let job = fx.processing_job();
        let runner = fx.runner(writes(b"x"));

        assert_eq!(runner.abort(job.id, ABORTED_MESSAGE), RunOutcome::Failed);
        let stored = fx.jobs.find_by_id(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(ABORTED_MESSAGE));
        assert_eq!(runner.abort(job.id, ABORTED_MESSAGE), RunOutcome::Skipped);
    }
}
