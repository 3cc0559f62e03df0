//! Isolated service instance for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use docshift::converter::pdf::render_text_pdf;
use docshift::db::{SqliteJobStore, SqliteTokenStore};
use docshift::{
    Config, ConversionKind, ConversionService, ConverterRegistry, Database, Job, JobId, JobStatus,
    JobStore, ManualClock, ShareToken, StatusView, TokenStore, UserId,
};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root every stored file lives under.
    pub upload_dir: PathBuf,
    pub clock: Arc<ManualClock>,
    pub service: ConversionService,
    db: Database,
}

impl TestHarness {
    /// Service with the real converters and default settings.
    pub fn new() -> Self {
        Self::build(ConverterRegistry::standard(), |_| {})
    }

    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Self::build(converters, |_| {})
    }

    /// `tweak` adjusts the default config before the service starts.
    pub fn build(converters: ConverterRegistry, tweak: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");

        let mut config = Config::default();
        config.storage.upload_directory = upload_dir.clone();
        config.conversion.worker_count = 2;
        config.conversion.shutdown_timeout_secs = 5;
        tweak(&mut config);

        // Whole seconds so timestamps survive the store unchanged.
        let start = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let db = Database::open_in_memory().expect("Failed to open database");

        let service = ConversionService::builder(config)
            .database(db.clone())
            .converters(converters)
            .clock(clock.clone())
            .build()
            .expect("Failed to build service");

        Self {
            temp_dir,
            upload_dir,
            clock,
            service,
            db,
        }
    }

    pub fn jobs(&self) -> SqliteJobStore {
        SqliteJobStore::new(self.db.clone())
    }

    pub fn tokens(&self) -> SqliteTokenStore {
        SqliteTokenStore::new(self.db.clone())
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs().find_by_id(id).expect("Failed to read job")
    }

    pub fn token(&self, value: &str) -> Option<ShareToken> {
        self.tokens().find_by_token(value).expect("Failed to read token")
    }

    pub fn converted_dir(&self, owner: UserId) -> PathBuf {
        self.upload_dir.join(owner.to_string()).join("converted")
    }

    /// Files currently in `owner`'s converted directory.
    pub fn converted_files(&self, owner: UserId) -> usize {
        std::fs::read_dir(self.converted_dir(owner))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// A small real PDF with one text line per entry.
    pub fn pdf_bytes(lines: &[&str]) -> Vec<u8> {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        render_text_pdf(&lines).expect("Failed to render PDF")
    }

    pub fn upload_pdf(&self, owner: UserId, filename: &str) -> Job {
        self.service
            .upload(
                owner,
                filename,
                Some("application/pdf"),
                &Self::pdf_bytes(&["Quarterly report", "Revenue  1200  up"]),
                ConversionKind::PdfToWord,
            )
            .expect("Failed to upload PDF")
    }

    /// Polls until the job is terminal.
    pub fn wait_for_terminal(&self, job_id: JobId, owner: UserId) -> StatusView {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let view = self
                .service
                .get_conversion_status(job_id, owner)
                .expect("Failed to read status");
            if view.status.is_terminal() {
                return view;
            }
            assert!(Instant::now() < deadline, "job {} stuck in {}", job_id, view.status);
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Uploads and converts a PDF to Word, returning the completed job.
    pub fn completed_job(&self, owner: UserId, filename: &str) -> Job {
        let job = self.upload_pdf(owner, filename);
        self.service
            .submit_conversion(job.id, owner, "docx")
            .expect("Failed to submit conversion");
        let view = self.wait_for_terminal(job.id, owner);
        assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error_message);
        self.job(job.id).expect("job vanished")
    }
}
