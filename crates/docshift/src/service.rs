//! Upward boundary: the operations a thin web layer calls.
//!
//! Every owner-scoped operation reports a job owned by someone else exactly
//! like a job that does not exist.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::{validate_config, Config};
use crate::converter::ConverterRegistry;
use crate::db::{default_database_path, Database, SqliteJobStore, SqliteTokenStore};
use crate::error::{ConfigError, Result, ServiceError};
use crate::guard::{authorize_owner, resolve_safe_path};
use crate::model::{
    ConversionKind, Job, JobId, JobStatus, NewJob, SourceFamily, UserId, ALLOWED_EXTENSIONS,
};
use crate::sanitize::{extension_of, redact_path, sanitize_filename, sanitize_for_content_disposition};
use crate::share::ShareTokenManager;
use crate::storage::{FileStorage, StorageBackend};
use crate::store::{JobFilter, JobStore, TokenStore};
use crate::worker::{ConversionRunner, Orchestrator, ShutdownReport};

pub const MAX_SEARCH_LEN: usize = 100;
pub const MAX_PAGE_SIZE: u32 = 100;

static RE_SEARCH_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s._-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub conversion_kind: ConversionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for StatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            conversion_kind: job.conversion_kind,
            error_message: job.error_message.clone(),
            output_filename: job.output_filename.clone(),
            processed_at: job.processed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_access: u32,
}

/// A converted file ready to stream. `path` has passed the path guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    #[serde(skip)]
    pub path: PathBuf,
    pub download_name: String,
    pub mime_type: String,
}

/// Listing request as it arrives from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl JobQuery {
    fn into_filter(self) -> Result<JobFilter> {
        let search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(term) = &search {
            if term.chars().count() > MAX_SEARCH_LEN {
                return Err(ServiceError::validation(format!(
                    "search term must be at most {} characters",
                    MAX_SEARCH_LEN
                )));
            }
            if !RE_SEARCH_TERM.is_match(term) {
                return Err(ServiceError::validation(
                    "search term may only contain letters, digits, spaces, '.', '_' and '-'",
                ));
            }
        }
        if self.page == 0 {
            return Err(ServiceError::validation("page starts at 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ServiceError::validation(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(JobFilter {
            status: self.status,
            search,
            page: self.page,
            page_size: self.page_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: u64,
    pub uploaded: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Assembles a [`ConversionService`], defaulting whatever is not supplied.
pub struct ServiceBuilder {
    config: Config,
    database: Option<Database>,
    stores: Option<(Arc<dyn JobStore>, Arc<dyn TokenStore>)>,
    storage: Option<Arc<dyn StorageBackend>>,
    converters: Option<ConverterRegistry>,
    clock: Option<Arc<dyn Clock>>,
}

impl ServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            database: None,
            stores: None,
            storage: None,
            converters: None,
            clock: None,
        }
    }

    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Uses these stores instead of SQLite ones.
    pub fn stores(mut self, jobs: Arc<dyn JobStore>, tokens: Arc<dyn TokenStore>) -> Self {
        self.stores = Some((jobs, tokens));
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = Some(converters);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ConversionService> {
        validate_config(&self.config)?;

        let (jobs, tokens) = match self.stores {
            Some(stores) => stores,
            None => {
                let db = match self.database {
                    Some(db) => db,
                    None => Database::open(&resolve_database_path(&self.config)?)?,
                };
                let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db.clone()));
                let tokens: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::new(db));
                (jobs, tokens)
            }
        };
        let storage: Arc<dyn StorageBackend> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FileStorage::from_config(&self.config.storage)),
        };
        let converters = self.converters.unwrap_or_else(ConverterRegistry::standard);
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let runner = ConversionRunner::new(
            Arc::clone(&jobs),
            Arc::clone(&storage),
            converters,
            Arc::clone(&clock),
        );
        let orchestrator = Orchestrator::start(
            Arc::clone(&jobs),
            runner,
            Arc::clone(&clock),
            self.config.conversion.worker_count,
        )?;
        let share = ShareTokenManager::new(
            Arc::clone(&tokens),
            Arc::clone(&jobs),
            Arc::clone(&clock),
            self.config.share.clone(),
        );

        info!(
            "Conversion service ready ({} workers, storage at {})",
            self.config.conversion.worker_count,
            storage.root().display()
        );

        Ok(ConversionService {
            config: self.config,
            jobs,
            tokens,
            storage,
            orchestrator,
            share,
            clock,
        })
    }
}

fn resolve_database_path(config: &Config) -> Result<PathBuf> {
    config
        .database
        .path
        .clone()
        .or_else(default_database_path)
        .ok_or_else(|| {
            ConfigError::Validation {
                message: "database.path is not set and no home directory was found".to_string(),
            }
            .into()
        })
}

pub struct ConversionService {
    config: Config,
    jobs: Arc<dyn JobStore>,
    tokens: Arc<dyn TokenStore>,
    storage: Arc<dyn StorageBackend>,
    orchestrator: Orchestrator,
    share: ShareTokenManager,
    clock: Arc<dyn Clock>,
}

impl ConversionService {
    /// Opens the database and storage named in `config` and starts the workers.
    pub fn open(config: Config) -> Result<Self> {
        ServiceBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stores an uploaded document and records it as an `UPLOADED` job.
    pub fn upload(
        &self,
        owner: UserId,
        original_filename: &str,
        declared_mime: Option<&str>,
        bytes: &[u8],
        kind: ConversionKind,
    ) -> Result<Job> {
        if original_filename.trim().is_empty() {
            return Err(ServiceError::validation("a file name is required"));
        }
        if bytes.is_empty() {
            return Err(ServiceError::validation("the uploaded file is empty"));
        }
        let max = self.config.storage.max_upload_bytes;
        if bytes.len() as u64 > max {
            return Err(ServiceError::validation(format!(
                "file is {} bytes, the limit is {}",
                bytes.len(),
                max
            )));
        }

        let filename = sanitize_filename(original_filename);
        let extension = extension_of(&filename).unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ServiceError::validation(format!(
                "unsupported file type '.{}', expected one of: {}",
                extension,
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }
        if !kind.accepts_extension(&extension) {
            return Err(ServiceError::validation(format!(
                "{} cannot convert a .{} file",
                kind, extension
            )));
        }

        let guessed = mime_guess::from_path(&filename).first_raw().map(str::to_string);
        let mime_type = match declared_mime.map(str::trim).filter(|m| !m.is_empty()) {
            Some(declared)
                if SourceFamily::from_mime(declared) == SourceFamily::from_extension(&extension) =>
            {
                Some(declared.to_string())
            }
            Some(declared) => {
                // Browsers often send the wrong type; the extension decides.
                warn!(
                    "Declared type '{}' does not match .{} upload, using '{}'",
                    declared,
                    extension,
                    guessed.as_deref().unwrap_or("unknown")
                );
                guessed
            }
            None => guessed,
        };

        let source_path = self.storage.store_upload(owner, &filename, bytes)?;
        let new_job = NewJob {
            owner_id: owner,
            original_filename: filename,
            stored_filename: redact_path(&source_path),
            source_path: source_path.clone(),
            file_size: bytes.len() as u64,
            mime_type,
            conversion_kind: kind,
            created_at: self.clock.now(),
        };

        match self.jobs.create(new_job) {
            Ok(job) => {
                info!("Job {} uploaded by user {} ({} bytes)", job.id, owner, job.file_size);
                Ok(job)
            }
            Err(e) => {
                self.remove_file(&source_path);
                Err(e.into())
            }
        }
    }

    /// Queues a conversion of the job to `target_format` ("docx", "xlsx", "pdf").
    pub fn submit_conversion(
        &self,
        job_id: JobId,
        requester: UserId,
        target_format: &str,
    ) -> Result<SubmitResult> {
        let job = self.owned_job(job_id, requester)?;
        if !job.status.accepts_submission() {
            return Err(ServiceError::conflict(format!(
                "job {} is {} and cannot be submitted",
                job.id, job.status
            )));
        }

        let family = source_family(&job).ok_or_else(|| {
            ServiceError::validation(format!("cannot tell what kind of document job {} holds", job.id))
        })?;
        let kind = ConversionKind::from_target(family, target_format).ok_or_else(|| {
            ServiceError::validation(format!(
                "cannot convert {} to '{}'",
                job.original_filename, target_format
            ))
        })?;

        let accepted = self.orchestrator.submit(&job, kind)?;
        Ok(SubmitResult {
            job_id: accepted.id,
            status: accepted.status,
        })
    }

    pub fn get_conversion_status(&self, job_id: JobId, requester: UserId) -> Result<StatusView> {
        let job = self.owned_job(job_id, requester)?;
        Ok(StatusView::from(&job))
    }

    pub fn issue_share_token(&self, job_id: JobId, requester: UserId) -> Result<ShareGrant> {
        let job = self.owned_job(job_id, requester)?;
        let token = self.share.issue(&job)?;
        Ok(ShareGrant {
            token: token.token,
            expires_at: token.expires_at,
            max_access: token.max_access,
        })
    }

    /// Anonymous access through a share link. Counts against the token's quota.
    pub fn redeem_share_token(&self, token: &str) -> Result<OutputFile> {
        let job = self.share.redeem(token)?;
        self.output_file(&job)
    }

    /// Owner download of a completed conversion.
    pub fn open_output(&self, job_id: JobId, requester: UserId) -> Result<OutputFile> {
        let job = self.owned_job(job_id, requester)?;
        self.output_file(&job)
    }

    /// Removes the job, its share tokens, and its stored files.
    pub fn delete_job(&self, job_id: JobId, requester: UserId) -> Result<()> {
        let job = self.owned_job(job_id, requester)?;

        let revoked = self.tokens.delete_for_job(job.id)?;
        if !self.jobs.delete(job.id)? {
            return Err(ServiceError::not_found(format!("job {}", job_id)));
        }

        self.remove_file(&job.source_path);
        if let Some(output) = &job.output_path {
            self.remove_file(output);
        }

        info!("Job {} deleted ({} share tokens revoked)", job.id, revoked);
        Ok(())
    }

    pub fn list_jobs(&self, owner: UserId, query: JobQuery) -> Result<JobPage> {
        let filter = query.into_filter()?;
        let total = self.jobs.count_by_owner(owner, &filter)?;
        let jobs = self.jobs.find_by_owner(owner, &filter)?;
        Ok(JobPage {
            jobs,
            total,
            page: filter.page,
            page_size: filter.page_size,
            total_pages: total.div_ceil(u64::from(filter.page_size)),
        })
    }

    pub fn stats(&self, owner: UserId) -> Result<JobStats> {
        let mut stats = JobStats::default();
        for (status, count) in self.jobs.count_by_status(owner)? {
            match status {
                JobStatus::Uploaded => stats.uploaded = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Stops intake, waits for running conversions up to the configured
    /// timeout, then fails whatever is still queued.
    pub fn shutdown(&self) -> ShutdownReport {
        let timeout = Duration::from_secs(self.config.conversion.shutdown_timeout_secs);
        let report = self.orchestrator.shutdown(timeout);
        info!(
            "Conversion service stopped (drained: {}, aborted: {}, detached: {})",
            report.drained, report.aborted, report.detached
        );
        report
    }

    fn owned_job(&self, job_id: JobId, requester: UserId) -> Result<Job> {
        match self.orchestrator.get_status(job_id)? {
            Some(job) if authorize_owner(&job, requester) => Ok(job),
            Some(_) => {
                warn!("User {} denied access to job {}", requester, job_id);
                Err(ServiceError::not_found(format!("job {}", job_id)))
            }
            None => Err(ServiceError::not_found(format!("job {}", job_id))),
        }
    }

    fn output_file(&self, job: &Job) -> Result<OutputFile> {
        let path = match (&job.status, &job.output_path) {
            (JobStatus::Completed, Some(path)) => path,
            _ => {
                return Err(ServiceError::conflict(format!(
                    "job {} has no converted output (status {})",
                    job.id, job.status
                )))
            }
        };
        let path = resolve_safe_path(path, Some(self.storage.root()))?;
        if !path.is_file() {
            return Err(ServiceError::not_found("converted file"));
        }

        let stem = job
            .original_filename
            .rsplit_once('.')
            .map_or(job.original_filename.as_str(), |(stem, _)| stem);
        let download_name = sanitize_for_content_disposition(&format!(
            "{}.{}",
            stem,
            job.conversion_kind.target_extension()
        ));

        Ok(OutputFile {
            path,
            download_name,
            mime_type: job.conversion_kind.target_mime().to_string(),
        })
    }

    fn remove_file(&self, path: &std::path::Path) {
        if let Err(e) = self.storage.delete_at_path(path) {
            warn!("Failed to remove {}: {}", redact_path(path), e);
        }
    }
}

/// Source family from the extension checked at upload, falling back to the
/// stored mime type.
fn source_family(job: &Job) -> Option<SourceFamily> {
    extension_of(&job.original_filename)
        .and_then(|e| SourceFamily::from_extension(&e))
        .or_else(|| job.mime_type.as_deref().and_then(SourceFamily::from_mime))
}
