//! Job repository: SQLite implementation of [`JobStore`].

use std::path::PathBuf;

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Job, JobId, JobStatus, NewJob, UserId};
use crate::store::{JobFilter, JobStore};

const SELECT_COLUMNS: &str = "id, owner_id, original_filename, stored_filename, source_path, \
     file_size, mime_type, conversion_kind, status, output_filename, output_path, \
     error_message, created_at, processed_at";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: i64,
    owner_id: i64,
    original_filename: String,
    stored_filename: String,
    source_path: String,
    file_size: i64,
    mime_type: Option<String>,
    conversion_kind: String,
    status: String,
    output_filename: Option<String>,
    output_path: Option<String>,
    error_message: Option<String>,
    created_at: String,
    processed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            original_filename: row.get("original_filename")?,
            stored_filename: row.get("stored_filename")?,
            source_path: row.get("source_path")?,
            file_size: row.get("file_size")?,
            mime_type: row.get("mime_type")?,
            conversion_kind: row.get("conversion_kind")?,
            status: row.get("status")?,
            output_filename: row.get("output_filename")?,
            output_path: row.get("output_path")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            processed_at: row.get("processed_at")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |column: &'static str| move |reason: String| DatabaseError::Corrupt { column, reason };

        Ok(Job {
            id: self.id,
            owner_id: self.owner_id,
            original_filename: self.original_filename,
            stored_filename: self.stored_filename,
            source_path: PathBuf::from(self.source_path),
            file_size: u64::try_from(self.file_size)
                .map_err(|e| corrupt("file_size")(e.to_string()))?,
            mime_type: self.mime_type,
            conversion_kind: self.conversion_kind.parse().map_err(corrupt("conversion_kind"))?,
            status: self.status.parse().map_err(corrupt("status"))?,
            output_filename: self.output_filename,
            output_path: self.output_path.map(PathBuf::from),
            error_message: self.error_message,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            processed_at: self
                .processed_at
                .as_deref()
                .map(|raw| parse_timestamp("processed_at", raw))
                .transpose()?,
        })
    }
}

fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Escapes LIKE wildcards so the search term matches literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Builds the owner-scoped WHERE clause and its parameters.
fn owner_conditions(owner: UserId, filter: &JobFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions = vec!["owner_id = ?1".to_string()];
    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(owner)];

    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        conditions.push(format!(
            "LOWER(original_filename) LIKE ?{} ESCAPE '\\'",
            param_values.len() + 1
        ));
        param_values.push(Box::new(like_pattern(search.trim())));
    }

    (format!("WHERE {}", conditions.join(" AND ")), param_values)
}

/// SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, new_job: NewJob) -> Result<Job, DatabaseError> {
        let file_size = i64::try_from(new_job.file_size).map_err(|e| DatabaseError::Corrupt {
            column: "file_size",
            reason: e.to_string(),
        })?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (owner_id, original_filename, stored_filename, source_path,
                 file_size, mime_type, conversion_kind, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new_job.owner_id,
                    new_job.original_filename,
                    new_job.stored_filename,
                    path_text(&new_job.source_path),
                    file_size,
                    new_job.mime_type,
                    new_job.conversion_kind.as_str(),
                    JobStatus::Uploaded.as_str(),
                    format_timestamp(&new_job.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .map(|id| Job::uploaded(id, new_job))
    }

    fn find_by_id(&self, id: JobId) -> Result<Option<Job>, DatabaseError> {
        let row = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs WHERE id = ?1", SELECT_COLUMNS))?;
            let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
            match rows.next() {
                Some(Ok(row)) => Ok(Some(row)),
                Some(Err(e)) => Err(DatabaseError::from(e)),
                None => Ok(None),
            }
        })?;
        row.map(JobRow::into_job).transpose()
    }

    fn find_by_owner(&self, owner: UserId, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        let rows = self.db.with_conn(|conn| {
            let (where_clause, mut param_values) = owner_conditions(owner, filter);

            let offset = i64::try_from(filter.offset()).unwrap_or(i64::MAX);
            param_values.push(Box::new(i64::from(filter.page_size)));
            param_values.push(Box::new(offset));
            let query_sql = format!(
                "SELECT {} FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
                SELECT_COLUMNS,
                where_clause,
                param_values.len() - 1,
                param_values.len()
            );

            let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&query_sql)?;
            let rows: Vec<JobRow> = stmt
                .query_map(params_ref.as_slice(), JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    fn count_by_owner(&self, owner: UserId, filter: &JobFilter) -> Result<u64, DatabaseError> {
        self.db.with_conn(|conn| {
            let (where_clause, param_values) = owner_conditions(owner, filter);
            let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM jobs {}", where_clause),
                params_ref.as_slice(),
                |r| r.get(0),
            )?;
            Ok(u64::try_from(total).unwrap_or(0))
        })
    }

    fn update(&self, job: &Job) -> Result<bool, DatabaseError> {
        self.compare_and_update(&JobStatus::ALL, job)
    }

    fn compare_and_update(&self, expected: &[JobStatus], job: &Job) -> Result<bool, DatabaseError> {
        if expected.is_empty() {
            return Ok(false);
        }

        self.db.with_conn(|conn| {
            let mut param_values: Vec<Box<dyn ToSql>> = vec![
                Box::new(job.id),
                Box::new(job.original_filename.clone()),
                Box::new(job.conversion_kind.as_str()),
                Box::new(job.status.as_str()),
                Box::new(job.output_filename.clone()),
                Box::new(job.output_path.as_deref().map(path_text)),
                Box::new(job.error_message.clone()),
                Box::new(job.processed_at.as_ref().map(format_timestamp)),
            ];
            let placeholders: Vec<String> = expected
                .iter()
                .map(|status| {
                    param_values.push(Box::new(status.as_str()));
                    format!("?{}", param_values.len())
                })
                .collect();

            let sql = format!(
                "UPDATE jobs SET original_filename=?2, conversion_kind=?3, status=?4,
                 output_filename=?5, output_path=?6, error_message=?7, processed_at=?8
                 WHERE id=?1 AND status IN ({})",
                placeholders.join(", ")
            );
            let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
            let changed = conn.execute(&sql, params_ref.as_slice())?;
            Ok(changed == 1)
        })
    }

    /// One grouped query instead of one count per status.
    fn count_by_status(&self, owner: UserId) -> Result<Vec<(JobStatus, u64)>, DatabaseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM jobs WHERE owner_id = ?1 GROUP BY status",
            )?;
            let rows = stmt
                .query_map(params![owner], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(JobStatus::ALL
                .into_iter()
                .map(|status| {
                    let count = rows
                        .iter()
                        .find(|(s, _)| s == status.as_str())
                        .map(|(_, c)| u64::try_from(*c).unwrap_or(0))
                        .unwrap_or(0);
                    (status, count)
                })
                .collect())
        })
    }

    fn delete(&self, id: JobId) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
            Ok(changed == 1)
        })
    }
}
