//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const CREATE_JOBS: &str = "
CREATE TABLE jobs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id          INTEGER NOT NULL,
    original_filename TEXT    NOT NULL,
    stored_filename   TEXT    NOT NULL,
    source_path       TEXT    NOT NULL,
    file_size         INTEGER NOT NULL,
    mime_type         TEXT,
    conversion_kind   TEXT    NOT NULL,
    status            TEXT    NOT NULL,
    output_filename   TEXT,
    output_path       TEXT,
    error_message     TEXT,
    created_at        TEXT    NOT NULL,
    processed_at      TEXT
);
CREATE INDEX idx_jobs_owner_created ON jobs (owner_id, created_at DESC);
CREATE INDEX idx_jobs_owner_status ON jobs (owner_id, status);
";

const CREATE_SHARE_TOKENS: &str = "
CREATE TABLE share_tokens (
    token        TEXT    PRIMARY KEY,
    job_id       INTEGER NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
    expires_at   TEXT    NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    max_access   INTEGER NOT NULL,
    created_at   TEXT    NOT NULL
);
CREATE INDEX idx_share_tokens_job ON share_tokens (job_id);
";

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: CREATE_JOBS,
    },
    Migration {
        version: 2,
        description: "create_share_tokens_table",
        sql: CREATE_SHARE_TOKENS,
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let batch = format!(
            "BEGIN; {} INSERT INTO _migrations (version, description) VALUES ({}, '{}'); COMMIT;",
            migration.sql, migration.version, migration.description
        );
        if let Err(e) = conn.execute_batch(&batch) {
            // Leave the connection usable if the batch stopped mid-transaction.
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
