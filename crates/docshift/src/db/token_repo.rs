//! Share token repository: SQLite implementation of [`TokenStore`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{JobId, ShareToken};
use crate::store::{Redemption, TokenStore};

struct TokenRow {
    token: String,
    job_id: i64,
    expires_at: String,
    access_count: i64,
    max_access: i64,
    created_at: String,
}

impl TokenRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            token: row.get("token")?,
            job_id: row.get("job_id")?,
            expires_at: row.get("expires_at")?,
            access_count: row.get("access_count")?,
            max_access: row.get("max_access")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_token(self) -> Result<ShareToken, DatabaseError> {
        let count = |column: &'static str, value: i64| {
            u32::try_from(value).map_err(|e| DatabaseError::Corrupt {
                column,
                reason: e.to_string(),
            })
        };
        Ok(ShareToken {
            token: self.token,
            job_id: self.job_id,
            expires_at: parse_timestamp("expires_at", &self.expires_at)?,
            access_count: count("access_count", self.access_count)?,
            max_access: count("max_access", self.max_access)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

fn select_token(conn: &Connection, value: &str) -> Result<Option<TokenRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT token, job_id, expires_at, access_count, max_access, created_at
             FROM share_tokens WHERE token = ?1",
            params![value],
            TokenRow::from_row,
        )
        .optional()?)
}

/// SQLite-backed share token store.
#[derive(Clone)]
pub struct SqliteTokenStore {
    db: Database,
}

impl SqliteTokenStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl TokenStore for SqliteTokenStore {
    fn create(&self, token: &ShareToken) -> Result<(), DatabaseError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO share_tokens (token, job_id, expires_at, access_count, max_access, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    token.token,
                    token.job_id,
                    format_timestamp(&token.expires_at),
                    token.access_count,
                    token.max_access,
                    format_timestamp(&token.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn find_by_token(&self, value: &str) -> Result<Option<ShareToken>, DatabaseError> {
        self.db
            .with_conn(|conn| select_token(conn, value))?
            .map(TokenRow::into_token)
            .transpose()
    }

    fn update(&self, token: &ShareToken) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE share_tokens SET expires_at = ?2, access_count = ?3, max_access = ?4
                 WHERE token = ?1",
                params![
                    token.token,
                    format_timestamp(&token.expires_at),
                    token.access_count,
                    token.max_access,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Redemption, DatabaseError> {
        let now_text = format_timestamp(&now);
        let (granted, row) = self.db.with_conn(|conn| {
            // The guard and the increment are one statement, so concurrent
            // redeemers cannot both pass the last remaining slot.
            let changed = conn.execute(
                "UPDATE share_tokens SET access_count = access_count + 1
                 WHERE token = ?1 AND access_count < max_access AND expires_at > ?2",
                params![value, now_text],
            )?;
            Ok((changed == 1, select_token(conn, value)?))
        })?;

        let Some(token) = row.map(TokenRow::into_token).transpose()? else {
            return Ok(Redemption::NotFound);
        };
        if granted {
            Ok(Redemption::Granted(token))
        } else if token.is_expired(now) {
            Ok(Redemption::Expired)
        } else {
            Ok(Redemption::Exhausted)
        }
    }

    fn delete_for_job(&self, job_id: JobId) -> Result<u64, DatabaseError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM share_tokens WHERE job_id = ?1", params![job_id])?;
            Ok(removed as u64)
        })
    }
}
