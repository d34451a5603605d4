//! SQLite archive repository implementation.
//!
//! Implements `ArchiveRepository` from `palaver-core` using sqlx with split
//! read/write pools. The thread-plus-messages write runs inside a single
//! transaction on the writer pool, so a half-written thread is never visible
//! to readers.

use chrono::{DateTime, Utc};
use palaver_core::archive::ArchiveRepository;
use palaver_types::archive::{ArchivedMessage, Thread, UserRecord};
use palaver_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ArchiveRepository`.
pub struct SqliteArchiveRepository {
    pool: DatabasePool,
}

impl SqliteArchiveRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct UserRow {
    id: i64,
    username: String,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_user(self) -> Result<UserRecord, RepositoryError> {
        let created_at = parse_datetime(&self.created_at)?;
        Ok(UserRecord {
            id: self.id,
            username: self.username,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// ArchiveRepository implementation
// ---------------------------------------------------------------------------

impl ArchiveRepository for SqliteArchiveRepository {
    async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, created_at FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let user_row =
                    UserRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(user_row.into_user()?))
            }
            None => Ok(None),
        }
    }

    async fn archive_thread(
        &self,
        user_id: i64,
        messages: &[ArchivedMessage],
    ) -> Result<Thread, RepositoryError> {
        let now = Utc::now();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO chat_threads (user_id, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let thread_id = result.last_insert_rowid();

        for message in messages {
            sqlx::query(
                "INSERT INTO chat_messages (thread_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(thread_id)
            .bind(message.role.to_string())
            .bind(&message.content)
            .bind(format_datetime(&message.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(Thread {
            id: thread_id,
            user_id,
            created_at: now,
            updated_at: now,
        })
    }
}
