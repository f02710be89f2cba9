//! SQLite-backed session store.
//!
//! Sessions are stored as JSON documents next to a version counter and an
//! activity timestamp (unix millis, so the idle query compares integers).
//! Every process pointed at the same database file sees the same sessions.

use crate::{
    models::session::UploadSession,
    services::session_store::{SessionStore, StoreError, StoreResult, Versioned},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::debug;

/// Schema applied by `migrate`.
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(FromRow)]
struct SessionRow {
    version: i64,
    payload: String,
}

impl SessionRow {
    fn decode(self) -> StoreResult<Versioned<UploadSession>> {
        Ok(Versioned {
            version: self.version,
            value: serde_json::from_str(&self.payload)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Arc<SqlitePool>,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

/// Apply the session schema statement by statement.
pub async fn migrate(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &UploadSession) -> StoreResult<()> {
        let payload = serde_json::to_string(session)?;
        let result = sqlx::query(
            "INSERT INTO upload_sessions (id, version, payload, created_at_ms, last_activity_at_ms)
             VALUES (?, 1, ?, ?, ?)",
        )
        .bind(&session.session_id)
        .bind(payload)
        .bind(session.created_at.timestamp_millis())
        .bind(session.last_activity_at.timestamp_millis())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::AlreadyExists(session.session_id.clone()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Versioned<UploadSession>>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT version, payload FROM upload_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(SessionRow::decode).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        session: &UploadSession,
    ) -> StoreResult<bool> {
        let payload = serde_json::to_string(session)?;
        let result = sqlx::query(
            "UPDATE upload_sessions
             SET payload = ?, version = version + 1, last_activity_at_ms = ?
             WHERE id = ? AND version = ?",
        )
        .bind(payload)
        .bind(session.last_activity_at.timestamp_millis())
        .bind(&session.session_id)
        .bind(expected_version)
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &str) -> StoreResult<Option<UploadSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "DELETE FROM upload_sessions WHERE id = ? RETURNING version, payload",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(SessionRow::decode).transpose()?.map(|v| v.value))
    }

    async fn delete_if_version(&self, id: &str, expected_version: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE id = ? AND version = ?")
            .bind(id)
            .bind(expected_version)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Versioned<UploadSession>>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT version, payload FROM upload_sessions
             WHERE last_activity_at_ms < ?
             ORDER BY last_activity_at_ms ASC",
        )
        .bind(cutoff.timestamp_millis())
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter().map(SessionRow::decode).collect()
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM upload_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        let v = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        debug!("session store ping => {}", v);
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
