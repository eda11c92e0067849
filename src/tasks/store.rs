//! Persistence for [`AsyncTaskRecord`]s.
//!
//! Two backends implement [`TaskStore`]:
//!
//! - [`InMemoryTaskStore`] for tests and one-shot runs
//! - [`SqliteTaskStore`] which survives restarts, so startup recovery can
//!   find tasks a crashed process left IN_PROGRESS

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

use super::record::{AsyncTaskRecord, TaskStatus, TaskType};

/// Storage contract for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts or replaces a record.
    async fn save(&self, record: &AsyncTaskRecord) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AsyncTaskRecord>, StoreError>;

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<AsyncTaskRecord>, StoreError>;

    /// Returns one page of records, newest first. `page` is zero-based.
    async fn find_recent(&self, page: usize, size: usize)
        -> Result<Vec<AsyncTaskRecord>, StoreError>;

    /// Deletes a record; returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Volatile store backed by a map.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<Uuid, AsyncTaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, record: &AsyncTaskRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AsyncTaskRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<AsyncTaskRecord>, StoreError> {
        let mut found: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn find_recent(
        &self,
        page: usize,
        size: usize,
    ) -> Result<Vec<AsyncTaskRecord>, StoreError> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS async_tasks (
    id              TEXT    PRIMARY KEY,
    task_type       TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    progress        INTEGER NOT NULL DEFAULT 0,
    message         TEXT,
    error_message   TEXT,
    result          TEXT,

    -- RFC 3339, fixed precision so lexical order matches time order
    created_at      TEXT    NOT NULL,
    started_at      TEXT,
    completed_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_async_tasks_status ON async_tasks(status);
CREATE INDEX IF NOT EXISTS idx_async_tasks_created ON async_tasks(created_at);
"#;

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Wraps an existing pool and applies the schema.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        tracing::info!("Task store opened");
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, record: &AsyncTaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO async_tasks (
                id, task_type, status, progress, message, error_message, result,
                created_at, started_at, completed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                error_message = excluded.error_message,
                result = excluded.result,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at",
        )
        .bind(record.id.to_string())
        .bind(record.task_type.as_str())
        .bind(record.status.as_str())
        .bind(record.progress as i64)
        .bind(&record.message)
        .bind(&record.error_message)
        .bind(&record.result)
        .bind(format_ts(&record.created_at))
        .bind(record.started_at.as_ref().map(format_ts))
        .bind(record.completed_at.as_ref().map(format_ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AsyncTaskRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM async_tasks WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<AsyncTaskRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM async_tasks WHERE status = ?1 ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn find_recent(
        &self,
        page: usize,
        size: usize,
    ) -> Result<Vec<AsyncTaskRecord>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM async_tasks ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")
                .bind(size as i64)
                .bind(page.saturating_mul(size) as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM async_tasks WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn corrupt(reason: String) -> StoreError {
    StoreError::CorruptRow {
        table: "async_tasks".to_string(),
        reason,
    }
}

fn record_from_row(row: &SqliteRow) -> Result<AsyncTaskRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let task_type: String = row.try_get("task_type")?;
    let status: String = row.try_get("status")?;
    let progress: i64 = row.try_get("progress")?;
    let created_at: String = row.try_get("created_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(AsyncTaskRecord {
        id: Uuid::parse_str(&id).map_err(|e| corrupt(format!("bad id '{}': {}", id, e)))?,
        task_type: TaskType::from_str(&task_type).map_err(corrupt)?,
        status: TaskStatus::from_str(&status).map_err(corrupt)?,
        progress: progress.clamp(0, 100) as u8,
        message: row.try_get("message")?,
        error_message: row.try_get("error_message")?,
        result: row.try_get("result")?,
        created_at: parse_ts(&created_at)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
    })
}
