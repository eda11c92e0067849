//! Recommendation aggregation and persistence.
//!
//! Batches produce [`Recommendation`]s; a page folds them into a
//! [`RecommendationAggregate`] (occurrence count per key, first description
//! wins) and the aggregate is added onto whatever a [`RecommendationStore`]
//! already holds. Counts are additive: running the same job twice over the
//! same documents doubles them.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// One suggestion parsed from an LLM reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Normalized identity, e.g. a dictionary word or synonym group.
    pub key: String,
    pub description: String,
}

impl Recommendation {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
        }
    }
}

/// Occurrences of one key within an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateEntry {
    pub description: String,
    pub count: u64,
}

/// Per-key occurrence counts with the first-seen description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecommendationAggregate {
    entries: BTreeMap<String, AggregateEntry>,
}

impl RecommendationAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one occurrence; the description is only kept for a new key.
    pub fn add(&mut self, recommendation: Recommendation) {
        self.entries
            .entry(recommendation.key)
            .and_modify(|entry| entry.count += 1)
            .or_insert(AggregateEntry {
                description: recommendation.description,
                count: 1,
            });
    }

    /// Adds `other`'s counts onto this aggregate.
    pub fn merge(&mut self, other: RecommendationAggregate) {
        for (key, incoming) in other.entries {
            self.entries
                .entry(key)
                .and_modify(|entry| entry.count += incoming.count)
                .or_insert(incoming);
        }
    }

    pub fn get(&self, key: &str) -> Option<&AggregateEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregateEntry)> {
        self.entries.iter()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all occurrence counts.
    pub fn total_occurrences(&self) -> u64 {
        self.entries.values().map(|e| e.count).sum()
    }
}

impl FromIterator<Recommendation> for RecommendationAggregate {
    fn from_iter<I: IntoIterator<Item = Recommendation>>(iter: I) -> Self {
        let mut aggregate = Self::new();
        for recommendation in iter {
            aggregate.add(recommendation);
        }
        aggregate
    }
}

/// A persisted recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecommendation {
    /// Which job produced it, e.g. `synonym`.
    pub kind: String,
    pub key: String,
    pub description: String,
    pub count: u64,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one [`RecommendationStore::upsert_counts`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    /// Accumulates another call's outcome into this running total.
    pub fn add(&mut self, other: UpsertSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Storage for recommendation counts.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Inserts new keys and adds counts onto existing ones, keeping their
    /// stored description.
    async fn upsert_counts(
        &self,
        kind: &str,
        aggregate: &RecommendationAggregate,
    ) -> Result<UpsertSummary, StoreError>;

    async fn get(&self, kind: &str, key: &str) -> Result<Option<StoredRecommendation>, StoreError>;

    /// Highest counts first.
    async fn list(&self, kind: &str, limit: usize) -> Result<Vec<StoredRecommendation>, StoreError>;
}

/// Volatile recommendation store.
#[derive(Default)]
pub struct InMemoryRecommendationStore {
    rows: RwLock<HashMap<(String, String), StoredRecommendation>>,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn upsert_counts(
        &self,
        kind: &str,
        aggregate: &RecommendationAggregate,
    ) -> Result<UpsertSummary, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let mut summary = UpsertSummary::default();

        for (key, entry) in aggregate.iter() {
            match rows.get_mut(&(kind.to_string(), key.clone())) {
                Some(existing) => {
                    existing.count += entry.count;
                    existing.updated_at = now;
                    summary.updated += 1;
                }
                None => {
                    rows.insert(
                        (kind.to_string(), key.clone()),
                        StoredRecommendation {
                            kind: kind.to_string(),
                            key: key.clone(),
                            description: entry.description.clone(),
                            count: entry.count,
                            first_seen_at: now,
                            updated_at: now,
                        },
                    );
                    summary.inserted += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn get(&self, kind: &str, key: &str) -> Result<Option<StoredRecommendation>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(kind.to_string(), key.to_string()))
            .cloned())
    }

    async fn list(&self, kind: &str, limit: usize) -> Result<Vec<StoredRecommendation>, StoreError> {
        let mut found: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        found.truncate(limit);
        Ok(found)
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS recommendations (
    kind            TEXT    NOT NULL,
    key             TEXT    NOT NULL,
    description     TEXT    NOT NULL,
    count           INTEGER NOT NULL DEFAULT 0,
    first_seen_at   TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL,

    PRIMARY KEY (kind, key)
);

CREATE INDEX IF NOT EXISTS idx_recommendations_count ON recommendations(kind, count DESC);
"#;

/// SQLite-backed recommendation store.
#[derive(Clone)]
pub struct SqliteRecommendationStore {
    pool: SqlitePool,
}

impl SqliteRecommendationStore {
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

    /// Wraps an existing pool, e.g. the one shared with the task store.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        tracing::info!("Recommendation store opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecommendationStore for SqliteRecommendationStore {
    async fn upsert_counts(
        &self,
        kind: &str,
        aggregate: &RecommendationAggregate,
    ) -> Result<UpsertSummary, StoreError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut tx = self.pool.begin().await?;
        let mut summary = UpsertSummary::default();

        for (key, entry) in aggregate.iter() {
            let exists = sqlx::query("SELECT 1 FROM recommendations WHERE kind = ?1 AND key = ?2")
                .bind(kind)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

            sqlx::query(
                "INSERT INTO recommendations (kind, key, description, count, first_seen_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(kind, key) DO UPDATE SET
                    count = recommendations.count + excluded.count,
                    updated_at = excluded.updated_at",
            )
            .bind(kind)
            .bind(key)
            .bind(&entry.description)
            .bind(entry.count as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            if exists {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn get(&self, kind: &str, key: &str) -> Result<Option<StoredRecommendation>, StoreError> {
        let row = sqlx::query("SELECT * FROM recommendations WHERE kind = ?1 AND key = ?2")
            .bind(kind)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(recommendation_from_row).transpose()
    }

    async fn list(&self, kind: &str, limit: usize) -> Result<Vec<StoredRecommendation>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM recommendations WHERE kind = ?1 ORDER BY count DESC, key LIMIT ?2",
        )
        .bind(kind)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(recommendation_from_row).collect()
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "recommendations".to_string(),
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

fn recommendation_from_row(row: &SqliteRow) -> Result<StoredRecommendation, StoreError> {
    let count: i64 = row.try_get("count")?;
    let first_seen_at: String = row.try_get("first_seen_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(StoredRecommendation {
        kind: row.try_get("kind")?,
        key: row.try_get("key")?,
        description: row.try_get("description")?,
        count: count.max(0) as u64,
        first_seen_at: parse_ts(&first_seen_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(items: &[(&str, &str)]) -> RecommendationAggregate {
        items
            .iter()
            .map(|(key, description)| Recommendation::new(*key, *description))
            .collect()
    }

    #[test]
    fn test_first_description_wins_and_counts_accumulate() {
        let aggregate = page(&[
            ("노트북,랩탑", "같은 기기"),
            ("노트북,랩탑", "다른 설명"),
            ("핸드폰,휴대폰", "표기 차이"),
        ]);

        let entry = aggregate.get("노트북,랩탑").expect("present");
        assert_eq!(entry.count, 2);
        assert_eq!(entry.description, "같은 기기");
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate.total_occurrences(), 3);
    }

    #[test]
    fn test_merge_adds_counts_and_keeps_existing_description() {
        let mut first = page(&[("a", "first")]);
        first.merge(page(&[("a", "second"), ("a", "third"), ("b", "new")]));

        assert_eq!(first.get("a").map(|e| e.count), Some(3));
        assert_eq!(first.get("a").map(|e| e.description.as_str()), Some("first"));
        assert_eq!(first.get("b").map(|e| e.count), Some(1));
    }

    #[tokio::test]
    async fn test_in_memory_upsert_is_additive() {
        let store = InMemoryRecommendationStore::new();
        let aggregate = page(&[("a", "first"), ("a", "first"), ("b", "bee")]);

        let first = store.upsert_counts("synonym", &aggregate).await.expect("upsert");
        assert_eq!(first, UpsertSummary { inserted: 2, updated: 0 });

        let second = store
            .upsert_counts("synonym", &page(&[("a", "changed")]))
            .await
            .expect("upsert");
        assert_eq!(second, UpsertSummary { inserted: 0, updated: 1 });

        let a = store.get("synonym", "a").await.expect("get").expect("present");
        assert_eq!(a.count, 3);
        assert_eq!(a.description, "first");
        assert!(store.get("dictionary", "a").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_is_additive_and_ordered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("recs.db").display());
        let store = SqliteRecommendationStore::open(&url).await.expect("open");

        let aggregate = page(&[("자동차,차량", "의미 동일"), ("타이어", "단일")]);
        let summary = store.upsert_counts("synonym", &aggregate).await.expect("upsert");
        assert_eq!(summary, UpsertSummary { inserted: 2, updated: 0 });

        let again = page(&[("자동차,차량", "바뀐 설명")]);
        let summary = store.upsert_counts("synonym", &again).await.expect("upsert");
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        let listed = store.list("synonym", 10).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "자동차,차량");
        assert_eq!(listed[0].count, 2);
        assert_eq!(listed[0].description, "의미 동일");
        assert!(listed[0].updated_at >= listed[0].first_seen_at);
    }
}
