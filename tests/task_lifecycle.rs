//! Integration tests for task bookkeeping: restart recovery against SQLite
//! and full recommendation runs recorded through the task manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use search_curator::batch::{
    BatchJob, BatchScrollProcessor, InMemoryRecommendationStore, MemoryScrollSource,
    ProcessorConfig, Recommendation, RecommendationStore, ScrollCursor, ScrollPage, ScrollQuery,
    ScrollSource,
};
use search_curator::error::{LlmError, ScrollError, TaskError};
use search_curator::jobs::{DictionaryRecommendationJob, RecommendationRunner};
use search_curator::llm::LlmClient;
use search_curator::scheduler::{WorkerPool, WorkerPoolConfig};
use search_curator::tasks::{
    SqliteTaskStore, TaskManager, TaskStatus, TaskStore, TaskType, INTERRUPTED_TASK_REASON,
};

fn db_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("tasks.db").display())
}

#[tokio::test]
async fn test_restart_fails_every_in_progress_task() {
    let temp_dir = TempDir::new().expect("temp dir");
    let url = db_url(&temp_dir);

    let (in_flight, pending, done) = {
        let store = SqliteTaskStore::open(&url).await.expect("open");
        let manager = TaskManager::boot(Arc::new(store)).await.expect("boot");
        assert_eq!(manager.recovered_on_boot(), 0);

        let mut in_flight = Vec::new();
        for pct in [10, 40, 75] {
            let id = manager.create_task(TaskType::LlmEvaluation).await.expect("create");
            manager.update_progress(id, pct, "working").await.expect("progress");
            in_flight.push((id, pct));
        }
        let pending = manager.create_task(TaskType::QueryGeneration).await.expect("create");
        let done = manager.create_task(TaskType::CandidateGeneration).await.expect("create");
        manager.complete(done, &json!({ "candidates": 3 })).await.expect("complete");

        (in_flight, pending, done)
    };

    // Simulated restart: a fresh store and manager over the same file.
    let store = Arc::new(SqliteTaskStore::open(&url).await.expect("reopen"));
    let manager = TaskManager::boot(store.clone()).await.expect("boot");
    assert_eq!(manager.recovered_on_boot(), in_flight.len());

    for (id, pct) in &in_flight {
        let record = manager.get_task(*id).await.expect("get");
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some(INTERRUPTED_TASK_REASON));
        assert_eq!(record.progress, *pct);
        assert!(record.completed_at.is_some());
    }
    assert!(store
        .find_by_status(TaskStatus::InProgress)
        .await
        .expect("query")
        .is_empty());

    assert_eq!(manager.get_task(pending).await.expect("get").status, TaskStatus::Pending);
    let completed = manager.get_task(done).await.expect("get");
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.progress, 100);

    // A second boot has nothing left to recover.
    let manager = TaskManager::boot(store).await.expect("boot again");
    assert_eq!(manager.recovered_on_boot(), 0);
}

#[tokio::test]
async fn test_terminal_records_reject_further_changes() {
    let temp_dir = TempDir::new().expect("temp dir");
    let store = SqliteTaskStore::open(&db_url(&temp_dir)).await.expect("open");
    let manager = TaskManager::boot(Arc::new(store)).await.expect("boot");

    let id = manager.create_task(TaskType::SynonymRecommendation).await.expect("create");
    manager.fail(id, "source unreachable").await.expect("fail from pending");

    assert!(matches!(
        manager.update_progress(id, 50, "late").await,
        Err(TaskError::InvalidTransition { .. })
    ));
    assert!(matches!(
        manager.complete(id, &json!({})).await,
        Err(TaskError::InvalidTransition { .. })
    ));

    let record = manager.get_task(id).await.expect("get");
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.progress, 0);
    assert!(record.started_at.is_none());
    assert!(record.result.is_none());
}

/// Returns one dictionary word per prompt.
struct WordClient;

#[async_trait]
impl LlmClient for WordClient {
    async fn call(&self, _prompt: &str, _temperature: Option<f64>) -> Result<String, LlmError> {
        Ok(r#"[{"word": "무선이어폰", "reason": "복합명사"}, {"word": "a b", "reason": "공백"}]"#
            .to_string())
    }
}

/// A source that cannot be reached.
struct DownSource;

#[async_trait]
impl ScrollSource for DownSource {
    type Item = Value;

    async fn open_cursor(
        &self,
        _query: &ScrollQuery,
        _page_size: usize,
        _keep_alive: Duration,
    ) -> Result<ScrollPage<Value>, ScrollError> {
        Err(ScrollError::OpenFailed("search backend unreachable".to_string()))
    }

    async fn next_page(&self, cursor: &ScrollCursor) -> Result<ScrollPage<Value>, ScrollError> {
        Err(ScrollError::UnknownCursor(cursor.id.clone()))
    }

    async fn release(&self, _cursor: &ScrollCursor) -> Result<(), ScrollError> {
        Ok(())
    }
}

/// Panics on the first document it sees.
struct BrokenExtractorJob;

impl BatchJob for BrokenExtractorJob {
    type Item = Value;

    fn kind(&self) -> &str {
        "dictionary"
    }

    fn extract(&self, _item: &Value) -> Option<String> {
        panic!("extractor bug");
    }

    fn build_prompt(&self, texts: &[String]) -> String {
        texts.join("\n")
    }

    fn parse(&self, _raw: &str) -> Result<Vec<Recommendation>, LlmError> {
        Ok(Vec::new())
    }
}

async fn runner(
    store: Arc<InMemoryRecommendationStore>,
) -> (RecommendationRunner, Arc<WorkerPool>, TempDir) {
    let temp_dir = TempDir::new().expect("temp dir");
    let tasks = SqliteTaskStore::open(&db_url(&temp_dir)).await.expect("open");
    let manager = TaskManager::boot(Arc::new(tasks)).await.expect("boot");

    let pool = WorkerPool::new(
        WorkerPoolConfig::new(2)
            .with_poll_interval(Duration::from_millis(10))
            .with_health_check(true, Duration::from_millis(20)),
        Arc::new(WordClient),
    );
    pool.start().expect("start");
    let pool = Arc::new(pool);

    let processor = BatchScrollProcessor::new(
        Arc::clone(&pool),
        ProcessorConfig::default().with_page_size(2).with_batch_size(1),
    )
    .expect("processor");

    (
        RecommendationRunner::new(Arc::clone(&pool), Arc::new(processor), manager, store),
        pool,
        temp_dir,
    )
}

#[tokio::test]
async fn test_runner_completes_record_with_summary() {
    let recommendations = Arc::new(InMemoryRecommendationStore::new());
    let (runner, pool, _dir) = runner(recommendations.clone()).await;
    let source = Arc::new(MemoryScrollSource::new(
        (0..5).map(|i| json!({ "title": format!("이어폰 {}", i) })).collect(),
    ));

    let record = runner
        .run(
            TaskType::DictionaryRecommendation,
            source.clone(),
            ScrollQuery::new().with_required_field("title"),
            Arc::new(DictionaryRecommendationJob::new("title")),
        )
        .await
        .expect("run");

    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.progress, 100);
    assert!(record.started_at.is_some());
    let summary: Value =
        serde_json::from_str(record.result.as_deref().expect("result")).expect("json");
    assert_eq!(summary["processed"], 5);
    assert_eq!(summary["kind"], "dictionary");
    assert_eq!(summary["failed_batches"], 0);

    let stored = recommendations
        .get("dictionary", "무선이어폰")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.count, 5);
    assert!(recommendations.get("dictionary", "a b").await.expect("get").is_none());

    assert_eq!(source.released_count(), 1);
    assert!(!pool.rate_limit().is_health_check_running());
    assert!(runner.manager().get_running_tasks().await.expect("running").is_empty());

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_runner_fails_record_when_source_is_down() {
    let (runner, pool, _dir) = runner(Arc::new(InMemoryRecommendationStore::new())).await;

    let record = runner
        .run(
            TaskType::DictionaryRecommendation,
            Arc::new(DownSource),
            ScrollQuery::new(),
            Arc::new(DictionaryRecommendationJob::new("title")),
        )
        .await
        .expect("run");

    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record
        .error_message
        .as_deref()
        .expect("error message")
        .contains("search backend unreachable"));
    assert!(record.result.is_none());

    pool.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_panicking_job_fails_record_and_stops_health_check() {
    let (runner, pool, _dir) = runner(Arc::new(InMemoryRecommendationStore::new())).await;
    let source = Arc::new(MemoryScrollSource::new(vec![json!({ "title": "이어폰" })]));

    let record = runner
        .run(
            TaskType::DictionaryRecommendation,
            source.clone(),
            ScrollQuery::new(),
            Arc::new(BrokenExtractorJob),
        )
        .await
        .expect("run");

    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record
        .error_message
        .as_deref()
        .expect("error message")
        .contains("job panicked"));
    assert!(!pool.rate_limit().is_health_check_running());
    assert!(pool.is_running());

    pool.shutdown().await.expect("shutdown");
}
