//! Runs a batch job as a tracked admin task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::batch::{
    BatchJob, BatchScrollProcessor, ProgressReporter, RecommendationStore, ScrollQuery,
    ScrollSource,
};
use crate::error::TaskError;
use crate::scheduler::WorkerPool;
use crate::tasks::{AsyncTaskRecord, TaskManager, TaskProgress, TaskType};

#[async_trait]
impl ProgressReporter for TaskProgress {
    async fn report(&self, processed: usize, target: usize, message: String) {
        // 100 is reserved for completion.
        let percent = if target == 0 {
            0
        } else {
            (processed.saturating_mul(100) / target).min(99) as u8
        };
        self.update(percent, message).await;
    }
}

/// Keeps the pool's health check running until dropped, including when the
/// job unwinds.
struct HealthCheckGuard {
    pool: Arc<WorkerPool>,
}

impl HealthCheckGuard {
    fn start(pool: Arc<WorkerPool>) -> Self {
        pool.start_health_check();
        Self { pool }
    }
}

impl Drop for HealthCheckGuard {
    fn drop(&mut self) {
        self.pool.stop_health_check();
    }
}

/// Ties the worker pool, the processor, the task manager and a
/// recommendation store together.
pub struct RecommendationRunner {
    pool: Arc<WorkerPool>,
    processor: Arc<BatchScrollProcessor>,
    manager: TaskManager,
    store: Arc<dyn RecommendationStore>,
}

impl RecommendationRunner {
    pub fn new(
        pool: Arc<WorkerPool>,
        processor: Arc<BatchScrollProcessor>,
        manager: TaskManager,
        store: Arc<dyn RecommendationStore>,
    ) -> Self {
        Self {
            pool,
            processor,
            manager,
            store,
        }
    }

    /// Creates a task record and runs `job` over `source` in the background.
    ///
    /// The health check runs for the duration of the job and is stopped on
    /// every exit, panics included. The record ends COMPLETED with the run
    /// summary, or FAILED with the error.
    pub async fn spawn<S, J>(
        &self,
        task_type: TaskType,
        source: Arc<S>,
        query: ScrollQuery,
        job: Arc<J>,
    ) -> Result<(Uuid, JoinHandle<()>), TaskError>
    where
        S: ScrollSource + 'static,
        J: BatchJob<Item = S::Item>,
    {
        let pool = Arc::clone(&self.pool);
        let processor = Arc::clone(&self.processor);
        let store = Arc::clone(&self.store);

        self.manager
            .spawn(task_type, move |progress: TaskProgress| async move {
                info!(task_id = %progress.task_id(), kind = job.kind(), "Recommendation job started");
                let _health_check = HealthCheckGuard::start(pool);
                processor
                    .run(source.as_ref(), &query, job, store.as_ref(), &progress)
                    .await
            })
            .await
    }

    /// Runs `job` to completion and returns the final task record.
    pub async fn run<S, J>(
        &self,
        task_type: TaskType,
        source: Arc<S>,
        query: ScrollQuery,
        job: Arc<J>,
    ) -> Result<AsyncTaskRecord, TaskError>
    where
        S: ScrollSource + 'static,
        J: BatchJob<Item = S::Item>,
    {
        let (id, handle) = self.spawn(task_type, source, query, job).await?;
        if let Err(e) = handle.await {
            tracing::error!(task_id = %id, error = %e, "Recommendation job panicked");
            self.manager.fail(id, format!("job panicked: {}", e)).await?;
        }
        self.manager.get_task(id).await
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }
}
