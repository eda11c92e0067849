//! Startup recovery of tasks interrupted by a crash or restart.
//!
//! No in-memory job survives a restart, so any record still IN_PROGRESS when
//! the process boots can never finish. Each one is failed with
//! [`INTERRUPTED_TASK_REASON`]. PENDING records are left alone.

use tracing::{info, warn};

use crate::error::TaskError;

use super::record::TaskStatus;
use super::store::TaskStore;

/// Error message stored on tasks failed by startup recovery.
pub const INTERRUPTED_TASK_REASON: &str = "Interrupted by server restart";

/// Fails every IN_PROGRESS record. Returns the number recovered.
pub async fn recover_interrupted_tasks(store: &dyn TaskStore) -> Result<usize, TaskError> {
    let stale = store.find_by_status(TaskStatus::InProgress).await?;
    if stale.is_empty() {
        info!("No interrupted tasks to recover");
        return Ok(0);
    }

    let mut recovered = 0;
    for mut record in stale {
        if let Err(e) = record.fail(INTERRUPTED_TASK_REASON) {
            warn!(task_id = %record.id, error = %e, "Skipping unrecoverable task");
            continue;
        }
        store.save(&record).await?;
        info!(
            task_id = %record.id,
            task_type = %record.task_type,
            progress = record.progress,
            "Marked interrupted task as failed"
        );
        recovered += 1;
    }

    warn!(recovered, "Recovered tasks interrupted by restart");
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::record::{AsyncTaskRecord, TaskType};
    use crate::tasks::store::InMemoryTaskStore;

    #[tokio::test]
    async fn test_recovery_fails_only_in_progress_records() {
        let store = InMemoryTaskStore::new();

        let mut running = AsyncTaskRecord::new(TaskType::SynonymRecommendation);
        running.update_progress(60, "page 6").expect("progress");
        let pending = AsyncTaskRecord::new(TaskType::QueryGeneration);
        let mut done = AsyncTaskRecord::new(TaskType::LlmEvaluation);
        done.complete("{}").expect("complete");

        for record in [&running, &pending, &done] {
            store.save(record).await.expect("save");
        }

        let recovered = recover_interrupted_tasks(&store).await.expect("recover");
        assert_eq!(recovered, 1);

        let running = store.find_by_id(running.id).await.expect("query").expect("present");
        assert_eq!(running.status, TaskStatus::Failed);
        assert_eq!(running.error_message.as_deref(), Some(INTERRUPTED_TASK_REASON));
        assert_eq!(running.progress, 60);
        assert!(running.completed_at.is_some());

        let pending = store.find_by_id(pending.id).await.expect("query").expect("present");
        assert_eq!(pending.status, TaskStatus::Pending);

        let done = store.find_by_id(done.id).await.expect("query").expect("present");
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_recovery_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let mut running = AsyncTaskRecord::new(TaskType::QueryGeneration);
        running.update_progress(1, "started").expect("progress");
        store.save(&running).await.expect("save");

        assert_eq!(recover_interrupted_tasks(&store).await.expect("first"), 1);
        assert_eq!(recover_interrupted_tasks(&store).await.expect("second"), 0);
    }
}
