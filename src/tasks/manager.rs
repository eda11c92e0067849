//! Task lifecycle manager.
//!
//! Owns every read-modify-write on task records so concurrent progress
//! reports and completion for the same task cannot interleave.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::TaskError;

use super::record::{AsyncTaskRecord, TaskStatus, TaskType};
use super::recovery::recover_interrupted_tasks;
use super::store::TaskStore;

/// Creates, advances and queries async task records.
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    write_lock: Arc<Mutex<()>>,
    recovered_on_boot: usize,
}

impl TaskManager {
    /// Runs startup recovery against `store`, then returns a manager ready to
    /// accept new tasks.
    pub async fn boot(store: Arc<dyn TaskStore>) -> Result<Self, TaskError> {
        let recovered_on_boot = recover_interrupted_tasks(store.as_ref()).await?;
        Ok(Self {
            recovered_on_boot,
            ..Self::new(store)
        })
    }

    /// Manager over `store` without startup recovery.
    ///
    /// For read-only inspection next to a live process; only the process that
    /// runs jobs should [`boot`](Self::boot).
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            recovered_on_boot: 0,
        }
    }

    /// Number of records failed by startup recovery.
    pub fn recovered_on_boot(&self) -> usize {
        self.recovered_on_boot
    }

    /// Creates a PENDING record and returns its id.
    pub async fn create_task(&self, task_type: TaskType) -> Result<Uuid, TaskError> {
        let record = AsyncTaskRecord::new(task_type);
        self.store.save(&record).await?;
        info!(task_id = %record.id, task_type = %task_type, "Task created");
        Ok(record.id)
    }

    /// Reports progress; the first report moves the task to IN_PROGRESS.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<(), TaskError> {
        let message = message.into();
        self.mutate(id, |record| record.update_progress(progress, message))
            .await?;
        debug!(task_id = %id, progress, "Task progress updated");
        Ok(())
    }

    /// Completes the task, storing `result` as JSON.
    pub async fn complete<R: Serialize>(&self, id: Uuid, result: &R) -> Result<(), TaskError> {
        let json = serde_json::to_string(result)?;
        self.complete_json(id, json).await
    }

    async fn complete_json(&self, id: Uuid, json: String) -> Result<(), TaskError> {
        self.mutate(id, |record| record.complete(json)).await?;
        info!(task_id = %id, "Task completed");
        Ok(())
    }

    /// Fails the task with `error`.
    pub async fn fail(&self, id: Uuid, error: impl Into<String>) -> Result<(), TaskError> {
        let error = error.into();
        self.mutate(id, |record| record.fail(error.clone())).await?;
        error!(task_id = %id, error = %error, "Task failed");
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<AsyncTaskRecord, TaskError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(TaskError::NotFound(id))
    }

    /// Newest-first page of records. `page` is zero-based.
    pub async fn get_recent_tasks(
        &self,
        page: usize,
        size: usize,
    ) -> Result<Vec<AsyncTaskRecord>, TaskError> {
        Ok(self.store.find_recent(page, size).await?)
    }

    /// PENDING and IN_PROGRESS records, oldest first.
    pub async fn get_running_tasks(&self) -> Result<Vec<AsyncTaskRecord>, TaskError> {
        let mut running = self.store.find_by_status(TaskStatus::Pending).await?;
        running.extend(self.store.find_by_status(TaskStatus::InProgress).await?);
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(running)
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<(), TaskError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.delete(id).await? {
            return Err(TaskError::NotFound(id));
        }
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Creates a record and runs `job` in the background.
    ///
    /// The record is completed with the job's output or failed with its error.
    /// The job reports progress through the [`TaskProgress`] it is handed.
    pub async fn spawn<F, Fut, R, E>(
        &self,
        task_type: TaskType,
        job: F,
    ) -> Result<(Uuid, JoinHandle<()>), TaskError>
    where
        F: FnOnce(TaskProgress) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.create_task(task_type).await?;
        let manager = self.clone();
        let progress = TaskProgress {
            manager: self.clone(),
            id,
        };

        let handle = tokio::spawn(async move {
            let outcome = match job(progress).await {
                Ok(result) => {
                    // Serialized before any await so `R` only needs `Send`.
                    let serialized = serde_json::to_string(&result);
                    match serialized {
                        Ok(json) => manager.complete_json(id, json).await,
                        Err(e) => manager.fail(id, format!("unserializable result: {}", e)).await,
                    }
                }
                Err(e) => manager.fail(id, e.to_string()).await,
            };
            if let Err(e) = outcome {
                error!(task_id = %id, error = %e, "Failed to record task outcome");
            }
        });

        Ok((id, handle))
    }

    async fn mutate<F>(&self, id: Uuid, apply: F) -> Result<(), TaskError>
    where
        F: FnOnce(&mut AsyncTaskRecord) -> Result<(), TaskError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(TaskError::NotFound(id))?;
        apply(&mut record)?;
        self.store.save(&record).await?;
        Ok(())
    }
}

/// Progress handle given to a job spawned through [`TaskManager::spawn`].
#[derive(Clone)]
pub struct TaskProgress {
    manager: TaskManager,
    id: Uuid,
}

impl TaskProgress {
    pub fn task_id(&self) -> Uuid {
        self.id
    }

    /// Records progress, logging instead of failing the job on store errors.
    pub async fn update(&self, progress: u8, message: impl Into<String>) {
        if let Err(e) = self.manager.update_progress(self.id, progress, message).await {
            error!(task_id = %self.id, error = %e, "Failed to record task progress");
        }
    }
}
