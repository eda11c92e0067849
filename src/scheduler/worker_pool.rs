//! Worker pool draining the shared LLM work queue.
//!
//! Each worker runs as an independent tokio task on the multi-threaded
//! runtime and pulls entries from the shared [`WorkQueue`].
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel and bounded join
//! - Throttled entries re-enqueued at the tail, never dropped
//! - Permanent failures delivered to the submitter, never retried
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::llm::LlmClient;

use super::entry::{QueuedTask, TaskEntry, TaskHandle};
use super::queue::WorkQueue;
use super::rate_limit::{RateLimitConfig, RateLimitCoordinator};

/// Lifecycle errors of the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// One or more workers did not stop in time and were aborted.
    #[error("{0} worker(s) did not stop within {1:?}")]
    ShutdownTimeout(usize, Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a worker waits on an empty queue before re-checking shutdown.
    pub poll_interval: Duration,
    /// Bound on joining each worker during shutdown.
    pub shutdown_timeout: Duration,
    /// Whether the rate-limit health check may run.
    pub health_check_enabled: bool,
    /// Interval between health probes while throttled.
    pub health_check_interval: Duration,
    /// Throttle flag lifetime when no health check is running.
    pub rate_limit_cooldown: Duration,
    /// Re-check interval for workers blocked on the throttle flag.
    pub rate_limit_wait_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let rate_limit = RateLimitConfig::default();
        Self {
            num_workers: 3,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(10),
            health_check_enabled: rate_limit.health_check_enabled,
            health_check_interval: rate_limit.health_check_interval,
            rate_limit_cooldown: rate_limit.cooldown,
            rate_limit_wait_interval: rate_limit.wait_interval,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables or disables the health check and sets its interval.
    pub fn with_health_check(mut self, enabled: bool, interval: Duration) -> Self {
        self.health_check_enabled = enabled;
        self.health_check_interval = interval;
        self
    }

    /// Sets the throttle cooldown.
    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Sets the re-check interval for throttled workers.
    pub fn with_rate_limit_wait_interval(mut self, interval: Duration) -> Self {
        self.rate_limit_wait_interval = interval;
        self
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            health_check_enabled: self.health_check_enabled,
            health_check_interval: self.health_check_interval,
            cooldown: self.rate_limit_cooldown,
            wait_interval: self.rate_limit_wait_interval,
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently calling the LLM.
    pub active_workers: usize,
    /// Number of entries waiting in the queue.
    pub queued: usize,
    /// Entries resolved successfully.
    pub completed: u64,
    /// Entries rejected with a permanent error.
    pub failed: u64,
    /// Throttle signals received (each one re-enqueued an entry).
    pub throttled: u64,
}

/// Counters shared between the pool and its workers.
struct SharedPoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    throttled: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pool of LLM workers sharing one queue and one throttle signal.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<WorkQueue>,
    client: Arc<dyn LlmClient>,
    rate_limit: Arc<RateLimitCoordinator>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new, stopped worker pool.
    pub fn new(config: WorkerPoolConfig, client: Arc<dyn LlmClient>) -> Self {
        let rate_limit = Arc::new(RateLimitCoordinator::new(
            Arc::clone(&client),
            config.rate_limit(),
        ));
        // One shutdown message is ever sent.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue: Arc::new(WorkQueue::new()),
            client,
            rate_limit,
            shutdown_tx,
            worker_handles: Mutex::new(Vec::new()),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let mut handles = self.lock_handles();
        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("llm-worker-{}", i),
                queue: Arc::clone(&self.queue),
                client: Arc::clone(&self.client),
                rate_limit: Arc::clone(&self.rate_limit),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
            };

            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker.run(shutdown_rx)));
        }

        info!(num_workers = self.config.num_workers, "LLM worker pool started");
        Ok(())
    }

    /// Stops all workers.
    ///
    /// Closes the queue to new submissions, signals every worker, and joins
    /// each one within the configured timeout; stragglers are aborted.
    /// Entries still queued are abandoned in place.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool was not started, or
    /// `PoolError::ShutdownTimeout` if some workers had to be aborted.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating LLM worker pool shutdown");
        self.queue.close();
        self.rate_limit.stop_health_check();

        // No receivers left means every worker already exited.
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        let mut timed_out = 0;
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker task panicked during shutdown"),
                Err(_) => {
                    abort.abort();
                    timed_out += 1;
                }
            }
        }

        let abandoned = self.queue.len();
        if abandoned > 0 {
            warn!(abandoned, "Queued LLM tasks abandoned at shutdown");
        }

        if timed_out > 0 {
            return Err(PoolError::ShutdownTimeout(
                timed_out,
                self.config.shutdown_timeout,
            ));
        }

        info!("LLM worker pool shutdown complete");
        Ok(())
    }

    /// Submits a prompt whose raw reply is mapped through `transform`.
    ///
    /// Never blocks. If the queue refuses the entry the returned handle is
    /// already resolved with [`TaskError::QueueClosed`].
    pub fn submit_task<T, F>(
        &self,
        prompt: impl Into<String>,
        temperature: Option<f64>,
        transform: F,
        description: impl Into<String>,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(String) -> T + Send + 'static,
    {
        let (entry, handle) = TaskEntry::new(prompt, temperature, transform, description);

        if let Err(refused) = self.queue.push(Box::new(entry)) {
            let description = refused.description().to_string();
            debug!(description = %description, "Submission refused by closed queue");
            refused.reject(TaskError::QueueClosed(description));
        }

        handle
    }

    /// Submits a prompt and returns its raw reply.
    pub fn submit_simple_task(
        &self,
        prompt: impl Into<String>,
        description: impl Into<String>,
    ) -> TaskHandle<String> {
        self.submit_task(prompt, None, |raw| raw, description)
    }

    /// Starts rate-limit health probing; pair with [`Self::stop_health_check`].
    pub fn start_health_check(&self) {
        self.rate_limit.start_health_check();
    }

    /// Stops rate-limit health probing.
    pub fn stop_health_check(&self) {
        self.rate_limit.stop_health_check();
    }

    /// Returns the number of entries waiting in the queue.
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Returns the number of workers currently calling the LLM.
    pub fn active_workers(&self) -> usize {
        self.stats.active_workers.load(Ordering::SeqCst) as usize
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            num_workers: self.config.num_workers,
            active_workers: self.active_workers(),
            queued: self.queue_size(),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            throttled: self.stats.throttled.load(Ordering::SeqCst),
        }
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the shared throttle coordinator.
    pub fn rate_limit(&self) -> &Arc<RateLimitCoordinator> {
        &self.rate_limit
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.worker_handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A single worker that processes entries from the queue.
struct Worker {
    id: String,
    queue: Arc<WorkQueue>,
    client: Arc<dyn LlmClient>,
    rate_limit: Arc<RateLimitCoordinator>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Waits out throttling, polls the queue, and processes one entry at a
    /// time until a shutdown signal is received. The throttle flag is checked
    /// again after dequeuing; no call starts while it is raised.
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                entry = self.next_entry() => entry,
            };

            let Some(entry) = next else { continue };

            // Another worker may have raised the flag while this one was polling.
            if self.rate_limit.is_rate_limited() {
                let cleared = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => false,
                    _ = self.rate_limit.wait_if_rate_limited() => true,
                };
                if !cleared {
                    self.queue.requeue(entry);
                    break;
                }
            }

            self.process(entry).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn next_entry(&self) -> Option<Box<dyn QueuedTask>> {
        self.rate_limit.wait_if_rate_limited().await;
        self.queue.poll(self.poll_interval).await
    }

    /// Processes a single entry.
    async fn process(&self, entry: Box<dyn QueuedTask>) {
        let started = Instant::now();
        let prompt = entry.prompt().to_string();
        let temperature = entry.temperature();
        self.stats.increment_active();

        let result = self.client.call(&prompt, temperature).await;

        // Counters settle before the handle completes so awaiting callers
        // observe them.
        self.stats.decrement_active();

        match result {
            Ok(raw) => {
                debug!(
                    worker_id = %self.id,
                    description = entry.description(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "LLM task completed"
                );
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                entry.resolve(raw);
            }
            Err(e) if e.is_throttle() => {
                warn!(
                    worker_id = %self.id,
                    description = entry.description(),
                    "LLM task throttled, requeueing"
                );
                self.stats.throttled.fetch_add(1, Ordering::SeqCst);
                self.rate_limit.set_rate_limit_active();
                self.queue.requeue(entry);
            }
            Err(e) => {
                error!(
                    worker_id = %self.id,
                    description = entry.description(),
                    error = %e,
                    "LLM task failed"
                );
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                entry.reject(TaskError::Llm(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn call(&self, prompt: &str, temperature: Option<f64>) -> Result<String, LlmError> {
            match prompt {
                "boom" => Err(LlmError::ApiError {
                    code: 500,
                    message: "boom".to_string(),
                }),
                _ => Ok(format!("{}@{:?}", prompt, temperature)),
            }
        }
    }

    fn test_config(num_workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(num_workers)
            .with_poll_interval(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(2))
            .with_health_check(false, Duration::from_millis(20))
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_poll_interval(Duration::from_millis(100))
            .with_shutdown_timeout(Duration::from_secs(3))
            .with_health_check(false, Duration::from_secs(1))
            .with_rate_limit_cooldown(Duration::from_secs(7));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert!(!config.health_check_enabled);
        assert_eq!(config.rate_limit().cooldown, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_submit_task_applies_transform() {
        let pool = WorkerPool::new(test_config(1), Arc::new(EchoClient));
        pool.start().expect("start");

        let handle = pool.submit_task("hi", Some(0.5), |raw| raw.to_uppercase(), "upper");
        assert_eq!(handle.await.expect("resolves"), "HI@SOME(0.5)");

        pool.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let pool = WorkerPool::new(test_config(1), Arc::new(EchoClient));
        pool.start().expect("start");

        let err = pool
            .submit_simple_task("boom", "fails")
            .await
            .expect_err("should fail");
        assert!(matches!(err, TaskError::Llm(LlmError::ApiError { code: 500, .. })));

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.throttled, 0);
        pool.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected_immediately() {
        let pool = WorkerPool::new(test_config(1), Arc::new(EchoClient));
        pool.start().expect("start");
        pool.shutdown().await.expect("shutdown");

        let err = pool
            .submit_simple_task("late", "late task")
            .await
            .expect_err("queue is closed");
        assert!(matches!(err, TaskError::QueueClosed(ref d) if d == "late task"));
        assert_eq!(pool.queue_size(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_and_shutdown_twice() {
        let pool = WorkerPool::new(test_config(2), Arc::new(EchoClient));
        pool.start().expect("start");
        assert!(pool.is_running());
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));

        pool.shutdown().await.expect("shutdown");
        assert!(!pool.is_running());
        assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));
    }

    #[tokio::test]
    async fn test_panicking_transform_keeps_worker_alive() {
        let pool = WorkerPool::new(test_config(1), Arc::new(EchoClient));
        pool.start().expect("start");

        let err = pool
            .submit_task("bad", None, |_raw: String| -> usize { panic!("bad reply") }, "explodes")
            .await
            .expect_err("transform panicked");
        assert!(matches!(
            err,
            TaskError::TransformPanicked { ref description, ref reason }
                if description == "explodes" && reason == "bad reply"
        ));

        // The single worker must still be serving the queue.
        let next = tokio::time::timeout(
            Duration::from_secs(2),
            pool.submit_simple_task("after", "follow-up"),
        )
        .await
        .expect("worker still alive")
        .expect("resolves");
        assert_eq!(next, "after@None");
        assert!(pool.is_running());
        assert_eq!(pool.active_workers(), 0);

        pool.shutdown().await.expect("shutdown");
    }

    #[test]
    fn test_pool_error_display() {
        assert!(PoolError::AlreadyRunning
            .to_string()
            .contains("already running"));
        assert!(PoolError::ShutdownTimeout(2, Duration::from_secs(10))
            .to_string()
            .contains("2 worker"));
    }
}
