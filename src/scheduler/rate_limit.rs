//! Shared provider-throttle signal for the worker pool.
//!
//! A worker that receives [`LlmError::RateLimited`](crate::error::LlmError)
//! raises the flag; every worker blocks in
//! [`RateLimitCoordinator::wait_if_rate_limited`] before taking new work
//! while the flag is up. The flag is lowered by:
//!
//! - the health-check loop, once a probe call succeeds, or
//! - the first waiter that notices the cooldown has elapsed while no
//!   health-check loop is running, so a stale flag cannot starve the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::llm::LlmClient;

/// Minimal prompt used to probe the provider.
const HEALTH_PROBE_PROMPT: &str = "ping";

/// Timing knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether health checks may be started.
    pub health_check_enabled: bool,
    /// Interval between probes while throttled.
    pub health_check_interval: Duration,
    /// Flag lifetime when no health check is running.
    pub cooldown: Duration,
    /// Re-check interval for blocked workers.
    pub wait_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            health_check_enabled: true,
            health_check_interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
            wait_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Trigger {
    at: Instant,
    wall: DateTime<Utc>,
}

/// Throttle flag shared by all workers, plus its health-check loop.
pub struct RateLimitCoordinator {
    active: AtomicBool,
    last_trigger: Mutex<Option<Trigger>>,
    cleared: Notify,
    health_check_enabled: AtomicBool,
    health_check_running: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
    config: RateLimitConfig,
    client: Arc<dyn LlmClient>,
}

impl RateLimitCoordinator {
    /// Creates a coordinator that probes `client` during health checks.
    pub fn new(client: Arc<dyn LlmClient>, config: RateLimitConfig) -> Self {
        Self {
            active: AtomicBool::new(false),
            last_trigger: Mutex::new(None),
            cleared: Notify::new(),
            health_check_enabled: AtomicBool::new(config.health_check_enabled),
            health_check_running: AtomicBool::new(false),
            health_task: Mutex::new(None),
            config,
            client,
        }
    }

    /// Returns whether the provider is currently considered throttling.
    pub fn is_rate_limited(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Raises the throttle flag and stamps the trigger time.
    pub fn set_rate_limit_active(&self) {
        let now = Trigger {
            at: Instant::now(),
            wall: Utc::now(),
        };
        *self
            .last_trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);

        if !self.active.swap(true, Ordering::SeqCst) {
            warn!("LLM provider is throttling; pausing workers");
        }
    }

    /// Lowers the throttle flag and wakes every blocked worker.
    pub fn clear(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("LLM rate limit cleared; resuming workers");
        }
        self.cleared.notify_waiters();
    }

    /// Wall-clock time of the most recent throttle signal.
    pub fn last_triggered(&self) -> Option<DateTime<Utc>> {
        self.trigger().map(|t| t.wall)
    }

    /// Blocks until the throttle flag is down.
    pub async fn wait_if_rate_limited(&self) {
        loop {
            let cleared = self.cleared.notified();

            if !self.is_rate_limited() {
                return;
            }

            if !self.is_health_check_running() && self.cooldown_elapsed() {
                debug!("Rate limit cooldown elapsed without a health check");
                self.clear();
                return;
            }

            tokio::select! {
                _ = cleared => {}
                _ = tokio::time::sleep(self.config.wait_interval) => {}
            }
        }
    }

    /// Enables or disables health checks at runtime.
    ///
    /// Disabling stops a running loop.
    pub fn set_health_check_enabled(&self, enabled: bool) {
        self.health_check_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop_health_check();
        }
    }

    /// Returns whether health checks may be started.
    pub fn is_health_check_enabled(&self) -> bool {
        self.health_check_enabled.load(Ordering::SeqCst)
    }

    /// Returns whether the health-check loop is currently running.
    pub fn is_health_check_running(&self) -> bool {
        self.health_check_running.load(Ordering::SeqCst)
    }

    /// Starts the background probe loop. No-op when disabled or running.
    pub fn start_health_check(self: &Arc<Self>) {
        if !self.is_health_check_enabled() {
            debug!("Health check disabled; not starting");
            return;
        }

        let mut task = self
            .health_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        self.health_check_running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.health_check_loop().await }));
        info!(
            interval_ms = self.config.health_check_interval.as_millis() as u64,
            "LLM health check started"
        );
    }

    /// Stops the background probe loop.
    pub fn stop_health_check(&self) {
        self.health_check_running.store(false, Ordering::SeqCst);
        let handle = self
            .health_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("LLM health check stopped");
        }
    }

    async fn health_check_loop(&self) {
        let mut tick = tokio::time::interval(self.config.health_check_interval);
        tick.tick().await; // skip the immediate first tick

        loop {
            tick.tick().await;
            if !self.is_health_check_running() {
                break;
            }
            if !self.is_rate_limited() {
                continue;
            }

            match self.client.call(HEALTH_PROBE_PROMPT, Some(0.0)).await {
                Ok(_) => self.clear(),
                Err(e) if e.is_throttle() => {
                    debug!("Health probe still throttled");
                    self.set_rate_limit_active();
                }
                Err(e) => debug!(error = %e, "Health probe failed"),
            }
        }
    }

    fn trigger(&self) -> Option<Trigger> {
        *self
            .last_trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cooldown_elapsed(&self) -> bool {
        self.trigger()
            .map(|t| t.at.elapsed() >= self.config.cooldown)
            .unwrap_or(true)
    }
}

impl Drop for RateLimitCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .health_task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct ProbeClient {
        throttled_probes: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ProbeClient {
        fn new(throttled_probes: usize) -> Self {
            Self {
                throttled_probes: AtomicUsize::new(throttled_probes),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ProbeClient {
        async fn call(&self, _prompt: &str, _temperature: Option<f64>) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.throttled_probes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.throttled_probes.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::RateLimited("429".to_string()));
            }
            Ok("pong".to_string())
        }
    }

    fn fast_config(health_check_enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            health_check_enabled,
            health_check_interval: Duration::from_millis(20),
            cooldown: Duration::from_millis(50),
            wait_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_flag_set_and_clear() {
        let coordinator = RateLimitCoordinator::new(Arc::new(ProbeClient::new(0)), fast_config(false));
        assert!(!coordinator.is_rate_limited());
        assert!(coordinator.last_triggered().is_none());

        coordinator.set_rate_limit_active();
        assert!(coordinator.is_rate_limited());
        assert!(coordinator.last_triggered().is_some());

        coordinator.clear();
        assert!(!coordinator.is_rate_limited());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_clear() {
        let coordinator = RateLimitCoordinator::new(Arc::new(ProbeClient::new(0)), fast_config(false));
        tokio::time::timeout(Duration::from_millis(50), coordinator.wait_if_rate_limited())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn test_cooldown_clears_stale_flag_without_health_check() {
        let coordinator = RateLimitCoordinator::new(Arc::new(ProbeClient::new(0)), fast_config(false));
        coordinator.set_rate_limit_active();

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), coordinator.wait_if_rate_limited())
            .await
            .expect("cooldown should release the waiter");
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(!coordinator.is_rate_limited());
    }

    #[tokio::test]
    async fn test_health_check_clears_flag_after_successful_probe() {
        let client = Arc::new(ProbeClient::new(1));
        let coordinator = Arc::new(RateLimitCoordinator::new(client.clone(), fast_config(true)));

        coordinator.start_health_check();
        assert!(coordinator.is_health_check_running());
        coordinator.set_rate_limit_active();

        tokio::time::timeout(Duration::from_secs(2), coordinator.wait_if_rate_limited())
            .await
            .expect("probe should clear the flag");
        assert!(!coordinator.is_rate_limited());
        // First probe was throttled, second succeeded.
        assert!(client.calls.load(Ordering::SeqCst) >= 2);

        coordinator.stop_health_check();
        assert!(!coordinator.is_health_check_running());
    }

    #[tokio::test]
    async fn test_disabled_health_check_does_not_start() {
        let coordinator = Arc::new(RateLimitCoordinator::new(
            Arc::new(ProbeClient::new(0)),
            fast_config(false),
        ));
        coordinator.start_health_check();
        assert!(!coordinator.is_health_check_running());

        coordinator.set_health_check_enabled(true);
        coordinator.start_health_check();
        assert!(coordinator.is_health_check_running());

        coordinator.set_health_check_enabled(false);
        assert!(!coordinator.is_health_check_running());
    }
}
