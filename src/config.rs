//! Runtime configuration for the curator.
//!
//! This module provides configuration for the LLM worker pool, the rate-limit
//! coordinator, batch scroll processing, task storage and the LLM endpoint.

use std::time::Duration;
use thiserror::Error;

use crate::batch::ProcessorConfig;
use crate::scheduler::WorkerPoolConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the curator core.
#[derive(Debug, Clone)]
pub struct CuratorConfig {
    // Worker pool settings
    /// Number of long-lived LLM workers.
    pub num_workers: usize,
    /// How long a worker waits on an empty queue before re-checking shutdown.
    pub poll_interval: Duration,
    /// Bound on joining each worker during shutdown.
    pub shutdown_timeout: Duration,

    // Rate limit settings
    /// Whether the health-check probe may run at all.
    pub health_check_enabled: bool,
    /// Interval between health-check probes while throttled.
    pub health_check_interval: Duration,
    /// How long a throttle flag may stay set without a running health check.
    pub rate_limit_cooldown: Duration,
    /// Re-check interval for workers blocked on the throttle flag.
    pub rate_limit_wait_interval: Duration,

    // Batch settings
    /// Documents fetched per scroll page.
    pub page_size: usize,
    /// Extracted texts per LLM call.
    pub batch_size: usize,
    /// Batches in flight per page.
    pub batch_parallelism: usize,
    /// Overall cap on processed documents per run.
    pub sample_cap: usize,
    /// Keep-alive requested for scroll cursors.
    pub scroll_keep_alive: Duration,

    // LLM settings
    /// OpenAI-compatible API base URL.
    pub llm_api_base: String,
    /// Optional bearer token.
    pub llm_api_key: Option<String>,
    /// Model used for generation calls.
    pub llm_model: String,
    /// Sampling temperature for generation calls.
    pub default_temperature: f64,

    // Storage settings
    /// SQLite database URL for tasks and recommendations.
    pub database_url: String,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            num_workers: 3,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(10),

            health_check_enabled: true,
            health_check_interval: Duration::from_secs(5),
            rate_limit_cooldown: Duration::from_secs(30),
            rate_limit_wait_interval: Duration::from_millis(200),

            page_size: 1000,
            batch_size: 20,
            batch_parallelism: 4,
            sample_cap: 10_000,
            scroll_keep_alive: Duration::from_secs(300),

            llm_api_base: "https://openrouter.ai/api/v1".to_string(),
            llm_api_key: None,
            llm_model: "openai/gpt-4o-mini".to_string(),
            default_temperature: 0.3,

            database_url: "sqlite://search_curator.db".to_string(),
        }
    }
}

impl CuratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CURATOR_NUM_WORKERS`: Worker count (default: 3)
    /// - `CURATOR_POLL_INTERVAL_MS`: Queue poll timeout (default: 500)
    /// - `CURATOR_SHUTDOWN_TIMEOUT_SECS`: Per-worker join bound (default: 10)
    /// - `CURATOR_HEALTH_CHECK_ENABLED`: Allow health probes (default: true)
    /// - `CURATOR_HEALTH_CHECK_INTERVAL_SECS`: Probe interval (default: 5)
    /// - `CURATOR_RATE_LIMIT_COOLDOWN_SECS`: Unprobed flag lifetime (default: 30)
    /// - `CURATOR_PAGE_SIZE`: Scroll page size (default: 1000)
    /// - `CURATOR_BATCH_SIZE`: Texts per LLM call (default: 20)
    /// - `CURATOR_BATCH_PARALLELISM`: Batches in flight (default: 4)
    /// - `CURATOR_SAMPLE_CAP`: Documents per run (default: 10000)
    /// - `CURATOR_LLM_API_BASE`: API base URL
    /// - `CURATOR_LLM_API_KEY` (or `OPENROUTER_API_KEY`): API key
    /// - `CURATOR_LLM_MODEL`: Model name
    /// - `CURATOR_TEMPERATURE`: Sampling temperature (default: 0.3)
    /// - `DATABASE_URL`: SQLite URL (default: sqlite://search_curator.db)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CURATOR_NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "CURATOR_NUM_WORKERS")?;
        }

        if let Ok(val) = std::env::var("CURATOR_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "CURATOR_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("CURATOR_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CURATOR_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CURATOR_HEALTH_CHECK_ENABLED") {
            config.health_check_enabled = parse_env_bool(&val, "CURATOR_HEALTH_CHECK_ENABLED")?;
        }

        if let Ok(val) = std::env::var("CURATOR_HEALTH_CHECK_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "CURATOR_HEALTH_CHECK_INTERVAL_SECS")?;
            config.health_check_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CURATOR_RATE_LIMIT_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "CURATOR_RATE_LIMIT_COOLDOWN_SECS")?;
            config.rate_limit_cooldown = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CURATOR_PAGE_SIZE") {
            config.page_size = parse_env_value(&val, "CURATOR_PAGE_SIZE")?;
        }

        if let Ok(val) = std::env::var("CURATOR_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "CURATOR_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("CURATOR_BATCH_PARALLELISM") {
            config.batch_parallelism = parse_env_value(&val, "CURATOR_BATCH_PARALLELISM")?;
        }

        if let Ok(val) = std::env::var("CURATOR_SAMPLE_CAP") {
            config.sample_cap = parse_env_value(&val, "CURATOR_SAMPLE_CAP")?;
        }

        if let Ok(val) = std::env::var("CURATOR_LLM_API_BASE") {
            config.llm_api_base = val;
        }

        config.llm_api_key = std::env::var("CURATOR_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .ok();

        if let Ok(val) = std::env::var("CURATOR_LLM_MODEL") {
            config.llm_model = val;
        }

        if let Ok(val) = std::env::var("CURATOR_TEMPERATURE") {
            config.default_temperature = parse_env_value(&val, "CURATOR_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.health_check_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "health_check_interval must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 || self.batch_size == 0 || self.batch_parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "page_size, batch_size and batch_parallelism must be greater than 0".to_string(),
            ));
        }

        if self.llm_api_base.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm_api_base cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationFailed(
                "default_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Derives the worker pool configuration.
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.num_workers)
            .with_poll_interval(self.poll_interval)
            .with_shutdown_timeout(self.shutdown_timeout)
            .with_health_check(self.health_check_enabled, self.health_check_interval)
            .with_rate_limit_cooldown(self.rate_limit_cooldown)
            .with_rate_limit_wait_interval(self.rate_limit_wait_interval)
    }

    /// Derives the batch processor configuration.
    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            page_size: self.page_size,
            batch_size: self.batch_size,
            parallelism: self.batch_parallelism,
            sample_cap: self.sample_cap,
            keep_alive: self.scroll_keep_alive,
            temperature: Some(self.default_temperature),
        }
    }

    /// Builder method to set the worker count.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to set the batch parallelism.
    pub fn with_batch_parallelism(mut self, parallelism: usize) -> Self {
        self.batch_parallelism = parallelism;
        self
    }

    /// Builder method to set the sample cap.
    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
