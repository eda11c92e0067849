//! search-curator: LLM work queue and task lifecycle for a Korean search admin.
//!
//! This library provides a shared LLM worker pool with throttle-aware
//! requeueing, crash-safe task bookkeeping, and a scroll-batch-parallel
//! processor that turns document exports into dictionary, synonym and query
//! recommendations.

// Core modules
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod scheduler;
pub mod tasks;
pub mod utils;

// Re-export commonly used error types
pub use error::{BatchError, LlmError, ScrollError, StoreError, TaskError};
