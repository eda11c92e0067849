//! Error types for search-curator operations.
//!
//! Defines the error enums for each subsystem:
//! - LLM provider calls (with a typed throttle variant)
//! - Async task bookkeeping and queued task resolution
//! - Task and recommendation persistence
//! - Scroll cursors over paginated sources
//! - Batch scroll processing

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: CURATOR_LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// The provider asked us to slow down. Queued work is retried, not failed.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned no content")]
    EmptyResponse,
}

impl LlmError {
    /// Returns true if this error is a provider throttle signal.
    pub fn is_throttle(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// Errors surfaced by async task bookkeeping and queued LLM work.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Invalid state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Work queue is closed; task '{0}' was not enqueued")]
    QueueClosed(String),

    #[error("Task '{0}' was abandoned before a worker picked it up")]
    Abandoned(String),

    #[error("Result transform for task '{description}' panicked: {reason}")]
    TransformPanicked { description: String, reason: String },

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by persistent stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row in '{table}': {reason}")]
    CorruptRow { table: String, reason: String },
}

/// Errors raised by scrollable sources.
#[derive(Debug, Error)]
pub enum ScrollError {
    #[error("Failed to open cursor: {0}")]
    OpenFailed(String),

    #[error("Cursor '{0}' is unknown or expired")]
    UnknownCursor(String),

    #[error("Failed to fetch next page: {0}")]
    FetchFailed(String),

    #[error("Failed to release cursor '{cursor}': {reason}")]
    ReleaseFailed { cursor: String, reason: String },
}

/// Errors that abort a batch scroll run.
///
/// Per-batch LLM failures are absorbed by the processor and never show up here.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Scroll source error: {0}")]
    Scroll(#[from] ScrollError),

    #[error("Recommendation store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_classification() {
        assert!(LlmError::RateLimited("slow down".to_string()).is_throttle());
        assert!(!LlmError::ApiError {
            code: 500,
            message: "boom".to_string()
        }
        .is_throttle());
        assert!(!LlmError::RequestFailed("connection refused".to_string()).is_throttle());
    }

    #[test]
    fn test_task_error_display() {
        let id = Uuid::new_v4();
        assert!(TaskError::NotFound(id).to_string().contains(&id.to_string()));

        let err = TaskError::InvalidTransition {
            from: "COMPLETED".to_string(),
            to: "IN_PROGRESS".to_string(),
        };
        assert!(err.to_string().contains("COMPLETED"));

        let err = TaskError::QueueClosed("synonyms batch 3".to_string());
        assert!(err.to_string().contains("synonyms batch 3"));
    }

    #[test]
    fn test_llm_error_converts_into_task_error() {
        let err: TaskError = LlmError::EmptyResponse.into();
        assert!(matches!(err, TaskError::Llm(LlmError::EmptyResponse)));
    }
}
