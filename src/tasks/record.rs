//! Persistent record of a long-running admin task.
//!
//! Records move forward only:
//!
//! ```text
//! PENDING ──► IN_PROGRESS ──► COMPLETED
//!    │              │
//!    └──────────────┴───────► FAILED
//! ```
//!
//! COMPLETED and FAILED are terminal; every mutator rejects a terminal record
//! with [`TaskError::InvalidTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Lifecycle status of an [`AsyncTaskRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Returns true for COMPLETED and FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a record may move from `self` to `next`.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// Kind of work a task record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    QueryGeneration,
    CandidateGeneration,
    LlmEvaluation,
    SynonymRecommendation,
    DictionaryRecommendation,
}

impl TaskType {
    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::QueryGeneration => "QUERY_GENERATION",
            TaskType::CandidateGeneration => "CANDIDATE_GENERATION",
            TaskType::LlmEvaluation => "LLM_EVALUATION",
            TaskType::SynonymRecommendation => "SYNONYM_RECOMMENDATION",
            TaskType::DictionaryRecommendation => "DICTIONARY_RECOMMENDATION",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "QUERY_GENERATION" => Ok(TaskType::QueryGeneration),
            "CANDIDATE_GENERATION" => Ok(TaskType::CandidateGeneration),
            "LLM_EVALUATION" => Ok(TaskType::LlmEvaluation),
            "SYNONYM_RECOMMENDATION" => Ok(TaskType::SynonymRecommendation),
            "DICTIONARY_RECOMMENDATION" => Ok(TaskType::DictionaryRecommendation),
            other => Err(format!("Unknown task type: {}", other)),
        }
    }
}

/// A tracked admin task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTaskRecord {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Percent complete, 0 to 100.
    pub progress: u8,
    pub message: Option<String>,
    pub error_message: Option<String>,
    /// JSON-encoded job result, set on completion.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AsyncTaskRecord {
    /// Creates a new PENDING record.
    pub fn new(task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            message: None,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Records progress, moving a PENDING record to IN_PROGRESS.
    ///
    /// Progress is clamped to 100 and never lowered.
    pub fn update_progress(
        &mut self,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<(), TaskError> {
        self.transition(TaskStatus::InProgress)?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.progress = self.progress.max(progress.min(100));
        self.message = Some(message.into());
        Ok(())
    }

    /// Marks the record COMPLETED with a JSON-encoded result.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<(), TaskError> {
        // A job may finish without ever reporting progress.
        if self.status == TaskStatus::Pending {
            self.transition(TaskStatus::InProgress)?;
            self.started_at = Some(Utc::now());
        }
        self.transition(TaskStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the record FAILED, keeping the last known progress.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = AsyncTaskRecord::new(TaskType::SynonymRecommendation);
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_progress_starts_record_and_never_decreases() {
        let mut record = AsyncTaskRecord::new(TaskType::QueryGeneration);
        record.update_progress(40, "page 1").expect("progress");
        assert_eq!(record.status, TaskStatus::InProgress);
        assert!(record.started_at.is_some());
        let started = record.started_at;

        record.update_progress(10, "late report").expect("progress");
        assert_eq!(record.progress, 40);
        assert_eq!(record.message.as_deref(), Some("late report"));
        assert_eq!(record.started_at, started);

        record.update_progress(250, "overshoot").expect("progress");
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn test_complete_from_in_progress() {
        let mut record = AsyncTaskRecord::new(TaskType::LlmEvaluation);
        record.update_progress(50, "half").expect("progress");
        record.complete(r#"{"ok":true}"#).expect("complete");

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result.as_deref(), Some(r#"{"ok":true}"#));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_complete_from_pending_stamps_start() {
        let mut record = AsyncTaskRecord::new(TaskType::CandidateGeneration);
        record.complete("null").expect("complete");
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_fail_keeps_progress() {
        let mut record = AsyncTaskRecord::new(TaskType::DictionaryRecommendation);
        record.update_progress(30, "working").expect("progress");
        record.fail("scroll expired").expect("fail");

        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress, 30);
        assert_eq!(record.error_message.as_deref(), Some("scroll expired"));
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut record = AsyncTaskRecord::new(TaskType::QueryGeneration);
        record.fail("rejected").expect("fail");
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.started_at.is_none());
    }

    #[test]
    fn test_terminal_records_reject_every_mutation() {
        let mut completed = AsyncTaskRecord::new(TaskType::QueryGeneration);
        completed.complete("[]").expect("complete");

        assert!(matches!(
            completed.update_progress(10, "again"),
            Err(TaskError::InvalidTransition { .. })
        ));
        assert!(completed.fail("late").is_err());
        assert!(completed.complete("[]").is_err());
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.error_message.is_none());

        let mut failed = AsyncTaskRecord::new(TaskType::QueryGeneration);
        failed.fail("boom").expect("fail");
        assert!(failed.update_progress(10, "again").is_err());
        assert!(failed.complete("[]").is_err());
        assert_eq!(failed.status, TaskStatus::Failed);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("DONE".parse::<TaskStatus>().is_err());
        assert_eq!(
            "synonym-recommendation".parse::<TaskType>(),
            Ok(TaskType::SynonymRecommendation)
        );
    }

    #[test]
    fn test_serde_uses_screaming_names() {
        let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(json, r#""IN_PROGRESS""#);
    }
}
