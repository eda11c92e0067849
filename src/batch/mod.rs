//! Scroll-batch-parallel generation over paginated sources.
//!
//! - **source**: cursor-based [`ScrollSource`] and an in-memory implementation
//! - **aggregate**: per-key recommendation counts and their stores
//! - **processor**: [`BatchScrollProcessor`], which ties a source, a
//!   [`BatchJob`] and the worker pool together

pub mod aggregate;
pub mod processor;
pub mod source;

pub use aggregate::{
    AggregateEntry, InMemoryRecommendationStore, Recommendation, RecommendationAggregate,
    RecommendationStore, SqliteRecommendationStore, StoredRecommendation, UpsertSummary,
};
pub use processor::{
    BatchJob, BatchRunSummary, BatchScrollProcessor, NoopProgress, ProcessorConfig,
    ProgressReporter,
};
pub use source::{MemoryScrollSource, ScrollCursor, ScrollPage, ScrollQuery, ScrollSource};
