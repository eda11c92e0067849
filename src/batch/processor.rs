//! Scroll, batch and fan out LLM generation over a paginated source.
//!
//! For each page:
//!
//! 1. Extract one text per item (the page is truncated to the remaining cap)
//! 2. Split the texts into batches and submit one pool task per batch, at
//!    most `parallelism` in flight
//! 3. Parse and post-filter each reply; a failed batch contributes nothing
//! 4. Fold the page into an aggregate and add it onto the store
//! 5. Report progress, then fetch the next page unless the cap is reached
//!
//! The cursor is released exactly once on every exit path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{BatchError, LlmError, TaskError};
use crate::scheduler::WorkerPool;

use super::aggregate::{
    Recommendation, RecommendationAggregate, RecommendationStore, UpsertSummary,
};
use super::source::{ScrollCursor, ScrollPage, ScrollQuery, ScrollSource};

/// Tuning for one processor run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Items fetched per scroll page.
    pub page_size: usize,
    /// Texts per LLM call.
    pub batch_size: usize,
    /// Batches in flight per page.
    pub parallelism: usize,
    /// Maximum items processed per run.
    pub sample_cap: usize,
    /// Keep-alive requested for the cursor.
    pub keep_alive: Duration,
    /// Sampling temperature for generation calls.
    pub temperature: Option<f64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            batch_size: 20,
            parallelism: 4,
            sample_cap: 10_000,
            keep_alive: Duration::from_secs(300),
            temperature: Some(0.3),
        }
    }
}

impl ProcessorConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_sample_cap(mut self, sample_cap: usize) -> Self {
        self.sample_cap = sample_cap;
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.page_size == 0 {
            return Err(BatchError::InvalidConfig("page_size must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(BatchError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.parallelism == 0 {
            return Err(BatchError::InvalidConfig("parallelism must be positive".to_string()));
        }
        Ok(())
    }
}

/// The job-specific half of a processor run.
pub trait BatchJob: Send + Sync + 'static {
    type Item;

    /// Store namespace for this job's recommendations.
    fn kind(&self) -> &str;

    /// Text to send for one item, or `None` to skip it.
    fn extract(&self, item: &Self::Item) -> Option<String>;

    fn build_prompt(&self, texts: &[String]) -> String;

    /// Parses a raw LLM reply.
    fn parse(&self, raw: &str) -> Result<Vec<Recommendation>, LlmError>;

    /// Post-filter applied to every parsed recommendation.
    fn keep(&self, recommendation: &Recommendation) -> bool {
        !recommendation.key.trim().is_empty()
    }
}

/// Receives progress after every page.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, processed: usize, target: usize, message: String);
}

/// Discards progress.
pub struct NoopProgress;

#[async_trait]
impl ProgressReporter for NoopProgress {
    async fn report(&self, _processed: usize, _target: usize, _message: String) {}
}

/// Totals for one processor run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunSummary {
    pub kind: String,
    pub pages: usize,
    /// Items consumed from the source, including skipped ones.
    pub processed: usize,
    /// Items with nothing to extract.
    pub skipped: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Recommendations that passed the post-filter.
    pub recommendations: usize,
    /// Distinct keys seen in this run.
    pub distinct_keys: usize,
    pub inserted: usize,
    pub updated: usize,
    pub reached_cap: bool,
}

#[derive(Default)]
struct PageOutcome {
    aggregate: RecommendationAggregate,
    batches: usize,
    failed_batches: usize,
    recommendations: usize,
}

/// Runs [`BatchJob`]s over a [`ScrollSource`] through the shared worker pool.
pub struct BatchScrollProcessor {
    pool: Arc<WorkerPool>,
    config: ProcessorConfig,
}

impl BatchScrollProcessor {
    pub fn new(pool: Arc<WorkerPool>, config: ProcessorConfig) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Scrolls `source`, generating and persisting recommendations for `job`.
    ///
    /// # Errors
    ///
    /// Fails on cursor or store errors; the cursor is still released. LLM
    /// failures only fail their own batch.
    pub async fn run<S, J>(
        &self,
        source: &S,
        query: &ScrollQuery,
        job: Arc<J>,
        store: &dyn RecommendationStore,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchRunSummary, BatchError>
    where
        S: ScrollSource,
        J: BatchJob<Item = S::Item>,
    {
        let first = source
            .open_cursor(query, self.config.page_size, self.config.keep_alive)
            .await?;
        let mut cursor = first.cursor.clone();
        info!(
            kind = job.kind(),
            cursor_id = %cursor.id,
            approx_total = first.approx_total,
            sample_cap = self.config.sample_cap,
            "Batch scroll started"
        );

        let outcome = self
            .drive(source, first, &mut cursor, &job, store, progress)
            .await;

        if let Err(e) = source.release(&cursor).await {
            warn!(cursor_id = %cursor.id, error = %e, "Failed to release scroll cursor");
        } else {
            debug!(cursor_id = %cursor.id, "Scroll cursor released");
        }

        match &outcome {
            Ok(summary) => info!(
                kind = job.kind(),
                pages = summary.pages,
                processed = summary.processed,
                failed_batches = summary.failed_batches,
                inserted = summary.inserted,
                updated = summary.updated,
                "Batch scroll finished"
            ),
            Err(e) => warn!(kind = job.kind(), error = %e, "Batch scroll aborted"),
        }
        outcome
    }

    async fn drive<S, J>(
        &self,
        source: &S,
        first: ScrollPage<S::Item>,
        cursor: &mut ScrollCursor,
        job: &Arc<J>,
        store: &dyn RecommendationStore,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchRunSummary, BatchError>
    where
        S: ScrollSource,
        J: BatchJob<Item = S::Item>,
    {
        let cap = self.config.sample_cap;
        let target = first
            .approx_total
            .map_or(cap, |total| cap.min(total as usize));
        let mut summary = BatchRunSummary {
            kind: job.kind().to_string(),
            ..Default::default()
        };
        let mut seen = RecommendationAggregate::new();
        let mut upserts = UpsertSummary::default();
        let mut page = first;

        while !page.is_empty() && summary.processed < cap {
            *cursor = page.cursor.clone();
            summary.pages += 1;

            let remaining = cap - summary.processed;
            let consumed = page.items.len().min(remaining);
            let texts: Vec<String> = page
                .items
                .iter()
                .take(consumed)
                .filter_map(|item| job.extract(item))
                .collect();
            summary.processed += consumed;
            summary.skipped += consumed - texts.len();

            let outcome = self.process_page(summary.pages, &texts, job).await;
            summary.batches += outcome.batches;
            summary.failed_batches += outcome.failed_batches;
            summary.recommendations += outcome.recommendations;

            if !outcome.aggregate.is_empty() {
                upserts.add(store.upsert_counts(job.kind(), &outcome.aggregate).await?);
                summary.inserted = upserts.inserted;
                summary.updated = upserts.updated;
                seen.merge(outcome.aggregate);
            }
            summary.distinct_keys = seen.len();

            progress
                .report(
                    summary.processed,
                    target,
                    format!(
                        "page {}: {} items, {} batches failed",
                        summary.pages, summary.processed, summary.failed_batches
                    ),
                )
                .await;

            if summary.processed >= cap {
                summary.reached_cap = true;
                break;
            }
            page = source.next_page(cursor).await?;
        }

        Ok(summary)
    }

    async fn process_page<J: BatchJob>(
        &self,
        page_no: usize,
        texts: &[String],
        job: &Arc<J>,
    ) -> PageOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut batch_futures = Vec::new();

        for (batch_no, chunk) in texts.chunks(self.config.batch_size).enumerate() {
            let sem = semaphore.clone();
            let prompt = job.build_prompt(chunk);
            let parser = Arc::clone(job);
            let description = format!("{} page {} batch {}", job.kind(), page_no, batch_no);
            let temperature = self.config.temperature;

            batch_futures.push(async move {
                // The semaphore is never closed; a failed acquire just means no limit.
                let _permit = sem.acquire().await.ok();
                let result: Result<Result<Vec<Recommendation>, LlmError>, TaskError> = self
                    .pool
                    .submit_task(prompt, temperature, move |raw| parser.parse(&raw), description.clone())
                    .await;
                (description, result)
            });
        }

        let mut outcome = PageOutcome {
            batches: batch_futures.len(),
            ..Default::default()
        };

        for (description, result) in join_all(batch_futures).await {
            match result {
                Ok(Ok(recommendations)) => {
                    for recommendation in recommendations {
                        if job.keep(&recommendation) {
                            outcome.recommendations += 1;
                            outcome.aggregate.add(recommendation);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(description = %description, error = %e, "Unparseable batch reply");
                    outcome.failed_batches += 1;
                }
                Err(e) => {
                    warn!(description = %description, error = %e, "Batch failed");
                    outcome.failed_batches += 1;
                }
            }
        }

        outcome
    }
}
