//! In-process LLM work queue drained by a fixed pool of workers.
//!
//! - **WorkQueue**: unbounded FIFO of type-erased task entries
//! - **WorkerPool**: workers that call the LLM, requeue on throttling and
//!   complete each submitter's [`TaskHandle`]
//! - **RateLimitCoordinator**: shared throttle flag plus its health-check loop
//!
//! # Architecture
//!
//! ```text
//!   submit_task ──► WorkQueue ──┬──► Worker 1 ──┐
//!        ▲                      ├──► Worker 2 ──┼──► LlmClient
//!        │                      └──► Worker N ──┘       │
//!        │                              │  throttled    │
//!        │                              ▼               │
//!        │                     RateLimitCoordinator ◄───┘ health probe
//!        │                              │
//!        └────── requeue at tail ◄──────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use search_curator::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(3), client);
//! pool.start()?;
//!
//! let words = pool
//!     .submit_task(prompt, Some(0.3), |raw| raw.lines().count(), "count lines")
//!     .await?;
//!
//! pool.shutdown().await?;
//! ```

pub mod entry;
pub mod queue;
pub mod rate_limit;
pub mod worker_pool;

pub use entry::{QueuedTask, TaskEntry, TaskHandle};
pub use queue::WorkQueue;
pub use rate_limit::{RateLimitConfig, RateLimitCoordinator};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
