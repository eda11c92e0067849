//! Async task bookkeeping.
//!
//! - **record**: [`AsyncTaskRecord`] and its forward-only status machine
//! - **store**: [`TaskStore`] with in-memory and SQLite backends
//! - **manager**: [`TaskManager`], the only writer of task records
//! - **recovery**: fails tasks left IN_PROGRESS by a previous process

pub mod manager;
pub mod record;
pub mod recovery;
pub mod store;

pub use manager::{TaskManager, TaskProgress};
pub use record::{AsyncTaskRecord, TaskStatus, TaskType};
pub use recovery::{recover_interrupted_tasks, INTERRUPTED_TASK_REASON};
pub use store::{InMemoryTaskStore, SqliteTaskStore, TaskStore};
