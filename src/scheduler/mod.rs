//! Bounded-concurrency execution for batches of independent items.
//!
//! - **WorkerPool**: runs one batch with a fixed number of workers, collecting
//!   per-item successes and failures in completion order
//! - **RetryPolicy**: per-item retry with exponential backoff and a per-attempt
//!   timeout, also used for single un-batched service calls
//!
//! # Example
//!
//! ```rust,ignore
//! use knowledge_forge::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(10))?;
//! let report = pool
//!     .run_all("fetch", urls, |url| fetcher.fetch_raw(url))
//!     .await?;
//!
//! if !report.any_succeeded() {
//!     // whole batch failed
//! }
//! ```

pub mod retry;
pub mod worker_pool;

pub use retry::{retry_with_timeout, Attempted, ItemFailure, RetryPolicy};
pub use worker_pool::{BatchReport, PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
