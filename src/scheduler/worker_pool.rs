//! Bounded-parallelism worker pool for batches of independent I/O items.
//!
//! A fixed number of workers drain a shared queue. Each item runs under the
//! pool's retry policy and per-attempt timeout; an item that still fails is
//! recorded as data next to the successes, never raised past the batch.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Per-item retry with exponential backoff for transient errors
//! - Per-attempt timeout
//! - Results collected in completion order, not submission order
//! - Batch statistics tracking

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::retry::{retry_with_timeout, ItemFailure, RetryPolicy};
use crate::error::Transient;

/// Errors that prevent a batch from starting at all.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The concurrency bound must be at least one.
    #[error("Invalid concurrency bound {0}: must be greater than 0")]
    InvalidConcurrency(usize),

    /// The per-attempt timeout must be non-zero.
    #[error("Invalid item timeout: must be greater than 0")]
    InvalidTimeout,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub num_workers: usize,
    /// Maximum time allowed for a single attempt of one item.
    pub item_timeout: Duration,
    /// Retry schedule for transient item failures.
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 8,
            item_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Statistics about one batch.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of workers used.
    pub num_workers: usize,
    /// Items that eventually succeeded.
    pub succeeded: u64,
    /// Items that failed after all attempts.
    pub failed: u64,
    /// Extra attempts spent on retries.
    pub retries: u64,
    /// Most items in flight at once; never above `num_workers`.
    pub peak_in_flight: usize,
    /// Wall-clock time for the whole batch.
    pub elapsed: Duration,
}

impl PoolStats {
    /// Returns the total number of items processed.
    pub fn total_processed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / total as f64) * 100.0
    }
}

/// Outcomes of every item in a batch, in completion order.
#[derive(Debug)]
pub struct BatchReport<I, T> {
    pub results: Vec<(I, Result<T, ItemFailure>)>,
    pub stats: PoolStats,
}

impl<I, T> BatchReport<I, T> {
    /// True if at least one item succeeded. An empty batch is not a success.
    pub fn any_succeeded(&self) -> bool {
        self.results.iter().any(|(_, r)| r.is_ok())
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }

    /// Iterates over failed items and their failure.
    pub fn failures(&self) -> impl Iterator<Item = (&I, &ItemFailure)> {
        self.results
            .iter()
            .filter_map(|(item, r)| r.as_ref().err().map(|f| (item, f)))
    }

    /// Consumes the report, keeping only successful items.
    pub fn into_successes(self) -> Vec<(I, T)> {
        self.results
            .into_iter()
            .filter_map(|(item, r)| r.ok().map(|v| (item, v)))
            .collect()
    }
}

/// Pool of workers that process one batch of items at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Creates a worker pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the concurrency bound or timeout is zero.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        validate(&config)?;
        Ok(Self { config })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Runs `worker` over every item with bounded parallelism.
    ///
    /// Individual failures are collected in the report. The only error is a
    /// pool that cannot start.
    pub async fn run_all<I, T, E, F, Fut>(
        &self,
        label: &str,
        items: Vec<I>,
        worker: F,
    ) -> Result<BatchReport<I, T>, PoolError>
    where
        I: Clone,
        E: Display + Transient,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        validate(&self.config)?;

        let started = Instant::now();
        let total = items.len();
        let num_workers = self.config.num_workers.min(total.max(1));
        let queue = Mutex::new(items.into_iter().collect::<VecDeque<I>>());
        let retries = AtomicU64::new(0);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        info!(batch = label, items = total, workers = num_workers, "Starting batch");

        let workers = (0..num_workers).map(|worker_id| {
            let tx = tx.clone();
            let queue = &queue;
            let worker = &worker;
            let retries = &retries;
            let active = &active;
            let peak = &peak;
            let config = &self.config;
            async move {
                while let Some(item) = pop_next(queue) {
                    let in_flight = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(in_flight, Ordering::SeqCst);
                    let outcome = retry_with_timeout(&config.retry, config.item_timeout, || {
                        worker(item.clone())
                    })
                    .await;
                    active.fetch_sub(1, Ordering::SeqCst);

                    let outcome = match outcome {
                        Ok(attempted) => {
                            retries.fetch_add(u64::from(attempted.attempts - 1), Ordering::SeqCst);
                            Ok(attempted.value)
                        }
                        Err(failure) => {
                            retries.fetch_add(u64::from(failure.attempts - 1), Ordering::SeqCst);
                            debug!(batch = label, worker = worker_id, error = %failure, "Item failed");
                            Err(failure)
                        }
                    };
                    // The receiver outlives every worker; a send can only fail after a panic.
                    let _ = tx.send((item, outcome));
                }
            }
        })
        .collect::<Vec<_>>();
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let drain = async {
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
        };
        futures::join!(futures::future::join_all(workers), drain);

        let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count() as u64;
        let stats = PoolStats {
            num_workers,
            succeeded,
            failed: results.len() as u64 - succeeded,
            retries: retries.load(Ordering::SeqCst),
            peak_in_flight: peak.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };

        info!(
            batch = label,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retries = stats.retries,
            peak_in_flight = stats.peak_in_flight,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Batch finished"
        );

        Ok(BatchReport { results, stats })
    }
}

fn validate(config: &WorkerPoolConfig) -> Result<(), PoolError> {
    if config.num_workers == 0 {
        return Err(PoolError::InvalidConcurrency(config.num_workers));
    }
    if config.item_timeout.is_zero() {
        return Err(PoolError::InvalidTimeout);
    }
    Ok(())
}

fn pop_next<I>(queue: &Mutex<VecDeque<I>>) -> Option<I> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}
