//! Bounded worker pool with deterministic result order.
//!
//! Fragment inspection and scanning are independent units of work. The
//! [`Executor`] fans them out over a fixed-size rayon pool and gathers the
//! results through one pre-allocated slot per input index, so the output order
//! is the input order no matter which worker finishes first.

use crate::error::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

/// How work is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Run every task inline on the calling thread, in order.
    Sequential,
    /// Run tasks on a pool of `threads` workers (`None` = number of CPUs).
    Parallel { threads: Option<usize> },
}

impl Default for ExecMode {
    fn default() -> Self {
        Self::Parallel { threads: None }
    }
}

/// Pools are expensive to build; share one per distinct size.
fn shared_pool(threads: usize) -> Result<Arc<ThreadPool>> {
    static POOLS: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();
    let mut pools = POOLS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(pool) = pools.get(&threads) {
        return Ok(Arc::clone(pool));
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("strata-io-{i}"))
        .build()
        .map_err(|e| Error::Resource(format!("cannot start {threads} worker threads: {e}")))?;
    debug!(threads, "started worker pool");
    let pool = Arc::new(pool);
    pools.insert(threads, Arc::clone(&pool));
    Ok(pool)
}

/// Runs batches of independent tasks in the configured [`ExecMode`].
#[derive(Clone)]
pub struct Executor {
    pool: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Executor {
    /// Build an executor, starting (or reusing) a pool for parallel modes.
    ///
    /// # Errors
    /// [`Error::Invalid`] for a zero thread count, [`Error::Resource`] if the
    /// pool cannot start.
    pub fn new(mode: ExecMode) -> Result<Self> {
        match mode {
            ExecMode::Sequential => Ok(Self::sequential()),
            ExecMode::Parallel { threads: Some(0) } => {
                Err(Error::invalid("worker thread count must be at least 1"))
            }
            ExecMode::Parallel { threads } => {
                let threads = threads.unwrap_or_else(|| num_cpus::get().max(1));
                Ok(Self {
                    pool: Some(shared_pool(threads)?),
                })
            }
        }
    }

    #[must_use]
    pub const fn sequential() -> Self {
        Self { pool: None }
    }

    /// Number of concurrent workers (1 when sequential).
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Apply `task` to every item and return the results in input order.
    ///
    /// Each item gets its own result slot; workers fill slots in whatever
    /// order they finish and the slots are drained from index 0 upwards. After
    /// the first failure no new tasks start, and the error with the lowest
    /// index is returned.
    ///
    /// # Errors
    /// The first (by index) error returned by `task`.
    pub fn scatter_gather<T, R, F>(&self, items: Vec<T>, task: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send + Sync,
        F: Fn(usize, T) -> Result<R> + Sync,
    {
        let Some(pool) = &self.pool else {
            return items
                .into_iter()
                .enumerate()
                .map(|(i, item)| task(i, item))
                .collect();
        };

        let slots: Vec<OnceLock<Result<R>>> = items.iter().map(|_| OnceLock::new()).collect();
        let failed = AtomicBool::new(false);
        pool.install(|| {
            items.into_par_iter().enumerate().for_each(|(i, item)| {
                if failed.load(Ordering::Acquire) {
                    return;
                }
                let out = task(i, item);
                if out.is_err() {
                    failed.store(true, Ordering::Release);
                }
                // Each index is visited exactly once.
                let _ = slots[i].set(out);
            });
        });

        let mut results = Vec::with_capacity(slots.len());
        let mut skipped = false;
        for slot in slots {
            match slot.into_inner() {
                Some(Ok(value)) => results.push(value),
                Some(Err(e)) => return Err(e),
                None => skipped = true,
            }
        }
        if skipped {
            return Err(Error::Cancelled("tasks skipped after a worker failure".into()));
        }
        Ok(results)
    }

    /// Run `task` on every element in place. Elements are processed
    /// concurrently but each one by exactly one worker.
    ///
    /// # Errors
    /// The first (by index) error returned by `task`.
    pub fn for_each_mut<T, F>(&self, items: &mut [T], task: F) -> Result<()>
    where
        T: Send,
        F: Fn(&mut T) -> Result<()> + Sync,
    {
        let Some(pool) = &self.pool else {
            return items.iter_mut().try_for_each(task);
        };
        let outcomes: Vec<Result<()>> = pool.install(|| items.par_iter_mut().map(&task).collect());
        outcomes.into_iter().collect()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecMode::default()).unwrap_or_else(|_| Self::sequential())
    }
}
