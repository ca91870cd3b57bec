//! Fixed-size worker pool for per-element batch jobs.
//!
//! Every job owns one batch index and one disjoint output slot, so jobs
//! never synchronize with each other. A call blocks until all jobs are done.
//!
//! ```text
//!   outputs: [ slot 0 | slot 1 | slot 2 | ... | slot B-1 ]
//!                 ^        ^        ^               ^
//!               job 0    job 1    job 2    ...    job B-1     (any worker)
//! ```
//!
//! A panic inside a job is caught and reported as [`Error::WorkerPanic`];
//! the whole call then fails and no partial output is returned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Where batch jobs run.
pub enum Executor {
    /// On the calling thread, for single-job batches.
    Inline,
    /// On a dedicated thread pool.
    Pool(WorkerPool),
}

impl Executor {
    /// Pick an executor for `jobs` jobs.
    ///
    /// A single job runs inline; otherwise a pool of at most
    /// `config.workers` threads is built for the call.
    pub fn for_batch(config: &PoolConfig, jobs: usize) -> Result<Self> {
        config.validate()?;
        if jobs <= 1 {
            return Ok(Self::Inline);
        }
        Ok(Self::Pool(WorkerPool::new(config, jobs)?))
    }

    /// Number of threads that will run jobs.
    pub fn workers(&self) -> usize {
        match self {
            Self::Inline => 1,
            Self::Pool(pool) => pool.workers(),
        }
    }

    /// Split `outputs` into `chunk_size` slots and run `job(index, slot)` on each.
    pub fn fill<T, F>(&self, outputs: &mut [T], chunk_size: usize, job: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync,
    {
        if chunk_size == 0 {
            return Err(Error::Config("output slot size must be at least 1".into()));
        }
        match self {
            Self::Inline => outputs
                .chunks_mut(chunk_size)
                .enumerate()
                .try_for_each(|(index, slot)| guarded(index, || job(index, slot))),
            Self::Pool(pool) => pool.fill(outputs, chunk_size, job),
        }
    }

    /// Run `job(index)` for every index in `0..jobs`, results in index order.
    pub fn map<T, F>(&self, jobs: usize, job: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        match self {
            Self::Inline => (0..jobs).map(|index| guarded(index, || job(index))).collect(),
            Self::Pool(pool) => pool.map(jobs, job),
        }
    }
}

/// A rayon thread pool sized for one batch call.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Build a pool of `min(config.workers, jobs)` threads.
    ///
    /// Threads beyond the number of jobs would never receive work.
    pub fn new(config: &PoolConfig, jobs: usize) -> Result<Self> {
        config.validate()?;
        let workers = config.workers.min(jobs.max(1));
        let prefix = config.thread_name_prefix.clone();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        debug!(workers, requested = config.workers, jobs, "built worker pool");
        Ok(Self { pool, workers })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Parallel version of [`Executor::fill`].
    pub fn fill<T, F>(&self, outputs: &mut [T], chunk_size: usize, job: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync,
    {
        self.pool.install(|| {
            outputs
                .par_chunks_mut(chunk_size)
                .enumerate()
                .try_for_each(|(index, slot)| guarded(index, || job(index, slot)))
        })
    }

    /// Parallel version of [`Executor::map`].
    pub fn map<T, F>(&self, jobs: usize, job: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        self.pool.install(|| {
            (0..jobs)
                .into_par_iter()
                .map(|index| guarded(index, || job(index)))
                .collect()
        })
    }
}

/// Run one job, turning a panic into [`Error::WorkerPanic`].
fn guarded<T>(index: usize, job: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
        Err(Error::WorkerPanic {
            job: index,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
