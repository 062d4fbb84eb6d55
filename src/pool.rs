//! Bounded worker pool for CPU-heavy scoring.
//!
//! Alignment matrices, TF-IDF, k-means and PageRank run here so the async runtime keeps
//! serving network I/O. Pool size bounds resource use only; results do not depend on it.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Failures surfaced by [`ComputePool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The rayon pool could not be created.
    #[error("failed to build compute pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
    /// The job panicked before producing a result.
    #[error("compute job ended without a result")]
    Canceled,
}

/// Cloneable handle to a fixed-size rayon pool.
#[derive(Clone)]
pub struct ComputePool {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
}

impl ComputePool {
    /// Builds a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("fastcheck-compute-{idx}"))
            .panic_handler(|_| tracing::error!("compute job panicked"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            threads,
        })
    }

    /// Worker count.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `job` on the pool and awaits its result.
    ///
    /// If the awaiting future is dropped before the job starts, the job is skipped.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            if tx.is_closed() {
                return;
            }
            let _ = tx.send(job());
        });
        rx.await.map_err(|_| PoolError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[tokio::test(flavor = "current_thread")]
    async fn runs_jobs_off_the_runtime() {
        let pool = ComputePool::new(2).expect("pool");
        let sum = pool
            .run(|| (1..=100u64).into_par_iter().sum::<u64>())
            .await
            .expect("job result");
        assert_eq!(sum, 5050);
        assert_eq!(pool.threads(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn panicking_job_reports_canceled() {
        let pool = ComputePool::new(1).expect("pool");
        let result = pool.run(|| -> u8 { panic!("boom") }).await;
        assert!(matches!(result, Err(PoolError::Canceled)));
    }

    #[test]
    fn zero_threads_rounds_up() {
        let pool = ComputePool::new(0).expect("pool");
        assert_eq!(pool.threads(), 1);
    }
}
