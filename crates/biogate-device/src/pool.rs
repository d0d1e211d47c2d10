//! Bounded pool for blocking device calls.
//!
//! Protocol clients block the calling thread, so every call is dispatched
//! through [`WorkerPool::run`]. The pool caps how many such calls can be in
//! flight at once; callers beyond the cap wait for a permit.

use crate::error::{DeviceError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;

/// Bounded set of workers for blocking protocol calls.
///
/// Cloning is cheap and clones share the same permits.
///
/// # Examples
///
/// ```
/// use biogate_device::WorkerPool;
///
/// #[tokio::main]
/// async fn main() -> biogate_device::Result<()> {
///     let pool = WorkerPool::new(2);
///     let answer = pool.run(|| 6 * 7).await?;
///     assert_eq!(answer, 42);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run a blocking closure on a worker and wait for its result.
    ///
    /// The permit travels with the closure, so a caller that stops waiting
    /// does not free the slot until the blocking call has actually returned.
    ///
    /// # Errors
    /// Returns `DeviceError::Worker` if the pool was closed or the closure
    /// panicked.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DeviceError::worker("worker pool is closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Blocking device call did not complete");
            DeviceError::worker(e.to_string())
        })
    }

    /// Total number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a call.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse new work. Calls already running are not affected.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.run(|| "done").await.unwrap(), "done");
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_worker_error() {
        let pool = WorkerPool::new(1);
        let result = pool.run(|| -> u32 { panic!("boom") }).await;
        assert!(matches!(result, Err(DeviceError::Worker(_))));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(matches!(pool.run(|| ()).await, Err(DeviceError::Worker(_))));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut calls = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            calls.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
