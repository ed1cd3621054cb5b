//! Fixed-size pool executing delivery tasks.
//!
//! Submitting never waits: the task is spawned at once and queues for one
//! of the pool's permits, so the dispatcher keeps draining while deliveries
//! sleep through their backoff.
//!
//! Tasks waiting for a permit are not bounded. Against a slow collector the
//! backlog moves from the delivery queue into the pool, so queue-full
//! refusals only happen once the dispatcher itself falls behind.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Smallest pool size; dispatch and delivery never share a single worker.
pub const MIN_WORKERS: usize = 2;

/// Time cancelled tasks get to observe the abort token before being killed.
const ABORT_WINDOW: Duration = Duration::from_secs(1);

/// Counts of how pool tasks ended during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that ran to completion, including those that gave up when the
    /// abort token fired.
    pub completed: usize,
    /// Tasks killed after ignoring the abort token.
    pub aborted: usize,
    /// Tasks that panicked.
    pub panicked: usize,
}

impl ShutdownReport {
    /// Whether every task finished within the grace period.
    pub fn is_clean(&self) -> bool {
        self.aborted == 0 && self.panicked == 0
    }
}

/// Bounded-concurrency executor for delivery tasks.
///
/// Only running tasks are bounded; submitted tasks wait for a permit in an
/// unbounded set.
///
/// The `abort` token is cancelled when shutdown overruns its grace period
/// so tasks waiting in a retry backoff give up promptly.
pub struct WorkerPool {
    size: usize,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    abort: CancellationToken,
}

impl WorkerPool {
    /// Creates a pool running at most `size` tasks at once (minimum 2).
    pub fn new(size: usize, abort: CancellationToken) -> Self {
        let size = size.max(MIN_WORKERS);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            tasks: Mutex::new(JoinSet::new()),
            abort,
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks submitted and not yet finished, waiting ones included.
    pub fn pending(&self) -> usize {
        self.join_set().len()
    }

    /// Queues `task` for execution and returns immediately.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let abort = self.abort.clone();
        let mut tasks = self.join_set();

        while let Some(finished) = tasks.try_join_next() {
            if let Err(join_error) = finished {
                if join_error.is_panic() {
                    error!(error = %join_error, "delivery task panicked");
                }
            }
        }

        tasks.spawn(async move {
            let permit = tokio::select! {
                biased;
                () = abort.cancelled() => return,
                permit = permits.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return;
            };
            task.await;
        });
    }

    /// Waits up to `grace` for submitted tasks, then cancels the rest.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let mut tasks = std::mem::take(&mut *self.join_set());
        let mut report = ShutdownReport::default();

        info!(
            pending_tasks = tasks.len(),
            grace_seconds = grace.as_secs(),
            "waiting for in-flight deliveries"
        );

        let drained = tokio::time::timeout(grace, drain(&mut tasks, &mut report)).await.is_ok();
        if !drained {
            warn!(
                remaining_tasks = tasks.len(),
                grace_seconds = grace.as_secs(),
                "in-flight deliveries exceeded shutdown grace period, cancelling"
            );
            self.abort.cancel();

            // Cancelled tasks get a moment to record their outcome.
            if tokio::time::timeout(ABORT_WINDOW, drain(&mut tasks, &mut report)).await.is_err() {
                tasks.abort_all();
                drain(&mut tasks, &mut report).await;
            }
        }

        report
    }

    fn join_set(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn drain(tasks: &mut JoinSet<()>, report: &mut ShutdownReport) {
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(()) => report.completed += 1,
            Err(join_error) if join_error.is_cancelled() => report.aborted += 1,
            Err(join_error) => {
                error!(error = %join_error, "delivery task panicked during shutdown");
                report.panicked += 1;
            },
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending > 0 && !self.abort.is_cancelled() {
            error!(
                pending_tasks = pending,
                "WorkerPool dropped with pending deliveries, forcing cancellation"
            );
            self.abort.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn size_is_clamped_to_minimum() {
        let pool = WorkerPool::new(1, CancellationToken::new());
        assert_eq!(pool.size(), MIN_WORKERS);
    }

    #[tokio::test]
    async fn submitted_tasks_complete_before_shutdown_returns() {
        let pool = WorkerPool::new(2, CancellationToken::new());
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = done.clone();
            pool.submit(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        let report = pool.shutdown(Duration::from_secs(5)).await;

        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(report, ShutdownReport { completed: 5, aborted: 0, panicked: 0 });
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_size() {
        let pool = WorkerPool::new(2, CancellationToken::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.shutdown(Duration::from_secs(5)).await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_tasks_are_aborted_after_grace() {
        let abort = CancellationToken::new();
        let pool = WorkerPool::new(2, abort.clone());

        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let report = pool.shutdown(Duration::from_secs(10)).await;

        assert_eq!(report.aborted, 1);
        assert!(!report.is_clean());
        assert!(abort.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_with_pending_tasks_cancels_token() {
        let abort = CancellationToken::new();
        {
            let pool = WorkerPool::new(2, abort.clone());
            pool.submit(std::future::pending());
        }
        assert!(abort.is_cancelled());
    }
}
