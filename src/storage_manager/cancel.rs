//! Cooperative cancellation of work scheduled on the compute pool.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{bounded, Receiver};
use rayon::ThreadPool;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::stats::Stats;

/// Shared cancellation flag. Long-running work polls it at safe points.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<Mutex<bool>>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.lock().unwrap()
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn set(&self, cancelled: bool) {
        *self.0.lock().unwrap() = cancelled;
    }
}

/// Result of a task submitted through [`CancelableTasks::execute`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task resolves.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(StorageError::TaskFailed("task dropped its result".to_string())))
    }
}

#[derive(Debug, Default)]
struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

/// Decrements the outstanding count however the task ends.
struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// Tracks tasks that have been scheduled but not yet finished.
#[derive(Debug)]
pub struct CancelableTasks {
    outstanding: Arc<Outstanding>,
    stats: Arc<Stats>,
}

impl CancelableTasks {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            outstanding: Arc::new(Outstanding::default()),
            stats,
        }
    }

    /// Schedule `f` on `pool`. If `token` is set when the task starts it
    /// resolves to `Cancelled` without running `f`; a panic in `f`
    /// resolves to `TaskFailed`.
    pub fn execute<T, F>(&self, pool: &ThreadPool, token: &CancellationToken, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        *self.outstanding.count.lock().unwrap() += 1;
        let guard = OutstandingGuard(self.outstanding.clone());
        let token = token.clone();
        let stats = self.stats.clone();
        pool.spawn(move || {
            let _guard = guard;
            let result = if token.is_cancelled() {
                stats.record_cancelled();
                debug!("Task cancelled before start");
                Err(StorageError::Cancelled)
            } else {
                catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    Err(StorageError::TaskFailed(msg))
                })
            };
            // The receiver may be gone if the caller dropped the handle.
            let _ = tx.send(result);
        });
        TaskHandle { rx }
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock().unwrap()
    }

    /// Block until every scheduled task has finished or been dropped.
    pub fn wait_all(&self) {
        let mut count = self.outstanding.count.lock().unwrap();
        while *count > 0 {
            count = self.outstanding.drained.wait(count).unwrap();
        }
    }
}
