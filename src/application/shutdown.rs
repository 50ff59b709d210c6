//! Per-session shutdown barrier
//!
//! Every background task a session spawns (egress watchdog, webhook post,
//! presence prompts) registers here, so job teardown and test harnesses can
//! deterministically wait for them instead of leaking detached tasks.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Tracks a session's background tasks until shutdown
#[derive(Default)]
pub struct ShutdownBarrier {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    // Teardown must proceed even if a panicking task poisoned the list;
    // the handles themselves are still valid.
    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a tracked background task
    ///
    /// The returned handle lets the owner cancel the task early (for
    /// example, a dial failure cancelling a pending recording start); the
    /// barrier still reaps the aborted task on `wait`.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let abort = handle.abort_handle();
        self.tasks().push(handle);
        abort
    }

    /// Number of tasks registered so far (including finished ones)
    pub fn registered(&self) -> usize {
        self.tasks().len()
    }

    /// Wait for every registered task to finish or be aborted
    pub async fn wait(&self) {
        let drained: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks());
        debug!(tasks = drained.len(), "Waiting on session background tasks");
        for handle in drained {
            // Aborted tasks resolve with a JoinError; that is fine here
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_joins_registered_tasks() {
        let barrier = ShutdownBarrier::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            barrier.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        barrier.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poisoned_lock_does_not_block_teardown() {
        let barrier = Arc::new(ShutdownBarrier::new());

        let poisoner = Arc::clone(&barrier);
        std::thread::spawn(move || {
            let _guard = poisoner.tasks.lock().unwrap();
            panic!("poison the task list");
        })
        .join()
        .unwrap_err();

        let counter = Arc::new(AtomicUsize::new(0));
        let ran = counter.clone();
        barrier.spawn(async move {
            ran.fetch_add(1, Ordering::SeqCst);
        });

        barrier.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.registered(), 0);
    }

    #[tokio::test]
    async fn test_aborted_task_does_not_block_wait() {
        let barrier = ShutdownBarrier::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let abort = barrier.spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        abort.abort();

        barrier.wait().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
