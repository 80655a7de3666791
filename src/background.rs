//! Registry of spawned async tasks.
//!
//! Reply streaming and summarization run as detached tasks; registering
//! their handles lets callers (and tests) wait until everything in flight
//! has settled.

// std::sync::Mutex is correct here—lock is never held across .await points.
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::warn;

/// Registry for background tasks that can be awaited for quiescence.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn a background task and register its handle.
    ///
    /// Registration is synchronous so the handle is tracked before this
    /// method returns, even if the task completes immediately.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);

        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Wait until no registered task remains.
    ///
    /// Drains in a loop: a finishing task may itself have spawned follow-up
    /// tasks (a reply task scheduling summarization), and those are awaited
    /// too.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<_> =
                std::mem::take(&mut *self.handles.lock().expect("mutex poisoned"));
            if handles.is_empty() {
                return;
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task panicked");
                }
            }
        }
    }

    /// Number of tasks still running.
    pub fn pending_count(&self) -> usize {
        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn wait_idle_awaits_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::new();

        for delay in [10u64, 20] {
            let counter = counter.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wait_idle_covers_nested_spawns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::new();

        let nested_tasks = tasks.clone();
        let nested_counter = counter.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let counter = nested_counter.clone();
            nested_tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        tasks.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_idle_empty_is_noop() {
        let tasks = BackgroundTasks::new();
        tasks.wait_idle().await;
    }
}
