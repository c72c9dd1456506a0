//! Tracked background tasks.
//!
//! Every spawned task is owned by a [`TaskTracker`] so shutdown can wait for
//! it, and its outcome is inspected so a failing or panicking task is logged
//! and counted instead of vanishing.

use crate::error::Result;
use log::{debug, error};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::task::TaskTracker;

#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    failures: Arc<AtomicU64>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` and watch its result.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let failures = self.failures.clone();
        let inner = self.tracker.spawn(task);

        self.tracker.spawn(async move {
            match inner.await {
                Ok(Ok(())) => debug!("[Supervisor] Task '{}' finished", name),
                Ok(Err(e)) => {
                    failures.fetch_add(1, Ordering::SeqCst);
                    error!("[Supervisor] Task '{}' failed: {}", name, e);
                }
                Err(e) if e.is_panic() => {
                    failures.fetch_add(1, Ordering::SeqCst);
                    error!("[Supervisor] Task '{}' panicked: {}", name, e);
                }
                Err(e) => debug!("[Supervisor] Task '{}' cancelled: {}", name, e),
            }
        });
    }

    /// Number of tasks that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of tasks still running (watchers included).
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Close the tracker and wait for running tasks.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
