//! Structured ownership of fire-and-forget background work.
//!
//! Reconciliations and download loops are spawned here instead of with bare
//! `tokio::spawn`, so the host can wait for in-flight write-backs before
//! exiting.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span};

#[derive(Debug, Clone)]
pub struct TaskSupervisor {
    name: &'static str,
    tasks: TaskTracker,
    cancel: CancellationToken,
    task_counter: Arc<AtomicU64>,
}

impl TaskSupervisor {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
            task_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn `future` under this supervisor. Returns `false` (and drops the
    /// future) once the supervisor has been shut down.
    pub fn spawn<F>(&self, label: &'static str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tasks.is_closed() {
            debug!(supervisor = self.name, label, "supervisor closed, dropping spawned task");
            return false;
        }

        let task_id = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.clone();
        let span = debug_span!("task", supervisor = self.name, label, task_id);
        self.tasks.spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => debug!("task aborted"),
                    () = future => {}
                }
            }
            .instrument(span),
        );
        true
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }

    /// Stop accepting work and wait for every spawned task to finish naturally.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        debug!(supervisor = self.name, "supervisor drained");
    }

    /// Stop accepting work and cancel running tasks at their next suspension point.
    pub async fn abort(&self) {
        self.cancel.cancel();
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::TaskSupervisor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_tasks() {
        let supervisor = TaskSupervisor::new("test");
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [10_u64, 50, 200] {
            let done = Arc::clone(&done);
            assert!(supervisor.spawn("sleeper", async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(supervisor.active(), 3);

        supervisor.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test]
    async fn closed_supervisor_rejects_new_work() {
        let supervisor = TaskSupervisor::new("test");
        supervisor.shutdown().await;
        assert!(supervisor.is_closed());
        assert!(!supervisor.spawn("late", async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_long_running_tasks() {
        let supervisor = TaskSupervisor::new("test");
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        supervisor.spawn("forever", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        supervisor.abort().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
