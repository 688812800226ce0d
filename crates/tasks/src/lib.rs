//! Task spawning with a process-wide shutdown signal.
//!
//! A [`TaskManager`] owns the shutdown trigger. It hands out [`TaskExecutor`]s
//! for spawning work and [`Shutdown`] futures for waiting on termination.
//! Critical tasks that panic fire the shutdown signal so the node does not
//! keep running in a half-broken state.

mod metrics;

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tracing::{error, info};

use crate::metrics::{IncCounterOnDrop, TaskExecutorMetrics};

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns true once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Also resolves if the [`TaskManager`] was dropped.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Sending side of the shutdown signal. Firing is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Request shutdown.
    pub fn fire(&self) {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
    }
}

/// Spawns tasks onto the runtime and tracks them in metrics.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: Handle,
    signal: ShutdownSignal,
    shutdown: Shutdown,
    metrics: TaskExecutorMetrics,
}

impl TaskExecutor {
    /// Spawn a regular task.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.metrics.inc_regular_tasks();
        let finished = IncCounterOnDrop::new(self.metrics.finished_regular_tasks_total.clone());
        self.handle.spawn(async move {
            let _finished = finished;
            fut.await;
        })
    }

    /// Spawn a critical task. A panic inside it requests shutdown.
    pub fn spawn_critical<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.metrics.inc_critical_tasks();
        let finished = IncCounterOnDrop::new(self.metrics.finished_critical_tasks_total.clone());
        let signal = self.signal.clone();
        self.handle.spawn(async move {
            let _finished = finished;
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                error!(task = name, "critical task panicked, requesting shutdown");
                signal.fire();
            }
        })
    }

    /// Shutdown future for tasks that need to stop cooperatively.
    pub fn on_shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Trigger for requesting shutdown from inside a task.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

/// Owns the shutdown trigger for a running process.
#[derive(Debug)]
pub struct TaskManager {
    executor: TaskExecutor,
}

impl TaskManager {
    /// Create a manager bound to the current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Create a manager bound to the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        let (tx, rx) = watch::channel(false);
        let signal = ShutdownSignal { tx: Arc::new(tx) };
        Self {
            executor: TaskExecutor {
                handle,
                signal,
                shutdown: Shutdown { rx },
                metrics: TaskExecutorMetrics::default(),
            },
        }
    }

    /// Executor for spawning tasks.
    pub fn executor(&self) -> TaskExecutor {
        self.executor.clone()
    }

    /// Fire the shutdown signal when the process receives Ctrl-C or SIGTERM.
    pub fn shutdown_on_os_signal(&self) {
        let signal = self.executor.signal.clone();
        self.executor.spawn(async move {
            wait_for_os_signal().await;
            info!("received termination signal, shutting down");
            signal.fire();
        });
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fire_is_observed_by_all_receivers() {
        let manager = TaskManager::current();
        let executor = manager.executor();
        let shutdown = executor.on_shutdown_signal().clone();
        assert!(!shutdown.is_requested());

        executor.shutdown_signal().fire();
        executor.shutdown_signal().fire();

        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
        assert!(shutdown.is_requested());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn critical_panic_requests_shutdown() {
        let manager = TaskManager::current();
        let executor = manager.executor();

        let handle = executor.spawn_critical("boom", async {
            panic!("boom");
        });
        handle.await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), executor.on_shutdown_signal().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn regular_task_runs_to_completion() {
        let manager = TaskManager::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        manager.executor().spawn(async move {
            let _ = tx.send(7);
        });
        assert_eq!(rx.await.unwrap(), 7);
        assert!(!manager.executor().on_shutdown_signal().is_requested());
    }
}
