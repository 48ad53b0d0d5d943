//! Start/stop lifecycle for long-running background tasks.

use std::{future::Future, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Result of asking a worker to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The task exited within the stop timeout.
    Stopped,
    /// Nothing was running.
    NotRunning,
    /// The task did not exit in time and may still be running.
    TimedOut,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns at most one running instance of a background task.
pub(crate) struct Supervisor {
    name: &'static str,
    stop_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl Supervisor {
    pub fn new(name: &'static str, stop_timeout: Duration) -> Self {
        Self {
            name,
            stop_timeout,
            running: Mutex::new(None),
        }
    }

    /// Spawn the task unless one is already running. Returns whether a task
    /// was spawned.
    pub async fn start<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;

        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::warn!(worker = self.name, "Worker is already running");
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));

        *running = Some(Running { token, handle });

        tracing::info!(worker = self.name, "Worker started");

        true
    }

    /// Signal the task to exit and wait up to the stop timeout for it.
    ///
    /// A task that does not exit in time stays registered, so `start` keeps
    /// refusing until it has finished.
    pub async fn stop(&self) -> Shutdown {
        let mut running = self.running.lock().await;

        let Some(Running { token, handle }) = running.as_mut() else {
            tracing::debug!(worker = self.name, "Worker is not running");
            return Shutdown::NotRunning;
        };

        token.cancel();

        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => {
                *running = None;
                tracing::info!(worker = self.name, "Worker stopped");
                Shutdown::Stopped
            }
            Ok(Err(e)) => {
                *running = None;
                tracing::error!(worker = self.name, error = %e, "Worker task ended abnormally");
                Shutdown::Stopped
            }
            Err(_) => {
                tracing::warn!(
                    worker = self.name,
                    timeout = ?self.stop_timeout,
                    "Worker did not stop in time and may still be running"
                );
                Shutdown::TimedOut
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on
/// cancellation.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
