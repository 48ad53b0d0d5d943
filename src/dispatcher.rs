//! Background delivery of due messages.
//!
//! The dispatcher is a polling loop: every `poll_interval` it pulls a bounded
//! batch of due messages from the store, hands each one to the [`Notifier`],
//! and records the outcome. Polling means nothing is lost across restarts;
//! pending rows simply wait for the next poll.
//!
//! Only one dispatcher per database is assumed. Two dispatchers polling the
//! same store can both pick up a message before either records the outcome,
//! which delivers it twice.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::FutureExt as _;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::Error,
    message::{Message, MessageStatus},
    notifier::Notifier,
    retry::{Outcome, RetryPolicy},
    store::Store,
    worker::{sleep_or_cancel, Shutdown, Supervisor},
};

/// Tally of one dispatch iteration.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    /// Failed but still pending.
    pub retried: usize,
    /// Failed and out of attempts.
    pub failed: usize,
    /// Outcomes that could not be written back; these rows are picked up again
    /// on a later poll.
    pub errors: usize,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.sent + self.retried + self.failed + self.errors
    }
}

struct Inner {
    store: Store,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    batch_limit: u32,
    send_timeout: Duration,
    poll_interval: Duration,
    error_backoff: Duration,
}

pub struct Dispatcher {
    inner: Arc<Inner>,
    supervisor: Supervisor,
}

impl Dispatcher {
    pub fn new(store: Store, notifier: impl Notifier, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                notifier: Arc::new(notifier),
                policy: config.retry_policy(),
                batch_limit: config.batch_limit,
                send_timeout: config.send_timeout(),
                poll_interval: config.poll_interval(),
                error_backoff: config.error_backoff(),
            }),
            supervisor: Supervisor::new("dispatcher", config.stop_timeout()),
        }
    }

    /// Start the polling loop. A second call while running only logs a
    /// warning and returns `false`.
    pub async fn start(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.supervisor.start(move |token| inner.run(token)).await
    }

    /// Ask the loop to exit after its current iteration and wait for it.
    pub async fn stop(&self) -> Shutdown {
        self.supervisor.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    /// Run a single iteration: fetch one batch of due messages and attempt
    /// each. Fails only when the batch itself cannot be fetched.
    pub async fn run_once(&self) -> Result<BatchReport, Error> {
        self.inner.run_once().await
    }
}

impl Inner {
    async fn run(self: Arc<Self>, token: CancellationToken) {
        tracing::info!(
            poll_interval = ?self.poll_interval,
            batch_limit = self.batch_limit,
            "Dispatcher loop started"
        );

        while !token.is_cancelled() {
            let pause = match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                Ok(Ok(report)) => {
                    if report.processed() > 0 {
                        tracing::info!(
                            sent = report.sent,
                            retried = report.retried,
                            failed = report.failed,
                            errors = report.errors,
                            "Dispatched batch"
                        );
                    }
                    self.poll_interval
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, backoff = ?self.error_backoff, "Dispatch iteration failed");
                    self.error_backoff
                }
                Err(panic) => {
                    tracing::error!(
                        panic = panic_message(&*panic),
                        backoff = ?self.error_backoff,
                        "Dispatch iteration panicked"
                    );
                    self.error_backoff
                }
            };

            if !sleep_or_cancel(&token, pause).await {
                break;
            }
        }

        tracing::info!("Dispatcher loop exited");
    }

    async fn run_once(&self) -> Result<BatchReport, Error> {
        let batch = self.store.fetch_due(Utc::now(), self.batch_limit).await?;

        let mut report = BatchReport::default();

        for message in &batch {
            self.dispatch(message, &mut report).await;
        }

        Ok(report)
    }

    async fn dispatch(&self, message: &Message, report: &mut BatchReport) {
        let failure = match self.attempt(message).await {
            Ok(()) => {
                match self.store.mark_sent(message.id, Utc::now()).await {
                    Ok(()) => {
                        report.sent += 1;
                        tracing::debug!(message_id = message.id, kind = %message.kind, "Message sent");
                    }
                    Err(e) => {
                        report.errors += 1;
                        tracing::error!(
                            message_id = message.id,
                            error = %e,
                            "Delivered message could not be marked sent"
                        );
                    }
                }
                return;
            }
            Err(failure) => failure,
        };

        let attempts = message.attempts + 1;
        let retry_at = match self.policy.outcome(attempts, message.max_attempts, Utc::now()) {
            Outcome::Retry { retry_at } => retry_at,
            Outcome::Fail => None,
        };

        match self
            .store
            .mark_retry_or_failed(message.id, attempts, &failure, retry_at)
            .await
        {
            Ok(MessageStatus::Pending) => {
                report.retried += 1;
                tracing::warn!(
                    message_id = message.id,
                    kind = %message.kind,
                    attempts,
                    max_attempts = message.max_attempts,
                    error = %failure,
                    "Delivery failed, will retry"
                );
            }
            Ok(MessageStatus::Failed) => {
                report.failed += 1;
                tracing::error!(
                    message_id = message.id,
                    kind = %message.kind,
                    attempts,
                    error = %failure,
                    "Delivery failed permanently"
                );
            }
            Ok(MessageStatus::Sent) => {
                tracing::debug!(message_id = message.id, "Message was already sent");
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(
                    message_id = message.id,
                    error = %e,
                    delivery_error = %failure,
                    "Failed delivery could not be recorded"
                );
            }
        }
    }

    /// One bounded call into the notifier. Declines, errors, timeouts and
    /// panics all come back as a failure reason.
    async fn attempt(&self, message: &Message) -> Result<(), String> {
        let call = AssertUnwindSafe(self.notifier.send(message)).catch_unwind();

        match tokio::time::timeout(self.send_timeout, call).await {
            Ok(Ok(Ok(true))) => Ok(()),
            Ok(Ok(Ok(false))) => Err("notifier declined delivery".to_owned()),
            Ok(Ok(Err(e))) => Err(format!("{e:#}")),
            Ok(Err(panic)) => Err(format!("notifier panicked: {}", panic_message(&*panic))),
            Err(_) => Err(format!("delivery timed out after {:?}", self.send_timeout)),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
