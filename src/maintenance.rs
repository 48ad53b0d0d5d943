//! Scheduled retention cleanup, independent of the dispatcher.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    service::Service,
    worker::{sleep_or_cancel, Shutdown, Supervisor},
};

/// Periodically deletes sent messages older than the retention window.
pub struct Janitor {
    service: Arc<Service>,
    retention_days: u32,
    interval: Duration,
    supervisor: Supervisor,
}

impl Janitor {
    pub fn new(service: Arc<Service>, config: &Config) -> Self {
        Self {
            service,
            retention_days: config.retention_days,
            interval: config.cleanup_interval(),
            supervisor: Supervisor::new("janitor", config.stop_timeout()),
        }
    }

    pub async fn start(&self) -> bool {
        let service = Arc::clone(&self.service);
        let retention_days = self.retention_days;
        let interval = self.interval;

        self.supervisor
            .start(move |token| run(service, retention_days, interval, token))
            .await
    }

    pub async fn stop(&self) -> Shutdown {
        self.supervisor.stop().await
    }
}

async fn run(
    service: Arc<Service>,
    retention_days: u32,
    interval: Duration,
    token: CancellationToken,
) {
    // First pass runs right away so a restarted process catches up.
    loop {
        if let Err(e) = service.cleanup(retention_days).await {
            tracing::error!(error = %e, "Retention cleanup failed");
        }

        if !sleep_or_cancel(&token, interval).await {
            break;
        }
    }
}
