use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    dispatcher::Dispatcher,
    error::Error,
    message::{Message, NewMessage, StatusSummary},
    notifier::Notifier,
    payload::{OrderSummary, Payload},
    store::Store,
};

/// The queue as seen by the rest of the application.
///
/// Built once at startup and shared (behind `Arc` or `web::Data`) between
/// request handlers, which enqueue, and the background workers.
pub struct Service {
    store: Store,
    config: Config,
}

impl Service {
    pub async fn connect() -> Result<Self, Error> {
        Self::connect_with(Config::default()).await
    }

    pub async fn connect_with(config: Config) -> Result<Self, Error> {
        let store = Store::connect(config.db_path()).await?;

        tracing::debug!(db_path = config.db_path().unwrap_or(":memory:"), "Connected to store");

        Ok(Self { store, config })
    }

    pub fn db(&self) -> &SqlitePool {
        self.store.pool()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A dispatcher over this service's store. It is not started.
    pub fn dispatcher(&self, notifier: impl Notifier) -> Dispatcher {
        Dispatcher::new(self.store.clone(), notifier, &self.config)
    }

    /// Durably queue a message and return its id. Delivery happens later, on
    /// the dispatcher.
    pub async fn enqueue(&self, mut message: NewMessage) -> Result<i64, Error> {
        message.max_attempts.get_or_insert(self.config.max_attempts);

        let id = self.store.insert(&message, Utc::now()).await?;

        tracing::info!(
            message_id = id,
            kind = %message.kind,
            delay = ?message.delay,
            "Message enqueued"
        );

        Ok(id)
    }

    pub async fn enqueue_payload(
        &self,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        payload: &Payload,
        delay: Duration,
    ) -> Result<i64, Error> {
        let (kind, body) = payload.encode()?;

        self.enqueue(
            NewMessage::builder()
                .kind(kind)
                .recipient(recipient)
                .subject(subject)
                .payload(body)
                .delay(delay)
                .build(),
        )
        .await
    }

    /// Queue the customer confirmation and the admin alert for a new order,
    /// both due after `delay`. Returns the two message ids in that order.
    pub async fn notify_order_placed(
        &self,
        order: &OrderSummary,
        delay: Duration,
    ) -> Result<(i64, i64), Error> {
        let confirmation = self
            .enqueue_payload(
                &order.customer_email,
                format!("Order confirmation - {}", order.order_number),
                &order.confirmation(),
                delay,
            )
            .await?;

        let alert = self
            .enqueue_payload(
                &self.config.admin_email,
                format!("New order - {}", order.order_number),
                &order.admin_alert(&self.config.admin_email),
                delay,
            )
            .await?;

        Ok((confirmation, alert))
    }

    pub async fn message(&self, id: i64) -> Result<Message, Error> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::message_not_found(id))
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, Error> {
        Ok(StatusSummary::from(&self.store.count_by_status().await?))
    }

    /// Delete sent messages older than `older_than_days` and return how many
    /// were removed.
    pub async fn cleanup(&self, older_than_days: u32) -> Result<u64, Error> {
        let cutoff = chrono::Duration::try_days(i64::from(older_than_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| Error::invalid_parameter("retention window out of range"))?;

        let deleted = self.store.delete_sent_older_than(cutoff).await?;

        tracing::info!(deleted, older_than_days, "Cleaned up sent messages");

        Ok(deleted)
    }
}
