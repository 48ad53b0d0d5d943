//! The delivery seam between the queue and whatever transport sends
//! notifications.
//!
//! Delivery is at-least-once: a notifier can see the same message more than
//! once (for example when the process dies between a successful send and the
//! status update), so implementations must tolerate duplicates.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::{message::Message, payload::Payload};

/// Core trait for notification transports.
///
/// `send` resolves to:
/// - `Ok(true)` when the notification was delivered
/// - `Ok(false)` when the transport declined it
/// - `Err(_)` when the transport failed
///
/// Declines and errors both consume one attempt from the message's budget.
/// The dispatcher bounds each call with a timeout, so implementations need
/// not enforce one themselves.
pub trait Notifier: Send + Sync + 'static {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, eyre::Result<bool>>;
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, eyre::Result<bool>> {
        (**self).send(message)
    }
}

/// A notifier that records deliveries in the log instead of sending them.
///
/// Known payload kinds are decoded so the log shows what would have gone
/// out; an undecodable payload is reported as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, eyre::Result<bool>> {
        Box::pin(async move {
            let payload = Payload::decode(&message.kind, &message.payload)?;

            match payload {
                Payload::OrderConfirmation(order) => tracing::info!(
                    message_id = message.id,
                    recipient = %message.recipient,
                    order_number = %order.order_number,
                    customer = %order.customer_name,
                    "Order confirmation delivered"
                ),
                Payload::AdminNotification(order) => tracing::info!(
                    message_id = message.id,
                    recipient = %message.recipient,
                    order_number = %order.order_number,
                    "Admin order alert delivered"
                ),
            }

            Result::<_, eyre::Report>::Ok(true)
        })
    }
}
