//! Typed notification payloads.
//!
//! On disk a payload is split in two: the `kind` column carries the variant
//! tag and the `payload` column carries the JSON-encoded variant body. The
//! queue never looks inside; notifiers call [`Payload::decode`].

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{Error, PayloadSnafu};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub order_id: i64,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminNotification {
    pub order_id: i64,
    pub order_number: String,
    pub admin_email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Payload {
    OrderConfirmation(OrderConfirmation),
    AdminNotification(AdminNotification),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Split into the stored `(kind, body)` pair.
    pub fn encode(&self) -> Result<(&'static str, Vec<u8>), Error> {
        let kind = self.kind();
        let body = match self {
            Self::OrderConfirmation(data) => serde_json::to_vec(data),
            Self::AdminNotification(data) => serde_json::to_vec(data),
        }
        .context(PayloadSnafu { kind })?;

        Ok((kind, body))
    }

    /// Rebuild a payload from its stored `(kind, body)` pair.
    pub fn decode(kind: &str, body: &[u8]) -> Result<Self, Error> {
        let data: serde_json::Value = serde_json::from_slice(body).context(PayloadSnafu { kind })?;

        serde_json::from_value(serde_json::json!({ "kind": kind, "data": data }))
            .context(PayloadSnafu { kind })
    }
}

/// The slice of an order that notifications need.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OrderSummary {
    pub id: i64,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
}

impl OrderSummary {
    pub fn confirmation(&self) -> Payload {
        Payload::OrderConfirmation(OrderConfirmation {
            order_id: self.id,
            order_number: self.order_number.clone(),
            customer_email: self.customer_email.clone(),
            customer_name: self.customer_name.clone(),
        })
    }

    pub fn admin_alert(&self, admin_email: impl Into<String>) -> Payload {
        Payload::AdminNotification(AdminNotification {
            order_id: self.id,
            order_number: self.order_number.clone(),
            admin_email: admin_email.into(),
        })
    }
}
