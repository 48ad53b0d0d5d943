//! Message types and status management for the dispatch queue.
//!
//! A message is one queued notification. It moves through a small state
//! machine driven by the dispatcher:
//!
//! 1. Messages are created in `Pending` status with zero attempts
//! 2. A successful delivery moves them to `Sent`
//! 3. A failed delivery either leaves them `Pending` for another try, or moves
//!    them to `Failed` once the attempt budget is spent
//!
//! `Sent` and `Failed` are terminal.

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

/// Attempt ceiling for messages that do not set their own.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Current status of a message.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting for a delivery attempt.
    Pending,
    /// Delivered. Terminal.
    Sent,
    /// Attempt budget exhausted. Terminal.
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A persisted message row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    /// Discriminates how `payload` is interpreted.
    pub kind: String,
    pub recipient: String,
    pub subject: String,
    /// Opaque to the queue; decoded by the notifier according to `kind`.
    pub payload: Vec<u8>,
    pub status: MessageStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the message may be dispatched.
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failed attempt.
    pub error_message: Option<String>,
}

impl Message {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Pending
            && self.scheduled_at <= now
            && self.attempts < self.max_attempts
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(column: &str, millis: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_owned(),
        source: format!("timestamp {millis} out of range").into(),
    })
}

fn to_count(column: &str, value: i64) -> Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_owned(),
        source: Box::new(e),
    })
}

impl FromRow<'_, SqliteRow> for Message {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let sent_at = row
            .try_get::<Option<i64>, _>("sent_at")?
            .map(|ms| from_millis("sent_at", ms))
            .transpose()?;

        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            recipient: row.try_get("recipient")?,
            subject: row.try_get("subject")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempts: to_count("attempts", row.try_get("attempts")?)?,
            max_attempts: to_count("max_attempts", row.try_get("max_attempts")?)?,
            created_at: from_millis("created_at", row.try_get("created_at")?)?,
            scheduled_at: from_millis("scheduled_at", row.try_get("scheduled_at")?)?,
            sent_at,
            error_message: row.try_get("error_message")?,
        })
    }
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, bon::Builder)]
pub struct NewMessage {
    #[builder(into)]
    pub kind: String,
    #[builder(into)]
    pub recipient: String,
    #[builder(into)]
    pub subject: String,
    #[builder(into)]
    pub payload: Vec<u8>,
    /// Offset from enqueue time before the message becomes due.
    #[builder(default)]
    pub delay: Duration,
    /// Falls back to the service default when unset.
    pub max_attempts: Option<u32>,
}

/// Per-status message counts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
}

impl From<&HashMap<MessageStatus, u64>> for StatusSummary {
    fn from(counts: &HashMap<MessageStatus, u64>) -> Self {
        let get = |status| counts.get(&status).copied().unwrap_or(0);

        Self {
            pending: get(MessageStatus::Pending),
            sent: get(MessageStatus::Sent),
            failed: get(MessageStatus::Failed),
            total: counts.values().sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_text_matches_stored_form() {
        assert_eq!(MessageStatus::Pending.to_string(), "pending");
        assert_eq!(MessageStatus::from_str("failed").unwrap(), MessageStatus::Failed);
        assert!(MessageStatus::Sent.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
    }

    #[test]
    fn summary_totals_all_statuses() {
        let counts = HashMap::from([(MessageStatus::Pending, 2), (MessageStatus::Failed, 1)]);

        assert_eq!(
            StatusSummary::from(&counts),
            StatusSummary {
                pending: 2,
                sent: 0,
                failed: 1,
                total: 3,
            }
        );
    }
}
