//! SQLite-backed durable store for queued messages.
//!
//! The store is the only state shared between producers and the dispatcher.
//! Each operation is a single statement, so SQLite's write serialization is
//! what keeps inserts, due-queries and status updates atomic with respect to
//! each other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    SqlitePool,
};
use tokio_stream::StreamExt;

use crate::{
    error::Error,
    message::{to_millis, Message, MessageStatus, NewMessage, DEFAULT_MAX_ATTEMPTS},
};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database and bring its schema up to date.
    ///
    /// `None` opens a private in-memory database, which lives as long as the
    /// returned store.
    pub async fn connect(path: Option<&str>) -> Result<Self, Error> {
        let opts = if let Some(path) = path {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new().in_memory(true)
        }
        .journal_mode(SqliteJournalMode::Wal)
        .locking_mode(SqliteLockingMode::Normal)
        .optimize_on_close(true, None)
        .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = match path {
            Some(_) => SqlitePoolOptions::new(),
            // Every in-memory connection is a separate database, so pin to one.
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
        .connect_with(opts)
        .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a new pending message and return its id.
    pub async fn insert(&self, message: &NewMessage, now: DateTime<Utc>) -> Result<i64, Error> {
        let max_attempts = message.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(Error::invalid_parameter("max_attempts must be at least 1"));
        }

        let scheduled_at = chrono::Duration::from_std(message.delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| Error::invalid_parameter("delay out of range"))?;

        let id: i64 = sqlx::query_scalar(
            "
            INSERT INTO messages
                (kind, recipient, subject, payload, status, attempts, max_attempts, created_at, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(&message.kind)
        .bind(&message.recipient)
        .bind(&message.subject)
        .bind(&message.payload)
        .bind(MessageStatus::Pending)
        .bind(i64::from(max_attempts))
        .bind(to_millis(now))
        .bind(to_millis(scheduled_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>, Error> {
        let message = sqlx::query_as("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    /// Up to `limit` due messages, oldest `scheduled_at` first.
    pub async fn fetch_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Message>, Error> {
        let messages = sqlx::query_as(
            "
            SELECT * FROM messages
            WHERE status = $1
                AND scheduled_at <= $2
                AND attempts < max_attempts
            ORDER BY scheduled_at ASC, id ASC
            LIMIT $3
            ",
        )
        .bind(MessageStatus::Pending)
        .bind(to_millis(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Record a successful delivery.
    ///
    /// Only a pending message transitions; calling this again on a sent
    /// message is a no-op, so `sent_at` keeps its first value.
    pub async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), Error> {
        let updated = sqlx::query(
            "
            UPDATE messages
            SET status = $2,
                sent_at = $3,
                attempts = MIN(attempts + 1, max_attempts)
            WHERE id = $1 AND status = $4
            ",
        )
        .bind(id)
        .bind(MessageStatus::Sent)
        .bind(to_millis(now))
        .bind(MessageStatus::Pending)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            self.ensure_exists(id).await?;
        }

        Ok(())
    }

    /// Record a failed delivery that brought the message to `new_attempts`.
    ///
    /// Below the message's own `max_attempts` it stays pending, optionally
    /// pushed back to `retry_at`; otherwise it becomes failed. Terminal
    /// messages are left alone.
    pub async fn mark_retry_or_failed(
        &self,
        id: i64,
        new_attempts: u32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<MessageStatus, Error> {
        let status: Option<MessageStatus> = sqlx::query_scalar(
            "
            UPDATE messages
            SET attempts = MIN($2, max_attempts),
                error_message = $3,
                status = CASE WHEN $2 >= max_attempts THEN $4 ELSE $5 END,
                scheduled_at = CASE
                    WHEN $2 < max_attempts AND $6 IS NOT NULL THEN $6
                    ELSE scheduled_at
                END
            WHERE id = $1 AND status = $5
            RETURNING status
            ",
        )
        .bind(id)
        .bind(i64::from(new_attempts))
        .bind(error)
        .bind(MessageStatus::Failed)
        .bind(MessageStatus::Pending)
        .bind(retry_at.map(to_millis))
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(status) => Ok(status),
            None => self.current_status(id).await,
        }
    }

    pub async fn count_by_status(&self) -> Result<HashMap<MessageStatus, u64>, Error> {
        let mut rows = sqlx::query_as::<_, (MessageStatus, i64)>(
            "SELECT status, COUNT(*) FROM messages GROUP BY status",
        )
        .fetch(&self.pool);

        let mut counts = HashMap::new();

        while let Some((status, count)) = rows.next().await.transpose()? {
            counts.insert(status, u64::try_from(count).unwrap_or_default());
        }

        Ok(counts)
    }

    /// Delete sent messages delivered before `cutoff`. Pending and failed
    /// messages are never touched.
    pub async fn delete_sent_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let deleted = sqlx::query("DELETE FROM messages WHERE status = $1 AND sent_at < $2")
            .bind(MessageStatus::Sent)
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    async fn current_status(&self, id: i64) -> Result<MessageStatus, Error> {
        sqlx::query_scalar("SELECT status FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::message_not_found(id))
    }

    async fn ensure_exists(&self, id: i64) -> Result<(), Error> {
        self.current_status(id).await.map(|_| ())
    }
}
