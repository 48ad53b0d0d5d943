use std::time::Duration;

use serde::Deserialize;

use crate::retry::{Backoff, RetryPolicy};

/// Runtime configuration, read from `MAILROOM_*` environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::db_path")]
    pub db_path: String,

    #[serde(default = "defaults::bind")]
    pub bind: String,

    /// Seconds between dispatcher polls after a clean iteration.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait after a loop-level failure.
    #[serde(default = "defaults::error_backoff_secs")]
    pub error_backoff_secs: u64,

    #[serde(default = "defaults::batch_limit")]
    pub batch_limit: u32,

    /// Upper bound on a single notifier call.
    #[serde(default = "defaults::send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// How long `stop()` waits for a worker to exit.
    #[serde(default = "defaults::stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Attempt ceiling given to new messages.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay. Zero keeps failed messages immediately due.
    #[serde(default)]
    pub retry_base_secs: u64,

    #[serde(default = "defaults::retry_max_secs")]
    pub retry_max_secs: u64,

    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,

    #[serde(default = "defaults::cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Recipient of new-order alerts.
    #[serde(default = "defaults::admin_email")]
    pub admin_email: String,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("MAILROOM_").from_env::<Self>()?)
    }

    /// `None` means the database lives in memory.
    pub fn db_path(&self) -> Option<&str> {
        match self.db_path.as_str() {
            "" | ":memory:" => None,
            path => Some(path),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.retry_base_secs == 0 {
            Backoff::Immediate
        } else {
            Backoff::Exponential {
                base: Duration::from_secs(self.retry_base_secs),
                max: Duration::from_secs(self.retry_max_secs.max(self.retry_base_secs)),
            }
        };

        RetryPolicy::new(backoff)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: defaults::db_path(),
            bind: defaults::bind(),
            poll_interval_secs: defaults::poll_interval_secs(),
            error_backoff_secs: defaults::error_backoff_secs(),
            batch_limit: defaults::batch_limit(),
            send_timeout_secs: defaults::send_timeout_secs(),
            stop_timeout_secs: defaults::stop_timeout_secs(),
            max_attempts: defaults::max_attempts(),
            retry_base_secs: 0,
            retry_max_secs: defaults::retry_max_secs(),
            retention_days: defaults::retention_days(),
            cleanup_interval_secs: defaults::cleanup_interval_secs(),
            admin_email: defaults::admin_email(),
        }
    }
}

mod defaults {
    pub fn db_path() -> String {
        "mailroom.db".to_owned()
    }

    pub fn bind() -> String {
        "127.0.0.1:8080".to_owned()
    }

    pub const fn poll_interval_secs() -> u64 {
        30
    }

    pub const fn error_backoff_secs() -> u64 {
        60
    }

    pub const fn batch_limit() -> u32 {
        10
    }

    pub const fn send_timeout_secs() -> u64 {
        30
    }

    pub const fn stop_timeout_secs() -> u64 {
        10
    }

    pub const fn max_attempts() -> u32 {
        crate::message::DEFAULT_MAX_ATTEMPTS
    }

    pub const fn retry_max_secs() -> u64 {
        3600
    }

    pub const fn retention_days() -> u32 {
        30
    }

    pub const fn cleanup_interval_secs() -> u64 {
        86400
    }

    pub fn admin_email() -> String {
        "admin@localhost".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.db_path(), Some("mailroom.db"));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.error_backoff(), Duration::from_secs(60));
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.retry_policy().backoff(), Backoff::Immediate);
    }

    #[test]
    fn memory_path_disables_file() {
        let config = Config {
            db_path: ":memory:".to_owned(),
            ..Config::default()
        };

        assert_eq!(config.db_path(), None);
    }

    #[test]
    fn retry_base_enables_exponential_backoff() {
        let config = Config {
            retry_base_secs: 120,
            retry_max_secs: 60,
            ..Config::default()
        };

        assert_eq!(
            config.retry_policy().backoff(),
            Backoff::Exponential {
                base: Duration::from_secs(120),
                max: Duration::from_secs(120),
            }
        );
    }
}
