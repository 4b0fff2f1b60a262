//! Webhook engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WebhookError, WebhookResult};
use crate::retry::BackoffSchedule;

/// Upper bound for `log_retention_days`, roughly a century.
pub const MAX_LOG_RETENTION_DAYS: u32 = 36_500;

/// Webhook engine configuration.
///
/// Backoff, timeout and attempt budget are tunables, not a compatibility
/// contract with subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Number of delivery workers.
    pub worker_count: usize,
    /// Capacity of the pending job queue.
    pub queue_capacity: usize,
    /// Maximum attempts per job, including the first.
    pub max_attempts: u32,
    /// Delays between attempts, in seconds.
    pub retry_delays_secs: Vec<u64>,
    /// Per-attempt request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum bytes of response body kept on an attempt row.
    pub response_body_limit: usize,
    /// User-Agent header sent to subscribers.
    pub user_agent: String,
    /// Delete attempts older than this many days, if set.
    pub log_retention_days: Option<u32>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            max_attempts: 5,
            retry_delays_secs: vec![1, 5, 30, 300],
            request_timeout_ms: 5000,
            response_body_limit: 2048,
            user_agent: concat!("portal-webhooks/", env!("CARGO_PKG_VERSION")).to_string(),
            log_retention_days: None,
        }
    }
}

impl WebhookConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the maximum attempts.
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the retry delays in seconds.
    pub fn retry_delays_secs(mut self, delays: impl IntoIterator<Item = u64>) -> Self {
        self.retry_delays_secs = delays.into_iter().collect();
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Sets the stored response body limit.
    pub fn response_body_limit(mut self, bytes: usize) -> Self {
        self.response_body_limit = bytes;
        self
    }

    /// Enables log retention.
    pub fn log_retention_days(mut self, days: u32) -> Self {
        self.log_retention_days = Some(days);
        self
    }

    /// Per-attempt request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff schedule described by this configuration.
    pub fn backoff(&self) -> BackoffSchedule {
        BackoffSchedule::new()
            .delays(self.retry_delays_secs.iter().map(|s| Duration::from_secs(*s)))
            .max_attempts(self.max_attempts)
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> WebhookResult<()> {
        if self.worker_count == 0 {
            return Err(WebhookError::Config("worker_count must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(WebhookError::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(WebhookError::Config("max_attempts must be at least 1".into()));
        }
        if self.max_attempts > 1 && self.retry_delays_secs.is_empty() {
            return Err(WebhookError::Config(
                "retry_delays_secs must not be empty when retries are enabled".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(WebhookError::Config("request_timeout_ms must be positive".into()));
        }
        if let Some(days) = self.log_retention_days {
            if days == 0 || days > MAX_LOG_RETENTION_DAYS {
                return Err(WebhookError::Config(format!(
                    "log_retention_days must be between 1 and {}",
                    MAX_LOG_RETENTION_DAYS
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WebhookConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.backoff(), BackoffSchedule::new());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(WebhookConfig::new().worker_count(0).validate().is_err());
        assert!(WebhookConfig::new().max_attempts(0).validate().is_err());
        assert!(WebhookConfig::new().retry_delays_secs([]).validate().is_err());
        assert!(WebhookConfig::new()
            .retry_delays_secs([])
            .max_attempts(1)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_retention_bounds() {
        assert!(WebhookConfig::new().log_retention_days(0).validate().is_err());
        assert!(WebhookConfig::new().log_retention_days(30).validate().is_ok());
        assert!(WebhookConfig::new()
            .log_retention_days(MAX_LOG_RETENTION_DAYS)
            .validate()
            .is_ok());
        assert!(WebhookConfig::new()
            .log_retention_days(100_000_000)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_deserialization() {
        let config: WebhookConfig = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.worker_count, 4);
    }
}
