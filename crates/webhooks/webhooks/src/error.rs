//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for registry, admin and storage operations.
///
/// These are the only failures a caller of the engine can observe; delivery
/// problems are recorded as attempts instead (see [`DeliveryError`]).
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Invalid subscription input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subscription or log entry not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Incoming webhook signature did not match.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Incoming webhook body could not be parsed.
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// The delivery scheduler has been shut down.
    #[error("Webhook scheduler is shut down")]
    Shutdown,
}

impl WebhookError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        WebhookError::Validation(message.into())
    }

    /// Shorthand for a missing subscription.
    pub fn subscription_not_found(id: &str) -> Self {
        WebhookError::NotFound(format!("subscription {}", id))
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Serialization(err.to_string())
    }
}

impl From<portal_events::EventError> for WebhookError {
    fn from(err: portal_events::EventError) -> Self {
        WebhookError::Serialization(err.to_string())
    }
}

/// Failure of a single delivery attempt.
///
/// Internal to the delivery pipeline: recorded on the attempt row and used to
/// drive retry decisions, never surfaced to producers or admin callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber did not answer within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The subscriber answered with a non-2xx status.
    #[error("HTTP {0}")]
    HttpStatus(u16),

    /// DNS, connection or transport level failure.
    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else if let Some(status) = err.status() {
            DeliveryError::HttpStatus(status.as_u16())
        } else {
            DeliveryError::Network(err.to_string())
        }
    }
}
