//! Webhook receiver for verifying incoming webhooks.
//!
//! Subscribers written in Rust can use this to check the
//! `X-Webhook-Signature` header and decode the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WebhookError, WebhookResult};
use crate::signature::WebhookSigner;

/// Decoded body of a delivered webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    /// Event type, e.g. `dataset.published`.
    pub event: String,
    /// Entity kind the event is about.
    pub entity_type: String,
    /// Entity ID, if the event carried one.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
    /// Event payload.
    pub data: Value,
}

/// Webhook receiver for verifying incoming webhooks.
pub struct WebhookReceiver {
    signer: WebhookSigner,
}

impl WebhookReceiver {
    /// Creates a receiver for the subscription secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            signer: WebhookSigner::new(secret),
        }
    }

    /// Verifies the signature and parses the envelope.
    pub fn verify(&self, signature: &str, body: &[u8]) -> WebhookResult<WebhookEnvelope> {
        self.verify_signature(signature, body)?;
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// Verifies only the signature.
    pub fn verify_signature(&self, signature: &str, body: &[u8]) -> WebhookResult<()> {
        if self.signer.verify(body, signature.trim()) {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }
}
