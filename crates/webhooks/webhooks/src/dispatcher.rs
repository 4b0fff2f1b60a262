//! Single delivery attempts.
//!
//! The [`Dispatcher`] serializes the event, signs the bytes, POSTs them
//! through a [`WebhookTransport`] and records exactly one attempt row per
//! call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::WebhookConfig;
use crate::delivery::{DeliveryAttempt, DeliveryJob, encode_envelope, truncate_body};
use crate::error::{DeliveryError, WebhookError, WebhookResult};
use crate::log_store::DeliveryLogStore;
use crate::signature::{
    ATTEMPT_HEADER, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, WebhookSigner,
};
use crate::subscription::Subscription;

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Signed body bytes.
    pub body: Vec<u8>,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum response bytes worth reading.
    pub response_limit: usize,
}

impl OutboundRequest {
    /// Looks a header up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly cut at the request's response limit.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network seam used by the dispatcher.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Sends one POST request.
    ///
    /// Non-2xx answers are `Ok`; only transport-level problems are errors.
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, DeliveryError>;
}

/// `reqwest` backed transport.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given User-Agent.
    pub fn new(user_agent: &str) -> WebhookResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| WebhookError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, DeliveryError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body.clone());

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();

        // Read only as much of the body as will be stored.
        let mut body = Vec::new();
        while body.len() < request.response_limit {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                // The status is what matters; keep what was read.
                Err(_) => break,
            }
        }

        Ok(TransportResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Success(DeliveryAttempt),
    /// Failed, but the job has attempts left.
    RetryableFailure(DeliveryAttempt, DeliveryError),
    /// Failed on the last attempt of the budget.
    TerminalFailure(DeliveryAttempt, DeliveryError),
}

impl DeliveryOutcome {
    /// The attempt row written for this outcome.
    pub fn attempt(&self) -> &DeliveryAttempt {
        match self {
            DeliveryOutcome::Success(attempt)
            | DeliveryOutcome::RetryableFailure(attempt, _)
            | DeliveryOutcome::TerminalFailure(attempt, _) => attempt,
        }
    }
}

/// Performs single delivery attempts.
pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    logs: DeliveryLogStore,
    timeout: Duration,
    response_body_limit: usize,
    user_agent: String,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        config: &WebhookConfig,
        transport: Arc<dyn WebhookTransport>,
        logs: DeliveryLogStore,
    ) -> Self {
        Self {
            transport,
            logs,
            timeout: config.request_timeout(),
            response_body_limit: config.response_body_limit,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Makes attempt `job.attempt` of `job` against `subscription`.
    ///
    /// Never fails: every problem becomes a failed outcome with its attempt
    /// row already logged.
    pub async fn deliver(&self, subscription: &Subscription, job: &DeliveryJob) -> DeliveryOutcome {
        let body = match encode_envelope(&job.event) {
            Ok(body) => body,
            Err(e) => {
                // Cannot be fixed by retrying.
                let error = DeliveryError::Network(format!("failed to encode payload: {}", e));
                let attempt = DeliveryAttempt::failure(job, String::new(), &error, None, 0);
                self.log(&attempt).await;
                return DeliveryOutcome::TerminalFailure(attempt, error);
            }
        };
        let payload = String::from_utf8_lossy(&body).into_owned();

        let request = self.build_request(subscription, job, body);
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (attempt, error) = match result {
            Ok(response) if response.is_success() => {
                let body = self.truncate(&response.body);
                (
                    DeliveryAttempt::success(job, payload, response.status, body, response_time_ms),
                    None,
                )
            }
            Ok(response) => {
                let error = DeliveryError::HttpStatus(response.status);
                let body = self.truncate(&response.body);
                (
                    DeliveryAttempt::failure(job, payload, &error, body, response_time_ms),
                    Some(error),
                )
            }
            Err(error) => (
                DeliveryAttempt::failure(job, payload, &error, None, response_time_ms),
                Some(error),
            ),
        };

        self.log(&attempt).await;

        match error {
            None => {
                tracing::debug!(
                    job_id = %job.id,
                    subscription_id = %subscription.id,
                    attempt = job.attempt,
                    response_time_ms,
                    "Webhook delivered"
                );
                DeliveryOutcome::Success(attempt)
            }
            Some(error) => {
                tracing::warn!(
                    job_id = %job.id,
                    subscription_id = %subscription.id,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    "Webhook delivery failed: {}",
                    error
                );
                if job.is_last_attempt() {
                    DeliveryOutcome::TerminalFailure(attempt, error)
                } else {
                    DeliveryOutcome::RetryableFailure(attempt, error)
                }
            }
        }
    }

    fn build_request(
        &self,
        subscription: &Subscription,
        job: &DeliveryJob,
        body: Vec<u8>,
    ) -> OutboundRequest {
        // Signed last, over the exact bytes that go on the wire.
        let signature = WebhookSigner::new(&subscription.secret).sign(&body);

        OutboundRequest {
            url: subscription.url.clone(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), self.user_agent.clone()),
                (EVENT_HEADER.to_string(), job.event.event_type.clone()),
                (DELIVERY_HEADER.to_string(), job.idempotency_key.clone()),
                (ATTEMPT_HEADER.to_string(), job.attempt.to_string()),
                (SIGNATURE_HEADER.to_string(), signature),
            ],
            body,
            timeout: self.timeout,
            response_limit: self.response_body_limit,
        }
    }

    fn truncate(&self, body: &str) -> Option<String> {
        if body.is_empty() {
            None
        } else {
            Some(truncate_body(body, self.response_body_limit))
        }
    }

    async fn log(&self, attempt: &DeliveryAttempt) {
        if let Err(e) = self.logs.record_attempt(attempt).await {
            tracing::warn!(
                attempt_id = %attempt.id,
                subscription_id = %attempt.subscription_id,
                "Failed to record delivery attempt: {}",
                e
            );
        }
    }
}
