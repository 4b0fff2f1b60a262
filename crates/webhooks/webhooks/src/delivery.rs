//! Delivery jobs, attempt records and the outbound envelope.

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use portal_events::{DomainEvent, EventPayload, JSON_CONTENT_TYPE};

use crate::error::{DeliveryError, WebhookResult};

/// One logical notification of one event to one subscription.
///
/// A job may span several attempts; it is persisted while pending so it can
/// be recovered after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Job ID.
    pub id: String,
    /// Key sent to the subscriber so it can de-duplicate redeliveries.
    pub idempotency_key: String,
    /// Target subscription.
    pub subscription_id: String,
    /// Event being delivered.
    pub event: DomainEvent,
    /// Number of the current (or next) attempt, starting at 1.
    pub attempt: u32,
    /// Maximum attempts.
    pub max_attempts: u32,
    /// Current state.
    pub state: JobState,
    /// When the next attempt is due.
    pub next_attempt_at: DateTime<Utc>,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Delivery job state machine.
///
/// `Pending -> InFlight -> {Succeeded | RetryScheduled -> Pending | TerminalFailure}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Pending,
    /// An attempt is being made.
    InFlight,
    /// Waiting for its backoff delay to elapse.
    RetryScheduled,
    /// Delivered with a 2xx response.
    Succeeded,
    /// Attempt budget exhausted.
    TerminalFailure,
}

impl DeliveryJob {
    /// Creates a new job for a subscription and event.
    pub fn new(subscription_id: impl Into<String>, event: DomainEvent, max_attempts: u32) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        Self {
            idempotency_key: id.clone(),
            id,
            subscription_id: subscription_id.into(),
            event,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            state: JobState::Pending,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
        }
    }

    /// Reuses the idempotency key of an earlier job (replays).
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Marks the job as having an attempt in flight.
    pub fn mark_in_flight(&mut self) {
        self.state = JobState::InFlight;
    }

    /// Schedules the next attempt after `delay`.
    pub fn schedule_retry(&mut self, delay: Duration, error: impl Into<String>) {
        self.attempt += 1;
        self.state = JobState::RetryScheduled;
        self.last_error = Some(error.into());
        self.next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
    }

    /// Moves a retry whose delay elapsed back to pending.
    pub fn mark_pending(&mut self) {
        self.state = JobState::Pending;
    }

    /// Marks the job as delivered.
    pub fn mark_succeeded(&mut self) {
        self.state = JobState::Succeeded;
        self.last_error = None;
    }

    /// Marks the job as failed for good.
    pub fn mark_terminal(&mut self, error: impl Into<String>) {
        self.state = JobState::TerminalFailure;
        self.last_error = Some(error.into());
    }

    /// Whether the job reached a terminal state.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, JobState::Succeeded | JobState::TerminalFailure)
    }

    /// Whether the current attempt is the last one allowed.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Time left until the next attempt is due, zero if overdue.
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.next_attempt_at - now).to_std().unwrap_or_default()
    }
}

/// One concrete HTTP try belonging to a delivery job. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Attempt ID.
    pub id: String,
    /// Subscription the attempt was made for.
    pub subscription_id: String,
    /// Job the attempt belongs to.
    pub job_id: String,
    /// Idempotency key sent with the request.
    pub idempotency_key: String,
    /// Event type.
    pub event: String,
    /// Request body exactly as sent.
    pub payload: String,
    /// 1-based attempt number within the job.
    pub attempt_number: u32,
    /// HTTP status code, `None` for timeouts and network failures.
    pub status_code: Option<u16>,
    /// Response body (truncated).
    pub response_body: Option<String>,
    /// Failure description, if the attempt failed.
    pub error: Option<String>,
    /// Whether the subscriber answered 2xx.
    pub is_success: bool,
    /// When the attempt was made.
    pub triggered_at: DateTime<Utc>,
    /// Measured latency in milliseconds.
    pub response_time_ms: u64,
}

impl DeliveryAttempt {
    /// Creates a successful attempt record.
    pub fn success(
        job: &DeliveryJob,
        payload: String,
        status_code: u16,
        response_body: Option<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            status_code: Some(status_code),
            response_body,
            error: None,
            is_success: true,
            ..Self::base(job, payload, response_time_ms)
        }
    }

    /// Creates a failed attempt record.
    pub fn failure(
        job: &DeliveryJob,
        payload: String,
        error: &DeliveryError,
        response_body: Option<String>,
        response_time_ms: u64,
    ) -> Self {
        let status_code = match error {
            DeliveryError::HttpStatus(status) => Some(*status),
            DeliveryError::Timeout | DeliveryError::Network(_) => None,
        };

        Self {
            status_code,
            response_body,
            error: Some(error.to_string()),
            is_success: false,
            ..Self::base(job, payload, response_time_ms)
        }
    }

    fn base(job: &DeliveryJob, payload: String, response_time_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: job.subscription_id.clone(),
            job_id: job.id.clone(),
            idempotency_key: job.idempotency_key.clone(),
            event: job.event.event_type.clone(),
            payload,
            attempt_number: job.attempt,
            status_code: None,
            response_body: None,
            error: None,
            is_success: false,
            triggered_at: Utc::now(),
            response_time_ms,
        }
    }
}

/// JSON body posted to subscribers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundEnvelope<'a> {
    event: &'a str,
    entity_type: &'a str,
    entity_id: Option<&'a str>,
    occurred_at: DateTime<Utc>,
    data: EnvelopeData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EnvelopeData<'a> {
    Json(&'a RawValue),
    Text(Cow<'a, str>),
}

/// Serializes an event into the outbound request body.
///
/// JSON payloads are embedded verbatim; anything else is embedded as a
/// string.
pub fn encode_envelope(event: &DomainEvent) -> WebhookResult<Vec<u8>> {
    let data = if event.payload.is_json() {
        match serde_json::from_slice::<&RawValue>(&event.payload.body) {
            Ok(raw) => EnvelopeData::Json(raw),
            Err(_) => EnvelopeData::Text(event.payload.as_text()),
        }
    } else {
        EnvelopeData::Text(event.payload.as_text())
    };

    let envelope = OutboundEnvelope {
        event: &event.event_type,
        entity_type: event.entity_type(),
        entity_id: event.entity_id.as_deref(),
        occurred_at: event.occurred_at,
        data,
    };

    Ok(serde_json::to_vec(&envelope)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoggedEnvelope {
    event: String,
    #[serde(default)]
    entity_id: Option<String>,
    occurred_at: DateTime<Utc>,
    data: Box<RawValue>,
}

/// Rebuilds an event from a logged request body so it can be replayed.
///
/// String data comes back as a `text/plain` payload, which encodes to the
/// same bytes as the original.
pub fn decode_envelope(body: &str) -> WebhookResult<DomainEvent> {
    let envelope: LoggedEnvelope = serde_json::from_str(body)?;

    let payload = match serde_json::from_str::<String>(envelope.data.get()) {
        Ok(text) => EventPayload::new("text/plain", text),
        Err(_) => EventPayload::new(JSON_CONTENT_TYPE, envelope.data.get()),
    };

    let mut event = DomainEvent::new(envelope.event, payload).occurred_at(envelope.occurred_at);
    if let Some(entity_id) = envelope.entity_id {
        event = event.with_entity_id(entity_id);
    }
    Ok(event)
}

/// Truncates text to at most `limit` bytes on a character boundary.
pub fn truncate_body(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }

    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_event() -> DomainEvent {
        DomainEvent::json("dataset.published", serde_json::json!({"title": "Budget"}))
            .unwrap()
            .with_entity_id(42)
    }

    #[test]
    fn test_envelope_shape() {
        let body = encode_envelope(&dataset_event()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["event"], "dataset.published");
        assert_eq!(value["entityType"], "dataset");
        assert_eq!(value["entityId"], "42");
        assert_eq!(value["data"]["title"], "Budget");
        assert!(value["occurredAt"].is_string());
    }

    #[test]
    fn test_envelope_embeds_json_verbatim() {
        let payload = EventPayload::new("application/json", r#"{"z":1,  "a":[true]}"#);
        let event = DomainEvent::new("dataset.updated", payload);

        let body = String::from_utf8(encode_envelope(&event).unwrap()).unwrap();
        assert!(body.contains(r#""data":{"z":1,  "a":[true]}"#));
    }

    #[test]
    fn test_envelope_non_json_payload_is_text() {
        let event = DomainEvent::new("dataset.updated", EventPayload::new("text/csv", "a,b\n1,2"));
        let value: serde_json::Value =
            serde_json::from_slice(&encode_envelope(&event).unwrap()).unwrap();

        assert_eq!(value["data"], "a,b\n1,2");
        assert!(value["entityId"].is_null());
    }

    #[test]
    fn test_logged_envelope_replays_identically() {
        for event in [
            dataset_event(),
            DomainEvent::new("dataset.updated", EventPayload::new("text/csv", "a,b\n1,2")),
        ] {
            let body = encode_envelope(&event).unwrap();
            let replayed = decode_envelope(std::str::from_utf8(&body).unwrap()).unwrap();
            assert_eq!(encode_envelope(&replayed).unwrap(), body);
        }
    }

    #[test]
    fn test_job_state_machine() {
        let mut job = DeliveryJob::new("sub-1", dataset_event(), 3);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.idempotency_key, job.id);

        job.mark_in_flight();
        job.schedule_retry(Duration::from_secs(5), "HTTP 500");
        assert_eq!(job.state, JobState::RetryScheduled);
        assert_eq!(job.attempt, 2);
        assert!(job.remaining_delay(Utc::now()) <= Duration::from_secs(5));

        job.mark_pending();
        job.mark_in_flight();
        job.schedule_retry(Duration::from_secs(5), "HTTP 500");
        assert!(job.is_last_attempt());

        job.mark_terminal("HTTP 500");
        assert!(job.is_settled());
    }

    #[test]
    fn test_failure_record_keeps_status() {
        let job = DeliveryJob::new("sub-1", dataset_event(), 5);

        let http =
            DeliveryAttempt::failure(&job, "{}".into(), &DeliveryError::HttpStatus(503), None, 12);
        assert_eq!(http.status_code, Some(503));
        assert!(!http.is_success);

        let timeout =
            DeliveryAttempt::failure(&job, "{}".into(), &DeliveryError::Timeout, None, 5000);
        assert_eq!(timeout.status_code, None);
        assert_eq!(timeout.error.as_deref(), Some("Request timed out"));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_body("hello", 10), "hello");
        assert_eq!(truncate_body("hello", 3), "hel");
        // 'ş' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_body("aşb", 2), "a");
    }
}
