//! Domain event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventResult;

/// Content type used for JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A domain event produced by a portal module.
///
/// Events are transient: they are never stored on their own and only survive
/// as the payload of whatever deliveries they spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique identifier for this event instance.
    pub id: String,
    /// Dotted event type (e.g. "dataset.published").
    pub event_type: String,
    /// Identifier of the entity the event is about, if any.
    pub entity_id: Option<String>,
    /// When the event happened.
    pub occurred_at: DateTime<Utc>,
    /// Opaque event payload.
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Creates a new event with the given type and payload.
    pub fn new(event_type: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            entity_id: None,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Creates an event whose payload is the JSON serialization of `payload`.
    pub fn json(event_type: impl Into<String>, payload: impl Serialize) -> EventResult<Self> {
        Ok(Self::new(event_type, EventPayload::json(&payload)?))
    }

    /// Sets the entity identifier.
    pub fn with_entity_id(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// Overrides the occurrence time.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Returns the entity type, i.e. the event type up to the first dot.
    ///
    /// `"dataset.published"` yields `"dataset"`.
    pub fn entity_type(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(entity, _)| entity)
            .unwrap_or(&self.event_type)
    }
}

/// Opaque event payload: raw bytes plus their declared content type.
///
/// Nothing downstream interprets the bytes; they are forwarded and signed
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Declared MIME type of `body`.
    pub content_type: String,
    /// Raw payload bytes.
    pub body: Vec<u8>,
}

impl EventPayload {
    /// Creates a payload from raw bytes.
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// Serializes a value to a JSON payload.
    pub fn json(value: &impl Serialize) -> EventResult<Self> {
        Ok(Self::new(JSON_CONTENT_TYPE, serde_json::to_vec(value)?))
    }

    /// An empty JSON object.
    pub fn empty() -> Self {
        Self::new(JSON_CONTENT_TYPE, b"{}".to_vec())
    }

    /// Whether the payload declares a JSON content type.
    pub fn is_json(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) || essence.ends_with("+json")
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl Default for EventPayload {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type() {
        let event = DomainEvent::new("dataset.published", EventPayload::empty());
        assert_eq!(event.entity_type(), "dataset");

        let event = DomainEvent::new("dataset.file.uploaded", EventPayload::empty());
        assert_eq!(event.entity_type(), "dataset");

        let event = DomainEvent::new("ping", EventPayload::empty());
        assert_eq!(event.entity_type(), "ping");
    }

    #[test]
    fn test_json_event() {
        let event = DomainEvent::json("dataset.published", serde_json::json!({"title": "Budget"}))
            .unwrap()
            .with_entity_id(42);

        assert_eq!(event.entity_id.as_deref(), Some("42"));
        assert!(event.payload.is_json());
        assert_eq!(event.payload.body, br#"{"title":"Budget"}"#.to_vec());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_content_type_detection() {
        assert!(EventPayload::new("application/json; charset=utf-8", "{}").is_json());
        assert!(EventPayload::new("application/vnd.portal+json", "{}").is_json());
        assert!(!EventPayload::new("text/csv", "a,b").is_json());
    }
}
