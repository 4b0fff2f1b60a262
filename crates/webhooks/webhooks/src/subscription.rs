//! Webhook subscription records.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{WebhookError, WebhookResult};

/// Prefix of generated secrets.
const SECRET_PREFIX: &str = "whsec_";

/// Length of the random part of a generated secret.
const SECRET_LENGTH: usize = 32;

/// A registered (URL, event filter, secret) tuple wanting notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Event types this subscription receives.
    pub events: EventFilter,
    /// Secret for signing payloads. Never changes after creation.
    pub secret: String,
    /// Whether deliveries are currently made.
    pub is_active: bool,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When a delivery job for this subscription last settled.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Number of jobs that settled successfully.
    pub success_count: u64,
    /// Number of jobs that exhausted their attempt budget.
    pub failure_count: u64,
}

impl Subscription {
    /// Builds a subscription from validated input.
    pub fn from_request(request: NewSubscription) -> WebhookResult<Self> {
        let name = validate_name(&request.name)?;
        let url = validate_url(&request.url)?;
        let events = EventFilter::parse(request.events)?;
        let secret = match request.secret {
            Some(secret) if secret.trim().is_empty() => {
                return Err(WebhookError::validation("secret must not be blank"));
            }
            Some(secret) => secret,
            None => generate_secret(),
        };

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            url,
            events,
            secret,
            is_active: true,
            created_at: Utc::now(),
            last_triggered_at: None,
            success_count: 0,
            failure_count: 0,
        })
    }

    /// Checks if this subscription should receive an event.
    pub fn should_receive(&self, event_type: &str) -> bool {
        self.is_active && self.events.matches(event_type)
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Human-readable name.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Event types to subscribe to.
    pub events: Vec<String>,
    /// Signing secret; generated when absent.
    pub secret: Option<String>,
}

impl NewSubscription {
    /// Creates a request for the given name and URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Subscribes to specific events.
    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Uses a caller-provided secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Editable, non-secret fields of a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// New name.
    pub name: String,
    /// New target URL.
    pub url: String,
    /// New event filter.
    pub events: EventFilter,
}

impl SubscriptionUpdate {
    /// Validates raw input into an update.
    pub fn new(
        name: &str,
        url: &str,
        events: impl IntoIterator<Item = impl Into<String>>,
    ) -> WebhookResult<Self> {
        Ok(Self {
            name: validate_name(name)?,
            url: validate_url(url)?,
            events: EventFilter::parse(events)?,
        })
    }

    /// Applies the update to a subscription, leaving secret and counters alone.
    pub fn apply(&self, subscription: &mut Subscription) {
        subscription.name = self.name.clone();
        subscription.url = self.url.clone();
        subscription.events = self.events.clone();
    }
}

/// Set of event types a subscription receives.
///
/// Matching is plain set membership: an empty filter matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter(BTreeSet<String>);

impl EventFilter {
    /// Builds a filter, rejecting blank or whitespace-containing event types.
    pub fn parse(events: impl IntoIterator<Item = impl Into<String>>) -> WebhookResult<Self> {
        let mut set = BTreeSet::new();
        for event in events {
            let event = event.into();
            let trimmed = event.trim();
            if trimmed.is_empty() {
                return Err(WebhookError::validation("event types must not be blank"));
            }
            if trimmed.chars().any(char::is_whitespace) {
                return Err(WebhookError::validation(format!(
                    "event type '{}' must not contain whitespace",
                    trimmed
                )));
            }
            set.insert(trimmed.to_string());
        }
        Ok(Self(set))
    }

    /// Checks if an event type is in the filter.
    pub fn matches(&self, event_type: &str) -> bool {
        self.0.contains(event_type)
    }

    /// Whether the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the subscribed event types in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Validates an outbound webhook URL: absolute `http`/`https` with a host.
pub fn validate_url(url: &str) -> WebhookResult<String> {
    let trimmed = url.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| WebhookError::validation(format!("malformed url '{}': {}", trimmed, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::validation(format!(
            "url scheme must be http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::validation("url must have a host"));
    }

    Ok(trimmed.to_string())
}

fn validate_name(name: &str) -> WebhookResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WebhookError::validation("name must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Generates a random signing secret.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let charset: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

    let key: String = (0..SECRET_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..charset.len());
            charset[idx] as char
        })
        .collect();

    format!("{}{}", SECRET_PREFIX, key)
}
