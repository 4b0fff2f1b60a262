//! # Portal Webhooks
//!
//! Webhook subscription and delivery engine for the open data portal:
//! - Subscription registry with explicit event filters
//! - Event fan-out to matching active subscriptions
//! - HMAC-SHA256 signed HTTP delivery
//! - Retries on a fixed backoff schedule
//! - Append-only delivery logs and per-subscription counters
//!
//! ## Example
//!
//! ```rust,ignore
//! use portal_webhooks::{NewSubscription, WebhookConfig, WebhookSystem};
//!
//! let system = WebhookSystem::new(WebhookConfig::default())?;
//!
//! let subscription = system
//!     .registry()
//!     .create(
//!         NewSubscription::new("Catalog mirror", "https://example.com/hook")
//!             .events(["dataset.published"]),
//!     )
//!     .await?;
//!
//! system.publish("dataset.published", serde_json::json!({"id": 42}));
//! ```

mod config;
mod delivery;
mod dispatcher;
mod error;
mod log_store;
mod matcher;
mod receiver;
mod registry;
mod retry;
mod scheduler;
pub mod signature;
mod storage;
mod subscription;
mod system;

pub use config::WebhookConfig;
pub use delivery::{
    DeliveryAttempt, DeliveryJob, JobState, decode_envelope, encode_envelope, truncate_body,
};
pub use dispatcher::{
    DeliveryOutcome, Dispatcher, OutboundRequest, ReqwestTransport, TransportResponse,
    WebhookTransport,
};
pub use error::{DeliveryError, WebhookError, WebhookResult};
pub use log_store::{DeliveryLogStore, SubscriptionStats};
pub use matcher::Matcher;
pub use receiver::{WebhookEnvelope, WebhookReceiver};
pub use registry::SubscriptionRegistry;
pub use retry::{BackoffSchedule, RetryStrategy};
pub use scheduler::{RetryScheduler, WorkGuard};
pub use signature::WebhookSigner;
pub use storage::{
    AttemptPage, AttemptQuery, DEFAULT_PAGE_SIZE, InMemoryWebhookStorage, MAX_PAGE_SIZE,
    WebhookStorage,
};
pub use subscription::{
    EventFilter, NewSubscription, Subscription, SubscriptionUpdate, generate_secret, validate_url,
};
pub use system::WebhookSystem;
