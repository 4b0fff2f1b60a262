//! # Portal Events
//!
//! Domain event system for the open data portal providing:
//! - Transient domain events with opaque payloads
//! - Pub/sub event bus with async handlers
//!
//! ## Example
//!
//! ```rust,ignore
//! use portal_events::{DomainEvent, EventBus, event_types::DATASET_PUBLISHED};
//!
//! let bus = EventBus::new();
//! bus.on(DATASET_PUBLISHED, handler).await;
//!
//! let event = DomainEvent::json(DATASET_PUBLISHED, serde_json::json!({ "title": "Budget 2024" }))?
//!     .with_entity_id(42);
//! bus.emit(event).await;
//! ```

mod bus;
mod error;
mod event;
mod handler;

pub use bus::EventBus;
pub use error::{EventError, EventResult};
pub use event::{DomainEvent, EventPayload, JSON_CONTENT_TYPE};
pub use handler::{BoxedHandler, EventHandler, HandlerResult};

/// Event types published by the portal modules.
pub mod event_types {
    /// A dataset became publicly visible.
    pub const DATASET_PUBLISHED: &str = "dataset.published";
    /// A dataset's metadata or files changed.
    pub const DATASET_UPDATED: &str = "dataset.updated";
    /// A dataset was removed.
    pub const DATASET_DELETED: &str = "dataset.deleted";
    /// A dataset was downloaded.
    pub const DATASET_DOWNLOADED: &str = "dataset.downloaded";
    /// A category was created.
    pub const CATEGORY_CREATED: &str = "category.created";
    /// A category was updated.
    pub const CATEGORY_UPDATED: &str = "category.updated";
    /// A category was deleted.
    pub const CATEGORY_DELETED: &str = "category.deleted";
    /// A user registered.
    pub const USER_REGISTERED: &str = "user.registered";
    /// Ping sent by the webhook test operation.
    pub const WEBHOOK_TEST: &str = "webhook.test";
}
