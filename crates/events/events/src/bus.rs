//! Event bus for pub/sub communication between portal modules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::error::{EventError, EventResult};
use crate::event::DomainEvent;
use crate::handler::{BoxedHandler, EventHandler, HandlerResult};

/// The event bus for publishing and subscribing to domain events.
///
/// Subscriptions are keyed by exact event type; `on_all` receives every
/// event.
pub struct EventBus {
    /// Subscribers mapped by event type.
    subscribers: RwLock<HashMap<String, Vec<Arc<BoxedHandler>>>>,
    /// Subscribers receiving every event.
    wildcard_subscribers: RwLock<Vec<Arc<BoxedHandler>>>,
}

impl EventBus {
    /// Creates a new event bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            wildcard_subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to a specific event type.
    pub async fn on(&self, event_type: &str, handler: impl EventHandler + 'static) {
        let mut subs = self.subscribers.write().await;
        subs.entry(event_type.to_string())
            .or_default()
            .push(Arc::new(Box::new(handler)));
    }

    /// Subscribes to all events.
    pub async fn on_all(&self, handler: impl EventHandler + 'static) {
        let mut subs = self.wildcard_subscribers.write().await;
        subs.push(Arc::new(Box::new(handler)));
    }

    /// Emits an event to all matching subscribers (fire and forget).
    ///
    /// Each handler runs on its own task; failures are logged and never
    /// reach the caller.
    pub async fn emit(&self, event: DomainEvent) {
        let handlers = self.collect_handlers(&event).await;

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&event).await {
                    tracing::error!(
                        handler = handler.id(),
                        event_type = %event.event_type,
                        "Event handler error: {}",
                        e
                    );
                }
            });
        }
    }

    /// Emits an event and waits for all handlers to complete.
    pub async fn emit_sync(&self, event: DomainEvent) -> Vec<HandlerResult> {
        let handlers = self.collect_handlers(&event).await;
        let mut results = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let start = Instant::now();
            let result = handler.handle(&event).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            results.push(match result {
                Ok(()) => HandlerResult::success(handler.id(), duration_ms),
                Err(e) => HandlerResult::failure(handler.id(), e.to_string(), duration_ms),
            });
        }

        results
    }

    /// Emits an event and returns an error if any handler fails.
    pub async fn emit_checked(&self, event: DomainEvent) -> EventResult<()> {
        let results = self.emit_sync(event).await;

        for result in results {
            if !result.success {
                return Err(EventError::HandlerFailed(
                    result.error.unwrap_or_else(|| "Unknown error".to_string()),
                ));
            }
        }

        Ok(())
    }

    /// Gets the number of subscribers for an event type, `"*"` for catch-all ones.
    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        if event_type == "*" {
            let subs = self.wildcard_subscribers.read().await;
            subs.len()
        } else {
            let subs = self.subscribers.read().await;
            subs.get(event_type).map(|v| v.len()).unwrap_or(0)
        }
    }

    async fn collect_handlers(&self, event: &DomainEvent) -> Vec<Arc<BoxedHandler>> {
        let mut handlers = Vec::new();

        let subs = self.subscribers.read().await;
        if let Some(typed) = subs.get(&event.event_type) {
            handlers.extend(typed.iter().cloned());
        }

        let wildcards = self.wildcard_subscribers.read().await;
        handlers.extend(wildcards.iter().cloned());

        handlers
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
