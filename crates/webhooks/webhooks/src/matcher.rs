//! Event to subscription fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use portal_events::{DomainEvent, EventError, EventHandler};

use crate::delivery::DeliveryJob;
use crate::error::WebhookResult;
use crate::registry::SubscriptionRegistry;
use crate::scheduler::RetryScheduler;

/// Turns published events into one delivery job per matching subscription.
#[derive(Clone)]
pub struct Matcher {
    registry: SubscriptionRegistry,
    scheduler: Arc<RetryScheduler>,
    max_attempts: u32,
}

impl Matcher {
    /// Creates a matcher.
    pub fn new(
        registry: SubscriptionRegistry,
        scheduler: Arc<RetryScheduler>,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            scheduler,
            max_attempts,
        }
    }

    /// Fans an event out in the background and returns immediately.
    ///
    /// Failures are logged, never reported to the producer.
    pub fn publish(&self, event: DomainEvent) {
        let guard = self.scheduler.hold();
        let matcher = self.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = matcher.dispatch(event).await {
                tracing::error!("Failed to fan out event: {}", e);
            }
        });
    }

    /// Resolves matching subscriptions and submits their jobs.
    ///
    /// Returns the number of jobs created.
    pub async fn dispatch(&self, event: DomainEvent) -> WebhookResult<usize> {
        let subscriptions = self.registry.matching(&event.event_type).await?;
        if subscriptions.is_empty() {
            tracing::trace!(event_type = %event.event_type, "No webhook subscriptions for event");
            return Ok(0);
        }

        let mut created = 0;
        for subscription in &subscriptions {
            let job = DeliveryJob::new(&subscription.id, event.clone(), self.max_attempts);
            let job_id = job.id.clone();
            match self.scheduler.submit(job).await {
                Ok(()) => {
                    created += 1;
                    tracing::debug!(
                        job_id = %job_id,
                        subscription_id = %subscription.id,
                        event_type = %event.event_type,
                        "Queued webhook delivery"
                    );
                }
                Err(e) => tracing::error!(
                    subscription_id = %subscription.id,
                    event_type = %event.event_type,
                    "Failed to queue webhook delivery: {}",
                    e
                ),
            }
        }

        Ok(created)
    }
}

#[async_trait]
impl EventHandler for Matcher {
    fn id(&self) -> &str {
        "webhook-matcher"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), EventError> {
        self.publish(event.clone());
        Ok(())
    }
}
