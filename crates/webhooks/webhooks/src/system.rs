//! Webhook system - main entry point.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use portal_events::{DomainEvent, EventBus, event_types};

use crate::config::WebhookConfig;
use crate::delivery::{DeliveryAttempt, DeliveryJob, decode_envelope};
use crate::dispatcher::{DeliveryOutcome, Dispatcher, ReqwestTransport, WebhookTransport};
use crate::error::{WebhookError, WebhookResult};
use crate::log_store::{DeliveryLogStore, SubscriptionStats};
use crate::matcher::Matcher;
use crate::registry::SubscriptionRegistry;
use crate::scheduler::RetryScheduler;
use crate::storage::{InMemoryWebhookStorage, WebhookStorage};
use crate::subscription::Subscription;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The assembled webhook engine.
///
/// Owns the worker pool; construct it inside a Tokio runtime.
pub struct WebhookSystem {
    config: WebhookConfig,
    registry: SubscriptionRegistry,
    logs: DeliveryLogStore,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<RetryScheduler>,
    matcher: Matcher,
    retention: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookSystem {
    /// Creates a system with in-memory storage and the HTTP transport.
    pub fn new(config: WebhookConfig) -> WebhookResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.user_agent)?);
        Self::with_parts(config, Arc::new(InMemoryWebhookStorage::new()), transport)
    }

    /// Creates a system over the given storage and transport.
    pub fn with_parts(
        config: WebhookConfig,
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn WebhookTransport>,
    ) -> WebhookResult<Self> {
        config.validate()?;

        let logs = DeliveryLogStore::new(storage.clone());
        let registry = SubscriptionRegistry::new(storage.clone(), logs.clone());
        let dispatcher = Arc::new(Dispatcher::new(&config, transport, logs.clone()));
        let scheduler = Arc::new(RetryScheduler::start(
            &config,
            storage,
            logs.clone(),
            dispatcher.clone(),
        ));
        let matcher = Matcher::new(registry.clone(), scheduler.clone(), config.max_attempts);

        let retention = config
            .log_retention_days
            .map(|days| spawn_retention_sweep(logs.clone(), days));

        Ok(Self {
            config,
            registry,
            logs,
            dispatcher,
            scheduler,
            matcher,
            retention: Mutex::new(retention),
        })
    }

    /// Subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Delivery log store.
    pub fn logs(&self) -> &DeliveryLogStore {
        &self.logs
    }

    /// Configuration in use.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Publishes an event with a JSON payload. Never fails; errors are logged.
    pub fn publish(&self, event_type: &str, payload: impl Serialize) {
        match DomainEvent::json(event_type, payload) {
            Ok(event) => self.publish_event(event),
            Err(e) => tracing::error!(event_type, "Failed to serialize event payload: {}", e),
        }
    }

    /// Publishes an event about a specific entity, e.g. a dataset id.
    pub fn publish_for(&self, event_type: &str, entity_id: impl ToString, payload: impl Serialize) {
        match DomainEvent::json(event_type, payload) {
            Ok(event) => self.publish_event(event.with_entity_id(entity_id)),
            Err(e) => tracing::error!(event_type, "Failed to serialize event payload: {}", e),
        }
    }

    /// Publishes a prepared event.
    pub fn publish_event(&self, event: DomainEvent) {
        self.matcher.publish(event);
    }

    /// Event handler that feeds bus events into this system.
    pub fn event_handler(&self) -> Matcher {
        self.matcher.clone()
    }

    /// Subscribes the matcher to every event on `bus`.
    pub async fn connect_to_events(&self, bus: &EventBus) {
        bus.on_all(self.event_handler()).await;
    }

    /// Re-queues jobs left unsettled by a previous run.
    pub async fn recover_pending(&self) -> WebhookResult<usize> {
        self.scheduler.recover().await
    }

    /// Sends a single `webhook.test` attempt and waits for its outcome.
    ///
    /// The attempt is logged and settled like any other job.
    pub async fn send_test(&self, subscription_id: &str) -> WebhookResult<DeliveryAttempt> {
        let subscription = self.registry.get(subscription_id).await?;
        if !subscription.is_active {
            return Err(WebhookError::validation("cannot test an inactive subscription"));
        }

        let event = DomainEvent::json(
            event_types::WEBHOOK_TEST,
            serde_json::json!({
                "subscriptionId": subscription.id,
                "name": subscription.name,
                "message": "This is a test webhook delivery",
            }),
        )?
        .with_entity_id(&subscription.id);

        let mut job = DeliveryJob::new(&subscription.id, event, 1);
        job.mark_in_flight();

        let attempt = match self.dispatcher.deliver(&subscription, &job).await {
            DeliveryOutcome::Success(attempt) => {
                job.mark_succeeded();
                attempt
            }
            DeliveryOutcome::RetryableFailure(attempt, error)
            | DeliveryOutcome::TerminalFailure(attempt, error) => {
                job.mark_terminal(error.to_string());
                attempt
            }
        };
        self.logs.settle(&job).await?;

        tracing::info!(
            subscription_id,
            success = attempt.is_success,
            "Sent test webhook"
        );
        Ok(attempt)
    }

    /// Replays the event of a failed attempt as a new job.
    ///
    /// The new job reuses the original idempotency key so receivers can
    /// recognise the redelivery.
    pub async fn replay_attempt(&self, attempt_id: &str) -> WebhookResult<DeliveryJob> {
        let attempt = self.logs.get_attempt(attempt_id).await?;
        if attempt.is_success {
            return Err(WebhookError::validation("only failed deliveries can be retried"));
        }

        let subscription = self.registry.get(&attempt.subscription_id).await?;
        if !subscription.is_active {
            return Err(WebhookError::validation("cannot retry for an inactive subscription"));
        }

        let event = decode_envelope(&attempt.payload)?;
        let job = DeliveryJob::new(&subscription.id, event, self.config.max_attempts)
            .with_idempotency_key(&attempt.idempotency_key);
        self.scheduler.submit(job.clone()).await?;

        tracing::info!(
            attempt_id,
            job_id = %job.id,
            subscription_id = %subscription.id,
            "Replaying failed webhook delivery"
        );
        Ok(job)
    }

    /// Delivery statistics for a subscription.
    pub async fn statistics(&self, subscription_id: &str) -> WebhookResult<SubscriptionStats> {
        let subscription = self.registry.get(subscription_id).await?;
        self.logs.statistics(&subscription).await
    }

    /// Zeroes the success and failure counters.
    pub async fn reset_counters(&self, subscription_id: &str) -> WebhookResult<Subscription> {
        self.logs.reset_counters(subscription_id).await
    }

    /// Waits until no published event or job is outstanding.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Stops workers and background sweeps.
    pub fn shutdown(&self) {
        if let Ok(mut retention) = self.retention.lock() {
            if let Some(handle) = retention.take() {
                handle.abort();
            }
        }
        self.scheduler.shutdown();
    }
}

impl Drop for WebhookSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_retention_sweep(logs: DeliveryLogStore, days: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = logs.purge_older_than(days).await {
                tracing::error!("Delivery log retention sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{OutboundRequest, TransportResponse};
    use crate::error::DeliveryError;
    use crate::subscription::NewSubscription;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl WebhookTransport for AlwaysOk {
        async fn send(
            &self,
            _request: &OutboundRequest,
        ) -> Result<TransportResponse, DeliveryError> {
            Ok(TransportResponse::new(204, ""))
        }
    }

    fn system() -> WebhookSystem {
        WebhookSystem::with_parts(
            WebhookConfig::default(),
            Arc::new(InMemoryWebhookStorage::new()),
            Arc::new(AlwaysOk),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = WebhookSystem::with_parts(
            WebhookConfig::new().worker_count(0),
            Arc::new(InMemoryWebhookStorage::new()),
            Arc::new(AlwaysOk),
        );
        assert!(matches!(result, Err(WebhookError::Config(_))));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_goes_idle() {
        let system = system();
        system.publish("dataset.published", serde_json::json!({"id": 1}));
        system.wait_idle().await;
        assert_eq!(system.scheduler.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_event_filtering() {
        let system = system();
        let sub = system
            .registry()
            .create(
                NewSubscription::new("feed", "https://example.com/hook")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();

        system.publish("dataset.published", serde_json::json!({}));
        system.publish("category.created", serde_json::json!({}));
        system.wait_idle().await;

        let sub = system.registry().get(&sub.id).await.unwrap();
        assert_eq!(sub.success_count, 1);
    }

    #[tokio::test]
    async fn test_replay_of_success_rejected() {
        let system = system();
        let sub = system
            .registry()
            .create(
                NewSubscription::new("feed", "https://example.com/hook")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();

        let attempt = system.send_test(&sub.id).await.unwrap();
        assert!(attempt.is_success);
        assert!(matches!(
            system.replay_attempt(&attempt.id).await,
            Err(WebhookError::Validation(_))
        ));
    }
}
