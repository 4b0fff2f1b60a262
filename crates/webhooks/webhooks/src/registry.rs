//! Subscription registry.

use std::sync::Arc;

use crate::error::{WebhookError, WebhookResult};
use crate::log_store::DeliveryLogStore;
use crate::storage::WebhookStorage;
use crate::subscription::{NewSubscription, Subscription, SubscriptionUpdate};

/// CRUD over subscription records.
///
/// Counters are deliberately absent from every write path here; only the
/// [`DeliveryLogStore`] touches them.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    storage: Arc<dyn WebhookStorage>,
    logs: DeliveryLogStore,
}

impl SubscriptionRegistry {
    /// Creates a registry over a storage backend.
    pub fn new(storage: Arc<dyn WebhookStorage>, logs: DeliveryLogStore) -> Self {
        Self { storage, logs }
    }

    /// Registers a subscription, generating a secret when none is given.
    pub async fn create(&self, request: NewSubscription) -> WebhookResult<Subscription> {
        let subscription = Subscription::from_request(request)?;
        self.storage.insert_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            events = subscription.events.iter().count(),
            "Created webhook subscription"
        );
        Ok(subscription)
    }

    /// Gets a subscription, failing if it does not exist.
    pub async fn get(&self, id: &str) -> WebhookResult<Subscription> {
        self.find(id)
            .await?
            .ok_or_else(|| WebhookError::subscription_not_found(id))
    }

    /// Looks a subscription up.
    pub async fn find(&self, id: &str) -> WebhookResult<Option<Subscription>> {
        self.storage.get_subscription(id).await
    }

    /// Lists subscriptions, optionally only active ones.
    pub async fn list(&self, active_only: bool) -> WebhookResult<Vec<Subscription>> {
        let mut subscriptions = self.storage.list_subscriptions().await?;
        if active_only {
            subscriptions.retain(|s| s.is_active);
        }
        Ok(subscriptions)
    }

    /// Active subscriptions whose filter contains `event_type`.
    pub async fn matching(&self, event_type: &str) -> WebhookResult<Vec<Subscription>> {
        let mut subscriptions = self.storage.list_subscriptions().await?;
        subscriptions.retain(|s| s.should_receive(event_type));
        Ok(subscriptions)
    }

    /// Activates or deactivates a subscription.
    ///
    /// Deactivation stops future attempts; an attempt already in flight runs
    /// to completion.
    pub async fn set_active(&self, id: &str, active: bool) -> WebhookResult<Subscription> {
        let subscription = self
            .storage
            .set_subscription_active(id, active)
            .await?
            .ok_or_else(|| WebhookError::subscription_not_found(id))?;

        tracing::info!(subscription_id = id, active, "Toggled webhook subscription");
        Ok(subscription)
    }

    /// Edits name, URL and event filter. The secret cannot be changed.
    pub async fn update(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> WebhookResult<Subscription> {
        let subscription = self
            .storage
            .update_subscription(id, &update)
            .await?
            .ok_or_else(|| WebhookError::subscription_not_found(id))?;

        tracing::info!(subscription_id = id, "Updated webhook subscription");
        Ok(subscription)
    }

    /// Deletes a subscription together with its logs and pending jobs.
    ///
    /// Logs go first, then the subscription row. Attempts racing with the
    /// delete are refused by storage once the row is gone.
    pub async fn delete(&self, id: &str) -> WebhookResult<()> {
        if self.find(id).await?.is_none() {
            return Err(WebhookError::subscription_not_found(id));
        }

        let jobs = self.storage.delete_jobs_for_subscription(id).await?;
        let logs = self.logs.delete_subscription_logs(id).await?;
        self.storage.delete_subscription(id).await?;
        // Catch attempts written between the two steps.
        let late = self.logs.delete_subscription_logs(id).await?;

        tracing::info!(
            subscription_id = id,
            deleted_logs = logs + late,
            dropped_jobs = jobs,
            "Deleted webhook subscription"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryAttempt, DeliveryJob};
    use crate::storage::{AttemptQuery, InMemoryWebhookStorage};
    use portal_events::{DomainEvent, EventPayload};

    fn registry() -> (SubscriptionRegistry, DeliveryLogStore) {
        let storage: Arc<dyn WebhookStorage> = Arc::new(InMemoryWebhookStorage::new());
        let logs = DeliveryLogStore::new(storage.clone());
        (SubscriptionRegistry::new(storage, logs.clone()), logs)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (registry, _) = registry();
        let created = registry
            .create(
                NewSubscription::new("feed", "https://example.com/hook")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();

        let fetched = registry.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert!(matches!(
            registry.get("missing").await,
            Err(WebhookError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_urls_allowed() {
        let (registry, _) = registry();
        for events in [["dataset.published"], ["dataset.deleted"]] {
            registry
                .create(NewSubscription::new("feed", "https://example.com/hook").events(events))
                .await
                .unwrap();
        }
        assert_eq!(registry.list(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_active_only_and_matching() {
        let (registry, _) = registry();
        let a = registry
            .create(
                NewSubscription::new("a", "https://a.example.com")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();
        let b = registry
            .create(
                NewSubscription::new("b", "https://b.example.com")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();
        registry
            .create(NewSubscription::new("c", "https://c.example.com").events(["category.created"]))
            .await
            .unwrap();

        registry.set_active(&b.id, false).await.unwrap();

        assert_eq!(registry.list(true).await.unwrap().len(), 2);
        let matching = registry.matching("dataset.published").await.unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, a.id);
    }

    #[tokio::test]
    async fn test_update_keeps_secret_and_counters() {
        let (registry, _) = registry();
        let created = registry
            .create(NewSubscription::new("feed", "https://example.com/hook").secret("keep-me"))
            .await
            .unwrap();

        let update =
            SubscriptionUpdate::new("renamed", "https://new.example.com/hook", ["dataset.updated"])
                .unwrap();
        let updated = registry.update(&created.id, update).await.unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.url, "https://new.example.com/hook");
        assert!(updated.events.matches("dataset.updated"));
        assert_eq!(updated.secret, "keep-me");
    }

    #[tokio::test]
    async fn test_delete_cascades_logs() {
        let (registry, logs) = registry();
        let created = registry
            .create(
                NewSubscription::new("feed", "https://example.com/hook")
                    .events(["dataset.published"]),
            )
            .await
            .unwrap();

        let job = DeliveryJob::new(
            &created.id,
            DomainEvent::new("dataset.published", EventPayload::empty()),
            5,
        );
        logs.record_attempt(&DeliveryAttempt::success(&job, "{}".into(), 200, None, 1))
            .await
            .unwrap();

        registry.delete(&created.id).await.unwrap();

        let page = logs.list_attempts(&created.id, &AttemptQuery::new()).await.unwrap();
        assert!(page.items.is_empty());
        assert!(registry.find(&created.id).await.unwrap().is_none());
        assert!(matches!(
            registry.delete(&created.id).await,
            Err(WebhookError::NotFound(_))
        ));
    }
}
