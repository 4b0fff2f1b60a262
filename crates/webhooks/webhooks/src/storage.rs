//! Webhook storage trait for persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::delivery::{DeliveryAttempt, DeliveryJob};
use crate::error::{WebhookError, WebhookResult};
use crate::subscription::{Subscription, SubscriptionUpdate};

/// Default page size for attempt listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page size accepted for attempt listings.
pub const MAX_PAGE_SIZE: usize = 100;

/// Filters and pagination for attempt listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptQuery {
    /// 1-based page number.
    pub page: usize,
    /// Items per page.
    pub page_size: usize,
    /// Only successful (`true`) or failed (`false`) attempts.
    pub success: Option<bool>,
    /// Only attempts for this event type.
    pub event: Option<String>,
    /// Only attempts of this job.
    pub job_id: Option<String>,
}

impl AttemptQuery {
    /// First page with the default size and no filters.
    pub fn new() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            success: None,
            event: None,
            job_id: None,
        }
    }

    /// Sets the page and page size, clamped to sane bounds.
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page.max(1);
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Filters on outcome.
    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Filters on event type.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Filters on job.
    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Unbounded query returning every attempt.
    pub fn all() -> Self {
        Self {
            page_size: usize::MAX,
            ..Self::new()
        }
    }

    fn accepts(&self, attempt: &DeliveryAttempt) -> bool {
        self.success.map_or(true, |s| attempt.is_success == s)
            && self.event.as_deref().map_or(true, |e| attempt.event == e)
            && self.job_id.as_deref().map_or(true, |j| attempt.job_id == j)
    }
}

impl Default for AttemptQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// One page of attempts, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPage {
    /// Attempts on this page.
    pub items: Vec<DeliveryAttempt>,
    /// Attempts matching the filters across all pages.
    pub total: usize,
    /// Page number.
    pub page: usize,
    /// Page size.
    pub page_size: usize,
}

/// Trait for webhook storage backends.
///
/// Implementations must make `settle_subscription` and `reset_counters`
/// atomic with respect to each other, and must refuse attempts for unknown
/// subscriptions so that no log entry outlives its subscription.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    // ==================== Subscription Operations ====================

    /// Inserts a new subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> WebhookResult<()>;

    /// Gets a subscription by ID.
    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<Subscription>>;

    /// Lists all subscriptions, oldest first.
    async fn list_subscriptions(&self) -> WebhookResult<Vec<Subscription>>;

    /// Updates the editable fields of a subscription.
    async fn update_subscription(
        &self,
        id: &str,
        update: &SubscriptionUpdate,
    ) -> WebhookResult<Option<Subscription>>;

    /// Sets the active flag.
    async fn set_subscription_active(
        &self,
        id: &str,
        active: bool,
    ) -> WebhookResult<Option<Subscription>>;

    /// Deletes a subscription row. Returns whether it existed.
    async fn delete_subscription(&self, id: &str) -> WebhookResult<bool>;

    /// Atomically increments one counter and stamps `last_triggered_at`.
    async fn settle_subscription(
        &self,
        id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<Subscription>>;

    /// Atomically zeroes both counters.
    async fn reset_counters(&self, id: &str) -> WebhookResult<Option<Subscription>>;

    // ==================== Delivery Log Operations ====================

    /// Appends an attempt. Fails with `NotFound` if the subscription is gone.
    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> WebhookResult<()>;

    /// Gets an attempt by ID.
    async fn get_attempt(&self, id: &str) -> WebhookResult<Option<DeliveryAttempt>>;

    /// Lists attempts of a subscription, newest first.
    async fn list_attempts(
        &self,
        subscription_id: &str,
        query: &AttemptQuery,
    ) -> WebhookResult<AttemptPage>;

    /// Deletes every attempt of a subscription.
    async fn delete_attempts_for_subscription(&self, subscription_id: &str) -> WebhookResult<usize>;

    /// Deletes attempts triggered before `cutoff`.
    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> WebhookResult<usize>;

    // ==================== Job Operations ====================

    /// Inserts or replaces a pending job.
    async fn save_job(&self, job: &DeliveryJob) -> WebhookResult<()>;

    /// Deletes a job.
    async fn delete_job(&self, id: &str) -> WebhookResult<()>;

    /// Lists unsettled jobs.
    async fn list_pending_jobs(&self) -> WebhookResult<Vec<DeliveryJob>>;

    /// Deletes every job of a subscription.
    async fn delete_jobs_for_subscription(&self, subscription_id: &str) -> WebhookResult<usize>;
}

#[derive(Default)]
struct StorageState {
    subscriptions: HashMap<String, Subscription>,
    attempts: Vec<DeliveryAttempt>,
    jobs: HashMap<String, DeliveryJob>,
}

/// In-memory webhook storage.
///
/// All tables sit behind one lock, which gives the atomicity the trait
/// requires.
pub struct InMemoryWebhookStorage {
    state: RwLock<StorageState>,
}

impl InMemoryWebhookStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StorageState::default()),
        }
    }
}

impl Default for InMemoryWebhookStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn insert_subscription(&self, subscription: &Subscription) -> WebhookResult<()> {
        let mut state = self.state.write().await;
        if state.subscriptions.contains_key(&subscription.id) {
            return Err(WebhookError::Storage(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> WebhookResult<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state.subscriptions.get(id).cloned())
    }

    async fn list_subscriptions(&self) -> WebhookResult<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut subscriptions: Vec<Subscription> = state.subscriptions.values().cloned().collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(subscriptions)
    }

    async fn update_subscription(
        &self,
        id: &str,
        update: &SubscriptionUpdate,
    ) -> WebhookResult<Option<Subscription>> {
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(id).map(|subscription| {
            update.apply(subscription);
            subscription.clone()
        }))
    }

    async fn set_subscription_active(
        &self,
        id: &str,
        active: bool,
    ) -> WebhookResult<Option<Subscription>> {
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(id).map(|subscription| {
            subscription.is_active = active;
            subscription.clone()
        }))
    }

    async fn delete_subscription(&self, id: &str) -> WebhookResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.subscriptions.remove(id).is_some())
    }

    async fn settle_subscription(
        &self,
        id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<Subscription>> {
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(id).map(|subscription| {
            if success {
                subscription.success_count += 1;
            } else {
                subscription.failure_count += 1;
            }
            subscription.last_triggered_at = Some(at);
            subscription.clone()
        }))
    }

    async fn reset_counters(&self, id: &str) -> WebhookResult<Option<Subscription>> {
        let mut state = self.state.write().await;
        Ok(state.subscriptions.get_mut(id).map(|subscription| {
            subscription.success_count = 0;
            subscription.failure_count = 0;
            subscription.clone()
        }))
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> WebhookResult<()> {
        let mut state = self.state.write().await;
        if !state.subscriptions.contains_key(&attempt.subscription_id) {
            return Err(WebhookError::subscription_not_found(&attempt.subscription_id));
        }
        state.attempts.push(attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, id: &str) -> WebhookResult<Option<DeliveryAttempt>> {
        let state = self.state.read().await;
        Ok(state.attempts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_attempts(
        &self,
        subscription_id: &str,
        query: &AttemptQuery,
    ) -> WebhookResult<AttemptPage> {
        let state = self.state.read().await;
        let matching: Vec<&DeliveryAttempt> = state
            .attempts
            .iter()
            .rev()
            .filter(|a| a.subscription_id == subscription_id && query.accepts(a))
            .collect();

        let page = query.page.max(1);
        let page_size = query.page_size.max(1);
        let items = matching
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .map(|a| (*a).clone())
            .collect();

        Ok(AttemptPage {
            items,
            total: matching.len(),
            page,
            page_size,
        })
    }

    async fn delete_attempts_for_subscription(
        &self,
        subscription_id: &str,
    ) -> WebhookResult<usize> {
        let mut state = self.state.write().await;
        let before = state.attempts.len();
        state.attempts.retain(|a| a.subscription_id != subscription_id);
        Ok(before - state.attempts.len())
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> WebhookResult<usize> {
        let mut state = self.state.write().await;
        let before = state.attempts.len();
        state.attempts.retain(|a| a.triggered_at >= cutoff);
        Ok(before - state.attempts.len())
    }

    async fn save_job(&self, job: &DeliveryJob) -> WebhookResult<()> {
        let mut state = self.state.write().await;
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> WebhookResult<()> {
        let mut state = self.state.write().await;
        state.jobs.remove(id);
        Ok(())
    }

    async fn list_pending_jobs(&self) -> WebhookResult<Vec<DeliveryJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<DeliveryJob> = state
            .jobs
            .values()
            .filter(|j| !j.is_settled())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        Ok(jobs)
    }

    async fn delete_jobs_for_subscription(&self, subscription_id: &str) -> WebhookResult<usize> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, j| j.subscription_id != subscription_id);
        Ok(before - state.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::subscription::NewSubscription;
    use portal_events::{DomainEvent, EventPayload};

    fn subscription() -> Subscription {
        Subscription::from_request(
            NewSubscription::new("feed", "https://example.com/hook").events(["dataset.published"]),
        )
        .unwrap()
    }

    fn attempt_for(sub: &Subscription, success: bool) -> DeliveryAttempt {
        let job = DeliveryJob::new(
            &sub.id,
            DomainEvent::new("dataset.published", EventPayload::empty()),
            5,
        );
        if success {
            DeliveryAttempt::success(&job, "{}".into(), 200, None, 3)
        } else {
            DeliveryAttempt::failure(&job, "{}".into(), &DeliveryError::HttpStatus(500), None, 3)
        }
    }

    #[tokio::test]
    async fn test_attempt_requires_subscription() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription();

        let orphan = storage.insert_attempt(&attempt_for(&sub, true)).await;
        assert!(matches!(orphan, Err(WebhookError::NotFound(_))));

        storage.insert_subscription(&sub).await.unwrap();
        storage.insert_attempt(&attempt_for(&sub, true)).await.unwrap();
    }

    #[tokio::test]
    async fn test_settlement_counters() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription();
        storage.insert_subscription(&sub).await.unwrap();

        storage.settle_subscription(&sub.id, true, Utc::now()).await.unwrap();
        storage.settle_subscription(&sub.id, true, Utc::now()).await.unwrap();
        let settled = storage
            .settle_subscription(&sub.id, false, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(settled.success_count, 2);
        assert_eq!(settled.failure_count, 1);
        assert!(settled.last_triggered_at.is_some());

        let reset = storage.reset_counters(&sub.id).await.unwrap().unwrap();
        assert_eq!((reset.success_count, reset.failure_count), (0, 0));
        assert!(reset.last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn test_attempt_pagination_and_filters() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription();
        storage.insert_subscription(&sub).await.unwrap();

        for i in 0..25 {
            storage.insert_attempt(&attempt_for(&sub, i % 5 == 0)).await.unwrap();
        }

        let first = storage.list_attempts(&sub.id, &AttemptQuery::new()).await.unwrap();
        assert_eq!(first.total, 25);
        assert_eq!(first.items.len(), 20);

        let second = storage
            .list_attempts(&sub.id, &AttemptQuery::new().page(2, 20))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 5);

        let successes = storage
            .list_attempts(&sub.id, &AttemptQuery::new().success(true))
            .await
            .unwrap();
        assert_eq!(successes.total, 5);
        assert!(successes.items.iter().all(|a| a.is_success));
    }

    #[tokio::test]
    async fn test_pending_jobs_exclude_settled() {
        let storage = InMemoryWebhookStorage::new();
        let sub = subscription();
        let event = DomainEvent::new("dataset.published", EventPayload::empty());

        let pending = DeliveryJob::new(&sub.id, event.clone(), 5);
        let mut settled = DeliveryJob::new(&sub.id, event, 5);
        settled.mark_succeeded();

        storage.save_job(&pending).await.unwrap();
        storage.save_job(&settled).await.unwrap();

        let jobs = storage.list_pending_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, pending.id);

        assert_eq!(storage.delete_jobs_for_subscription(&sub.id).await.unwrap(), 2);
    }
}
