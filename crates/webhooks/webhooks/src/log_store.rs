//! Delivery log store.
//!
//! Append-only writer for delivery attempts and the only component that
//! mutates subscription counters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryAttempt, DeliveryJob, JobState};
use crate::error::{WebhookError, WebhookResult};
use crate::storage::{AttemptPage, AttemptQuery, WebhookStorage};
use crate::subscription::Subscription;

/// Aggregate delivery statistics for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    /// Subscription ID.
    pub subscription_id: String,
    /// Jobs settled successfully.
    pub success_count: u64,
    /// Jobs that exhausted their attempt budget.
    pub failure_count: u64,
    /// Attempts logged.
    pub total_attempts: usize,
    /// Attempts answered with 2xx.
    pub successful_attempts: usize,
    /// Attempts that failed.
    pub failed_attempts: usize,
    /// Share of settled jobs that succeeded, in percent.
    pub success_rate: f64,
    /// Mean latency over all logged attempts.
    pub average_response_time_ms: f64,
    /// When a job last settled.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Delivery log store.
#[derive(Clone)]
pub struct DeliveryLogStore {
    storage: Arc<dyn WebhookStorage>,
}

impl DeliveryLogStore {
    /// Creates a log store over a storage backend.
    pub fn new(storage: Arc<dyn WebhookStorage>) -> Self {
        Self { storage }
    }

    /// Appends one attempt row.
    pub async fn record_attempt(&self, attempt: &DeliveryAttempt) -> WebhookResult<()> {
        self.storage.insert_attempt(attempt).await
    }

    /// Applies the single counter increment owed by a settled job.
    pub async fn settle(&self, job: &DeliveryJob) -> WebhookResult<Option<Subscription>> {
        let success = match job.state {
            JobState::Succeeded => true,
            JobState::TerminalFailure => false,
            state => {
                return Err(WebhookError::Storage(format!(
                    "job {} is not settled (state {:?})",
                    job.id, state
                )));
            }
        };

        let updated = self
            .storage
            .settle_subscription(&job.subscription_id, success, Utc::now())
            .await?;

        if updated.is_none() {
            tracing::debug!(
                job_id = %job.id,
                subscription_id = %job.subscription_id,
                "Settled job for a deleted subscription"
            );
        }

        Ok(updated)
    }

    /// Gets one attempt.
    pub async fn get_attempt(&self, id: &str) -> WebhookResult<DeliveryAttempt> {
        self.storage
            .get_attempt(id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("delivery log {}", id)))
    }

    /// Lists attempts of a subscription, newest first.
    pub async fn list_attempts(
        &self,
        subscription_id: &str,
        query: &AttemptQuery,
    ) -> WebhookResult<AttemptPage> {
        self.storage.list_attempts(subscription_id, query).await
    }

    /// Deletes every attempt of a subscription (first step of cascade delete).
    pub async fn delete_subscription_logs(&self, subscription_id: &str) -> WebhookResult<usize> {
        self.storage.delete_attempts_for_subscription(subscription_id).await
    }

    /// Administrative counter reset.
    pub async fn reset_counters(&self, subscription_id: &str) -> WebhookResult<Subscription> {
        let subscription = self
            .storage
            .reset_counters(subscription_id)
            .await?
            .ok_or_else(|| WebhookError::subscription_not_found(subscription_id))?;

        tracing::info!(subscription_id, "Reset delivery counters");
        Ok(subscription)
    }

    /// Deletes attempts older than `days` days.
    ///
    /// A window reaching past the representable date range purges nothing.
    pub async fn purge_older_than(&self, days: u32) -> WebhookResult<usize> {
        let window = chrono::Duration::days(i64::from(days));
        let Some(cutoff) = Utc::now().checked_sub_signed(window) else {
            tracing::warn!(days, "Retention window out of range, skipping purge");
            return Ok(0);
        };
        let removed = self.storage.delete_attempts_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, days, "Purged old delivery logs");
        }
        Ok(removed)
    }

    /// Computes statistics for a subscription.
    pub async fn statistics(
        &self,
        subscription: &Subscription,
    ) -> WebhookResult<SubscriptionStats> {
        let attempts = self
            .storage
            .list_attempts(&subscription.id, &AttemptQuery::all())
            .await?
            .items;

        let successful_attempts = attempts.iter().filter(|a| a.is_success).count();
        let average_response_time_ms = if attempts.is_empty() {
            0.0
        } else {
            attempts.iter().map(|a| a.response_time_ms as f64).sum::<f64>() / attempts.len() as f64
        };

        let settled = subscription.success_count + subscription.failure_count;
        let success_rate = if settled == 0 {
            0.0
        } else {
            subscription.success_count as f64 * 100.0 / settled as f64
        };

        Ok(SubscriptionStats {
            subscription_id: subscription.id.clone(),
            success_count: subscription.success_count,
            failure_count: subscription.failure_count,
            total_attempts: attempts.len(),
            successful_attempts,
            failed_attempts: attempts.len() - successful_attempts,
            success_rate,
            average_response_time_ms,
            last_triggered_at: subscription.last_triggered_at,
        })
    }
}
