//! Retry scheduler and worker pool.
//!
//! Jobs flow through a bounded channel shared by a fixed set of workers.
//! Failed attempts sleep on a timer task, never on a worker, and are pushed
//! back onto the channel once their backoff delay has elapsed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::WebhookConfig;
use crate::delivery::{DeliveryJob, JobState};
use crate::dispatcher::{DeliveryOutcome, Dispatcher};
use crate::error::{WebhookError, WebhookResult};
use crate::log_store::DeliveryLogStore;
use crate::retry::{BackoffSchedule, RetryStrategy};
use crate::storage::WebhookStorage;

struct SchedulerInner {
    storage: Arc<dyn WebhookStorage>,
    logs: DeliveryLogStore,
    dispatcher: Arc<Dispatcher>,
    backoff: BackoffSchedule,
    tx: mpsc::Sender<DeliveryJob>,
    outstanding: watch::Sender<usize>,
    closed: AtomicBool,
    /// Jobs this process is driving, queued or waiting on a retry timer.
    owned: std::sync::Mutex<HashSet<String>>,
}

/// Drives delivery jobs from pending to a terminal state.
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Keeps the scheduler from reporting idle while held.
pub struct WorkGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.inner.end();
    }
}

impl RetryScheduler {
    /// Spawns the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        config: &WebhookConfig,
        storage: Arc<dyn WebhookStorage>,
        logs: DeliveryLogStore,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (outstanding, _) = watch::channel(0usize);

        let inner = Arc::new(SchedulerInner {
            storage,
            logs,
            dispatcher,
            backoff: config.backoff(),
            tx,
            outstanding,
            closed: AtomicBool::new(false),
            owned: std::sync::Mutex::new(HashSet::new()),
        });

        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.worker_count.max(1))
            .map(|worker| {
                let inner = inner.clone();
                let rx = rx.clone();
                tokio::spawn(async move { worker_loop(worker, rx, inner).await })
            })
            .collect();

        tracing::info!(workers = config.worker_count, "Started webhook delivery workers");

        Self {
            inner,
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Persists a new job and queues its first attempt.
    ///
    /// Waits for queue capacity when the channel is full.
    pub async fn submit(&self, job: DeliveryJob) -> WebhookResult<()> {
        if self.is_closed() {
            return Err(WebhookError::Shutdown);
        }

        self.inner.claim(&job.id);
        if let Err(e) = self.inner.storage.save_job(&job).await {
            self.inner.release(&job.id);
            return Err(e);
        }
        self.inner.begin();

        let job_id = job.id.clone();
        if self.inner.tx.send(job).await.is_err() {
            self.inner.release(&job_id);
            self.inner.end();
            return Err(WebhookError::Shutdown);
        }
        Ok(())
    }

    /// Re-queues unsettled jobs left in storage, honoring remaining delays.
    ///
    /// A job found in flight was interrupted mid-attempt and is tried again
    /// under the same attempt number. Jobs this scheduler is already driving
    /// are skipped, so calling this more than once is harmless.
    pub async fn recover(&self) -> WebhookResult<usize> {
        if self.is_closed() {
            return Err(WebhookError::Shutdown);
        }

        let jobs = self.inner.storage.list_pending_jobs().await?;
        let now = Utc::now();
        let mut count = 0;

        for job in jobs {
            if !self.inner.claim(&job.id) {
                continue;
            }
            count += 1;
            let delay = match job.state {
                JobState::RetryScheduled => job.remaining_delay(now),
                _ => Duration::ZERO,
            };
            self.inner.begin();
            if delay.is_zero() {
                self.inner.clone().requeue(job).await;
            } else {
                self.inner.clone().requeue_after(job, delay);
            }
        }

        if count > 0 {
            tracing::info!(jobs = count, "Recovered pending webhook jobs");
        }
        Ok(count)
    }

    /// Jobs and publications not yet settled.
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Marks a unit of work that is not a job yet.
    pub fn hold(&self) -> WorkGuard {
        self.inner.begin();
        WorkGuard {
            inner: self.inner.clone(),
        }
    }

    /// Waits until every job settled or was dropped.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // Only fails if the sender is dropped, which `self` prevents.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Whether the scheduler was shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stops the workers. Unsettled jobs stay in storage for [`recover`].
    ///
    /// [`recover`]: Self::recover
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
        self.inner.outstanding.send_replace(0);

        tracing::info!("Webhook delivery workers stopped");
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SchedulerInner {
    fn begin(&self) {
        self.outstanding.send_modify(|n| *n += 1);
    }

    fn end(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns false if the job is already owned.
    fn claim(&self, job_id: &str) -> bool {
        match self.owned.lock() {
            Ok(mut owned) => owned.insert(job_id.to_string()),
            Err(_) => false,
        }
    }

    fn release(&self, job_id: &str) {
        if let Ok(mut owned) = self.owned.lock() {
            owned.remove(job_id);
        }
    }

    async fn process(self: &Arc<Self>, mut job: DeliveryJob) {
        let subscription = match self.storage.get_subscription(&job.subscription_id).await {
            Ok(Some(subscription)) if subscription.is_active => subscription,
            Ok(Some(_)) => {
                tracing::debug!(job_id = %job.id, "Dropping job for inactive subscription");
                self.discard(&job).await;
                return;
            }
            Ok(None) => {
                tracing::debug!(job_id = %job.id, "Dropping job for deleted subscription");
                self.discard(&job).await;
                return;
            }
            Err(e) => {
                // No attempt was made, so the budget is untouched.
                tracing::error!(job_id = %job.id, "Failed to load subscription: {}", e);
                let delay = self.backoff.next_delay(1).unwrap_or(Duration::from_secs(1));
                self.clone().requeue_after(job, delay);
                return;
            }
        };

        job.mark_in_flight();
        self.persist(&job).await;

        match self.dispatcher.deliver(&subscription, &job).await {
            DeliveryOutcome::Success(_) => {
                job.mark_succeeded();
                self.finish(job).await;
            }
            DeliveryOutcome::TerminalFailure(_, error) => {
                job.mark_terminal(error.to_string());
                self.finish(job).await;
            }
            DeliveryOutcome::RetryableFailure(_, error) => {
                match self.backoff.next_delay(job.attempt) {
                    Some(delay) => {
                        job.schedule_retry(delay, error.to_string());
                        self.persist(&job).await;
                        tracing::debug!(
                            job_id = %job.id,
                            next_attempt = job.attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Scheduled webhook retry"
                        );
                        self.clone().requeue_after(job, delay);
                    }
                    None => {
                        job.mark_terminal(error.to_string());
                        self.finish(job).await;
                    }
                }
            }
        }
    }

    async fn finish(&self, job: DeliveryJob) {
        if let Err(e) = self.logs.settle(&job).await {
            tracing::error!(job_id = %job.id, "Failed to settle job: {}", e);
        }
        if job.state == JobState::TerminalFailure {
            tracing::warn!(
                job_id = %job.id,
                subscription_id = %job.subscription_id,
                attempts = job.attempt,
                "Webhook delivery failed permanently"
            );
        }
        self.discard(&job).await;
    }

    async fn discard(&self, job: &DeliveryJob) {
        if let Err(e) = self.storage.delete_job(&job.id).await {
            tracing::warn!(job_id = %job.id, "Failed to delete job: {}", e);
        }
        self.release(&job.id);
        self.end();
    }

    async fn persist(&self, job: &DeliveryJob) {
        if let Err(e) = self.storage.save_job(job).await {
            tracing::warn!(job_id = %job.id, "Failed to persist job: {}", e);
        }
    }

    fn requeue_after(self: Arc<Self>, job: DeliveryJob, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.requeue(job).await;
        });
    }

    async fn requeue(self: Arc<Self>, mut job: DeliveryJob) {
        if self.is_closed() {
            return;
        }

        job.mark_pending();
        self.persist(&job).await;
        let job_id = job.id.clone();
        if self.tx.send(job).await.is_err() {
            self.release(&job_id);
            self.end();
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
    inner: Arc<SchedulerInner>,
) {
    tracing::trace!(worker, "Webhook worker started");

    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };
        inner.process(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{OutboundRequest, TransportResponse, WebhookTransport};
    use crate::error::DeliveryError;
    use crate::storage::{AttemptQuery, InMemoryWebhookStorage};
    use crate::subscription::{NewSubscription, Subscription};
    use async_trait::async_trait;
    use portal_events::{DomainEvent, EventPayload};

    struct FixedStatus(u16);

    #[async_trait]
    impl WebhookTransport for FixedStatus {
        async fn send(
            &self,
            _request: &OutboundRequest,
        ) -> Result<TransportResponse, DeliveryError> {
            Ok(TransportResponse::new(self.0, ""))
        }
    }

    async fn setup(
        status: u16,
        config: WebhookConfig,
    ) -> (RetryScheduler, Arc<InMemoryWebhookStorage>, Subscription) {
        let storage = Arc::new(InMemoryWebhookStorage::new());
        let logs = DeliveryLogStore::new(storage.clone());
        let transport = Arc::new(FixedStatus(status));
        let dispatcher = Arc::new(Dispatcher::new(&config, transport, logs.clone()));
        let sub = Subscription::from_request(
            NewSubscription::new("feed", "https://example.com/hook").events(["dataset.published"]),
        )
        .unwrap();
        storage.insert_subscription(&sub).await.unwrap();

        let scheduler = RetryScheduler::start(&config, storage.clone(), logs, dispatcher);
        (scheduler, storage, sub)
    }

    fn job(sub: &Subscription, max_attempts: u32) -> DeliveryJob {
        DeliveryJob::new(
            &sub.id,
            DomainEvent::new("dataset.published", EventPayload::empty()),
            max_attempts,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_settles_once() {
        let (scheduler, storage, sub) = setup(200, WebhookConfig::default()).await;

        scheduler.submit(job(&sub, 5)).await.unwrap();
        scheduler.wait_idle().await;

        let sub = storage.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.success_count, 1);
        assert_eq!(sub.failure_count, 0);
        assert!(storage.list_pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_settles_as_failure() {
        let (scheduler, storage, sub) = setup(503, WebhookConfig::default()).await;

        scheduler.submit(job(&sub, 3)).await.unwrap();
        scheduler.wait_idle().await;

        let page = storage.list_attempts(&sub.id, &AttemptQuery::new()).await.unwrap();
        assert_eq!(page.total, 3);
        let sub = storage.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.success_count, 0);
        assert_eq!(sub.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_subscription_job_is_dropped() {
        let (scheduler, storage, sub) = setup(200, WebhookConfig::default()).await;
        storage.set_subscription_active(&sub.id, false).await.unwrap();

        scheduler.submit(job(&sub, 5)).await.unwrap();
        scheduler.wait_idle().await;

        let page = storage.list_attempts(&sub.id, &AttemptQuery::new()).await.unwrap();
        assert_eq!(page.total, 0);
        let sub = storage.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.success_count + sub.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_shutdown_fails() {
        let (scheduler, _, sub) = setup(200, WebhookConfig::default()).await;
        scheduler.shutdown();
        assert!(matches!(
            scheduler.submit(job(&sub, 5)).await,
            Err(WebhookError::Shutdown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_ignores_owned_jobs() {
        let (scheduler, storage, sub) = setup(503, WebhookConfig::default()).await;
        let stored = job(&sub, 5);
        storage.save_job(&stored).await.unwrap();

        scheduler.submit(job(&sub, 3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(scheduler.recover().await.unwrap(), 1);
        assert_eq!(scheduler.recover().await.unwrap(), 0);
        scheduler.wait_idle().await;

        let sub = storage.get_subscription(&sub.id).await.unwrap().unwrap();
        assert_eq!(sub.failure_count, 2);
        let page = storage.list_attempts(&sub.id, &AttemptQuery::new()).await.unwrap();
        assert_eq!(page.total, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_blocks_idle() {
        let (scheduler, _, _) = setup(200, WebhookConfig::default()).await;
        let guard = scheduler.hold();
        assert_eq!(scheduler.outstanding(), 1);
        drop(guard);
        assert_eq!(scheduler.outstanding(), 0);
        scheduler.wait_idle().await;
    }
}
