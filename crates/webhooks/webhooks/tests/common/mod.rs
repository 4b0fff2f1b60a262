//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use portal_webhooks::{
    DeliveryError, InMemoryWebhookStorage, NewSubscription, OutboundRequest, Subscription,
    TransportResponse, WebhookConfig, WebhookStorage, WebhookSystem, WebhookTransport,
};

/// A request as seen by the fake subscriber.
#[derive(Debug, Clone)]
pub struct Received {
    pub at: Instant,
    pub request: OutboundRequest,
}

impl Received {
    pub fn header(&self, name: &str) -> &str {
        self.request.header(name).unwrap_or_default()
    }
}

/// Fake subscriber answering with a scripted list of statuses, then 200.
#[derive(Default)]
pub struct ScriptedTransport {
    statuses: Mutex<VecDeque<u16>>,
    received: Mutex<Vec<Received>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            received: Mutex::new(Vec::new()),
        })
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.received.lock().await.len()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, DeliveryError> {
        self.received.lock().await.push(Received {
            at: Instant::now(),
            request: request.clone(),
        });
        let status = self.statuses.lock().await.pop_front().unwrap_or(200);
        Ok(TransportResponse::new(status, format!("status {}", status)))
    }
}

pub struct Harness {
    pub system: WebhookSystem,
    pub storage: Arc<InMemoryWebhookStorage>,
    pub transport: Arc<ScriptedTransport>,
}

impl Harness {
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_config(WebhookConfig::default(), transport)
    }

    pub fn with_config(config: WebhookConfig, transport: Arc<ScriptedTransport>) -> Self {
        Self::with_storage(config, Arc::new(InMemoryWebhookStorage::new()), transport)
    }

    pub fn with_storage(
        config: WebhookConfig,
        storage: Arc<InMemoryWebhookStorage>,
        transport: Arc<ScriptedTransport>,
    ) -> Self {
        let system = WebhookSystem::with_parts(config, storage.clone(), transport.clone())
            .expect("valid webhook config");
        Self {
            system,
            storage,
            transport,
        }
    }

    pub async fn subscribe(&self, url: &str, events: &[&str]) -> Subscription {
        self.system
            .registry()
            .create(
                NewSubscription::new("Test subscriber", url)
                    .events(events.iter().copied())
                    .secret("s3cret"),
            )
            .await
            .expect("subscription created")
    }

    pub async fn reload(&self, subscription: &Subscription) -> Subscription {
        self.storage
            .get_subscription(&subscription.id)
            .await
            .expect("storage available")
            .expect("subscription exists")
    }
}
