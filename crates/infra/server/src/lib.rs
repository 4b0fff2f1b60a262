//! # Portal Webhooks Server
//!
//! Admin HTTP API over the webhook engine, for operators and the portal's
//! administrative UI.

mod api;
mod config;

pub use api::{ApiError, AppState};
pub use config::{AppConfig, CONFIG_ENV, ConfigError, ServerConfig, load_config, load_from};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use portal_webhooks::WebhookSystem;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Builds the admin router.
pub fn router(system: Arc<WebhookSystem>) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
            tracing::info_span!("request", method = %request.method(), uri = %request.uri())
        });

    Router::new()
        .route("/health", get(api::health))
        .route(
            "/webhooks",
            post(api::create_subscription).get(api::list_subscriptions),
        )
        .route(
            "/webhooks/{id}",
            get(api::get_subscription)
                .patch(api::toggle_subscription)
                .put(api::update_subscription)
                .delete(api::delete_subscription),
        )
        .route("/webhooks/{id}/logs", get(api::list_logs))
        .route("/webhooks/{id}/stats", get(api::subscription_stats))
        .route("/webhooks/{id}/test", post(api::test_subscription))
        .route("/webhooks/{id}/reset-stats", post(api::reset_stats))
        .route("/webhooks/logs/{log_id}/retry", post(api::retry_log))
        .layer(trace_layer)
        .with_state(system)
}

/// The admin server.
pub struct WebhookServer {
    config: ServerConfig,
    system: Arc<WebhookSystem>,
}

impl WebhookServer {
    /// Creates a server around a running webhook system.
    pub fn new(config: ServerConfig, system: Arc<WebhookSystem>) -> Self {
        Self { config, system }
    }

    /// The webhook system served.
    pub fn system(&self) -> &Arc<WebhookSystem> {
        &self.system
    }

    /// Binds and serves until ctrl-c, then stops the delivery workers.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        tracing::info!("Webhook admin API listening on {}", listener.local_addr()?);

        axum::serve(listener, router(self.system.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.system.shutdown();
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
