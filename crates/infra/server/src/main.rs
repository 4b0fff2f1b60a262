//! Portal webhooks server binary.

use std::sync::Arc;

use portal_webhooks::WebhookSystem;
use portal_webhooks_server::{WebhookServer, load_from};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_from(std::env::args().nth(1))?;

    let level: tracing::Level = config.server.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let system = Arc::new(WebhookSystem::new(config.webhooks.clone())?);
    let recovered = system.recover_pending().await?;
    tracing::info!(recovered, "Webhook engine ready");

    WebhookServer::new(config.server, system).run().await?;

    Ok(())
}
