use std::sync::Arc;

use anyhow::Context;

use switchyard_infra::Config;
use switchyard_server::app::{self, App, Collaborators};
use switchyard_server::features::session_timeouts::InMemorySessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchyard_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(instance_id = %config.instance_id, "starting switchyard");

    let rt = app::build_runtime(config).await?;

    // Standalone mode: no flow engine attached, sessions live in memory.
    let collaborators = Collaborators {
        sessions: Arc::new(InMemorySessionStore::default()),
    };
    let app = App::start(rt, collaborators)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    app.shutdown().await;
    Ok(())
}
