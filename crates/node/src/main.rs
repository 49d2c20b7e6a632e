use anyhow::Context;

use meshsync_infra::IntegrationConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meshsync_observability::init();

    let config = IntegrationConfig::from_env().context("invalid configuration")?;
    let node = meshsync_node::app::start(&config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    node.shutdown().await;
    Ok(())
}
