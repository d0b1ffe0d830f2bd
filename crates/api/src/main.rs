use anyhow::Context;
use tracing::info;

use escrowdesk_api::app::build_app;
use escrowdesk_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    escrowdesk_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    info!(?config, "starting escrowdesk api");

    let app = build_app(&config).await.context("failed to wire services")?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
