use std::sync::Arc;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simplepay_observability::init();

    let config = simplepay_api::config::AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(?config, "starting simplepay");

    let services = simplepay_api::app::services::build_services(&config)
        .await
        .context("failed to wire services")?;
    let app = simplepay_api::app::build_app(Arc::new(services));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
