use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mobile_gateway::bridge::upstream::WsConnector;
use mobile_gateway::config::{Config, SERVICE_NAME};
use mobile_gateway::context::AppContext;
use mobile_gateway::gate::{RequestShapingGate, spawn_sweeper};
use mobile_gateway::proxy::PassThroughClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        service = SERVICE_NAME,
        upstream = %config.upstream.base_url,
        events = %config.upstream.events_url,
        mount = %config.mount_prefix,
        window_secs = config.gate.window.as_secs(),
        ceiling = config.gate.ceiling,
        "starting gateway"
    );

    let gate = RequestShapingGate::new(config.gate.clone());
    let upstream = PassThroughClient::new(
        config.upstream.base_url.clone(),
        config.upstream.timeout_secs,
    );
    let connector = Arc::new(WsConnector::new(config.upstream.events_url.clone()));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let ctx = AppContext::new(config, gate, upstream, connector);

    spawn_sweeper(ctx.gate.clone(), ctx.config.gate.sweep_interval);

    let app = mobile_gateway::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(address = %addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
