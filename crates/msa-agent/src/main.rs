use std::sync::Arc;

use anyhow::Context;
use msa_agent::{AgentConfig, Supervisor, TracingObserver, http};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env()?;
    let addr = config.listen_addr;
    let server_root = config.server_root.clone();

    let supervisor = Supervisor::new(config, Arc::new(TracingObserver))
        .await
        .with_context(|| format!("load server root {}", server_root.display()))?;
    tracing::info!(
        server_root = %server_root.display(),
        instances = supervisor.registry().len().await,
        "registry loaded"
    );

    let app = http::router(supervisor.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "msa-agent HTTP listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down; killing attached servers");
    supervisor.shutdown().await;
    Ok(())
}
