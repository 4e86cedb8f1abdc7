//! Agent API server.
//!
//! Run with: cargo run -p mcp-agents-api-server -- --server path/to/server.py --interpreter python3
//!
//! Then `curl -d '{"query":"2+2"}' -H 'content-type: application/json' localhost:8000/generate`.

mod config;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use mcp_agents_http::router;
use mcp_agents_ollama::OllamaFactory;
use mcp_agents_session::{SessionManager, StdioLauncher};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Cli::parse().settings()?;
    let factory = OllamaFactory::new(settings.ollama)?;
    let launcher = StdioLauncher::new(settings.transport, settings.session);
    let manager = Arc::new(SessionManager::new(launcher, factory));

    let server = settings.command.path.display().to_string();
    manager
        .connect(settings.command)
        .await
        .with_context(|| format!("failed to start agent for MCP server {server}"))?;
    let tools: Vec<String> = manager.tools()?.into_iter().map(|t| t.name).collect();
    tracing::info!(%server, ?tools, "agent ready");

    let app = router(Arc::clone(&manager), &settings.cors);
    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    tracing::info!("Server listening on http://{}", settings.bind);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("shutting down agent");
    if let Err(e) = manager.shutdown().await {
        tracing::error!(error = %e, "agent shutdown failed");
    }
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!(error = %e, "ctrl-c handler failed");
        }
    }
}
