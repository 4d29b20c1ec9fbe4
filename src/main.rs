mod api;
mod config;
mod core;
mod executor;
mod harness;
mod languages;
mod models;
mod sandbox;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServiceConfig;
use crate::executor::{ExecutionLimits, Executor};
use crate::languages::LanguageRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("executor=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env();

    let languages = LanguageRegistry::load(config.languages_path.as_deref())?;
    match &config.languages_path {
        Some(path) => info!("Loaded language configurations from {}", path.display()),
        None => info!("Loaded built-in language configurations"),
    }

    let sandboxes = sandbox::provider_from_config(&config.sandbox)
        .await
        .context("Sandbox backend is not usable")?;
    info!("Using {} sandbox backend", sandboxes.name());

    let executor = Arc::new(Executor::new(languages, sandboxes, ExecutionLimits::default()));
    let app = api::routes(executor);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Executor listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Executor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight requests");
}
