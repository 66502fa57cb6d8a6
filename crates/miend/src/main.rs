//! miend — face identification daemon.
//!
//! Startup order matters: the extractor loads first (fail fast — nothing
//! works without it), the reference gallery and patient registry load
//! with it, and only then does the HTTP listener come up.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod registry;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        listen = %config.listen_addr,
        references = %config.reference_dir.display(),
        threshold = config.match_threshold,
        "miend starting"
    );

    let mut extractor = mien_extract::OnnxExtractor::load(&config.model_dir)
        .context("loading extraction models")?;

    // Same extractor instance builds the gallery and serves queries, so
    // both sides of every comparison share one extraction profile.
    let load = mien_core::load_reference_set(&config.reference_dir, &mut extractor)
        .context("loading reference set")?;
    let references = Arc::new(load.references);
    if references.is_empty() {
        tracing::warn!("reference set is empty; every query will resolve to no-reference-data");
    }

    let registry = Arc::new(
        registry::PatientRegistry::from_path(&config.registry_path)
            .context("loading patient registry")?,
    );

    let engine = engine::spawn_engine(extractor);

    let state = http::AppState {
        engine,
        references,
        registry,
        match_threshold: config.match_threshold,
        started: Instant::now(),
    };
    let app = http::build_router(
        state,
        Duration::from_secs(config.request_timeout_secs),
        config.max_body_mb,
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "miend ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("miend shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
