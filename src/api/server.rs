use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{download_file, get_status, health, submit_download},
    state::AppState,
};
use crate::config::Config;
use crate::janitor::Janitor;
use crate::storage::ArtifactStore;
use crate::worker::{CommandFetcher, WorkerPool};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", post(submit_download))
        .route("/status/{job_id}", get(get_status))
        .route("/files/{filename}", get(download_file))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        // Transparently decode gzip request bodies
        .layer(RequestDecompressionLayer::new())
}

/// Start the store, worker pool, janitor and HTTP server; returns after a
/// graceful shutdown has drained in-flight jobs.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    info!(backend = ?config.store.backend, "Opening store");
    let store = crate::store::open(&config.store)
        .await
        .map_err(|e| format!("Failed to open store: {}", e))?;

    let artifacts = ArtifactStore::open(&config.artifacts.dir)
        .map_err(|e| format!("Failed to open artifact directory: {}", e))?;

    let fetcher = Arc::new(CommandFetcher::from_config(&config.fetcher));
    let state = AppState::new(config, store.clone(), artifacts.clone());

    let pool = WorkerPool::spawn(
        Arc::new(state.worker_context(fetcher)),
        state.config.workers.count,
    );

    let janitor = Janitor::new(
        artifacts,
        store.clone(),
        state.metrics.clone(),
        state.config.artifacts.retention.into(),
        state.config.artifacts.sweep_interval.into(),
    )
    .spawn();

    let app = router(state);
    let listener = TcpListener::bind(address).await?;
    info!(%address, "fastunduh API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining workers");
    pool.shutdown().await;
    janitor.shutdown().await;
    store.flush().await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
