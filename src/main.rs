use anyhow::{Context, Result};
use axum::Router;
use flatstore::{config::AppConfig, routes, services::storage_service::StorageService};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flatstore=info")),
        )
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting flatstore with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    tokio::fs::create_dir_all(&cfg.storage_dir)
        .await
        .with_context(|| format!("creating storage directory {}", cfg.storage_dir.display()))?;

    // --- Initialize core service ---
    let storage = StorageService::open(&cfg.storage_dir, cfg.lock_timeout)
        .await
        .with_context(|| format!("opening store at {}", cfg.storage_dir.display()))?;

    let report = storage.check_consistency().await?;
    if report.is_consistent() {
        tracing::info!("Catalogs consistent across {} buckets", report.buckets_checked);
    } else {
        tracing::warn!(
            "Catalogs have {} issue(s) across {} buckets; serving anyway",
            report.issues.len(),
            report.buckets_checked
        );
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(storage);

    // --- Start server ---
    let listener = bind(&cfg).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Bind the configured address. A wildcard host that the process may not
/// bind falls back to loopback on the same port.
async fn bind(cfg: &AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!("Permission denied binding to {} ({}); using {}", addr, err, fallback);
            TcpListener::bind(&fallback)
                .await
                .with_context(|| format!("binding {}", fallback))
        }
        Err(err) => Err(err).with_context(|| format!("binding {}", addr)),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
