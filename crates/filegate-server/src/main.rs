use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use filegate_core::backend::{AnyBackend, FileBackend, FlatBackend, MemDriver};
use filegate_core::ManagerBuilder;
use filegate_schema::{BackendUrl, Scheme};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod conditional;
mod errors;
mod handlers;
mod middleware;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filegate with config: {:?}", cfg);

    // --- Build every configured backend ---
    let mut builder = ManagerBuilder::new();
    let mut backend_urls = BTreeMap::new();
    for spec in &cfg.backends {
        let backend = build_backend(spec).await?;
        backend_urls.insert(spec.name.clone(), format!("{}://{}{}", spec.scheme.as_str(), spec.name, spec.path));
        builder = builder.with_backend(backend);
    }
    let manager = Arc::new(builder.build());

    let state = AppState {
        manager: manager.clone(),
        backend_urls: Arc::new(backend_urls),
    };

    // --- Build router ---
    let app: Router = routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, closing backends");
    manager.close().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}

/// Construct the concrete driver for one configured backend and wrap it in
/// the [`AnyBackend`] tagged union the manager dispatches through.
async fn build_backend(spec: &BackendUrl) -> Result<AnyBackend> {
    match spec.scheme {
        Scheme::File => {
            let root = PathBuf::from(&spec.path);
            let backend = FileBackend::new(spec.name.clone(), root)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("building file backend `{}`", spec.name))?;
            Ok(AnyBackend::File(backend))
        }
        Scheme::Mem => Ok(AnyBackend::Mem(FlatBackend::new(
            spec.name.clone(),
            spec.bucket_prefix(),
            MemDriver::new(),
        ))),
        #[cfg(feature = "s3")]
        Scheme::S3 => {
            let endpoint = std::env::var("FILEGATE_S3_ENDPOINT").ok();
            let driver = filegate_core::backend::S3Driver::new(spec.name.clone(), endpoint.as_deref()).await;
            Ok(AnyBackend::S3(FlatBackend::new(spec.name.clone(), spec.bucket_prefix(), driver)))
        }
        #[cfg(not(feature = "s3"))]
        Scheme::S3 => anyhow::bail!(
            "backend `{}` requests scheme `s3` but this binary was built without the `s3` feature",
            spec.name
        ),
        #[cfg(feature = "gcs")]
        Scheme::Gs => {
            let driver = filegate_core::backend::GcsDriver::new(spec.name.clone())
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("building gcs backend `{}`", spec.name))?;
            Ok(AnyBackend::Gcs(FlatBackend::new(spec.name.clone(), spec.bucket_prefix(), driver)))
        }
        #[cfg(not(feature = "gcs"))]
        Scheme::Gs => anyhow::bail!(
            "backend `{}` requests scheme `gs` but this binary was built without the `gcs` feature",
            spec.name
        ),
    }
}

/// Waits for SIGINT or SIGTERM, letting `axum::serve` stop accepting new
/// connections while in-flight multipart uploads finish their current part
/// (§9 "Graceful shutdown", supplemented in SPEC_FULL.md).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
