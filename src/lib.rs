use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod csrf;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod tasks;
pub mod users;
pub mod utils;

use config::Config;
use context::AppContext;

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received. Shutting down...");
}

/// Serve the router on `listener` until the process receives Ctrl-C.
pub async fn serve(app_context: Arc<AppContext>, listener: TcpListener) -> Result<()> {
    let router = routes::create_router(app_context);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")
}

pub async fn run() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_address = format!("0.0.0.0:{}", config.port);
    let mode = config.environment.as_str();

    let app_context = match AppContext::with_defaults(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            tracing::error!(error = %e, "Refusing to start with this configuration");
            return Err(anyhow::anyhow!(e));
        }
    };

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!(mode = mode, "Warden listening on http://{}", bind_address);

    serve(app_context, listener).await
}
