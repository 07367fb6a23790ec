use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tower_http::trace::TraceLayer;

use turnstile::config::TurnstileConfig;
use turnstile::http::{AdmissionLayer, GatewayServer};
use turnstile::ratelimit::RateLimiter;

/// Per-caller request admission gateway.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting Turnstile Admission Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match args.config.as_deref() {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    info!(
        listen_addr = %config.server.listen_addr,
        capacity = config.limits.capacity,
        window_secs = config.limits.window_secs,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(&config.limits)?);
    info!("Rate limiter initialized");

    // A placeholder upstream handler guarded by the admission layer; the
    // status endpoint stays outside the quota.
    let app = Router::new()
        .route("/", get(index))
        .layer(AdmissionLayer::new(
            Arc::clone(&limiter),
            config.limits.unknown_callers,
        ))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&limiter));

    let server = GatewayServer::new(config.server.listen_addr, app);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    // Stop the background reclaimer deterministically before exiting.
    limiter.shutdown().await;

    info!("Turnstile Admission Gateway stopped");
    Ok(())
}

async fn index() -> &'static str {
    "OK\n"
}

async fn status(State(limiter): State<Arc<RateLimiter>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "active_callers": limiter.active_callers(),
        "window_secs": limiter.window().as_secs(),
    }))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
