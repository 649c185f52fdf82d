//! Microgig Server - gig-work lifecycle engine over HTTP
//!
//! Exposes the reservation state machine, the work-proof review workflow,
//! the escrow wallet and the cron sweep endpoints. State lives in-process;
//! the external scheduler drives the sweeps through the cron routes.
//!
//! ```bash
//! # Start on the default port
//! cargo run -p microgig-server
//!
//! # Custom port and credentials
//! MICROGIG_ADMIN_TOKEN=... MICROGIG_CRON_SECRET=... \
//!     cargo run -p microgig-server -- --port 9090
//! ```

mod auth;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::auth::AuthConfig;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "microgig-server")]
#[command(about = "Microgig lifecycle engine API")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "MICROGIG_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "MICROGIG_PORT", default_value = "8080")]
    port: u16,

    /// Admin token for the x-admin-token header
    #[arg(long, env = "MICROGIG_ADMIN_TOKEN", default_value = "change-me")]
    admin_token: String,

    /// Shared secret for scheduler-originated cron calls
    #[arg(long, env = "MICROGIG_CRON_SECRET", default_value = "change-me")]
    cron_secret: String,

    /// Log filter when RUST_LOG is unset (e.g. info, microgig=debug)
    #[arg(long, env = "MICROGIG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if args.admin_token == "change-me" || args.cron_secret == "change-me" {
        tracing::warn!("running with default credentials; set MICROGIG_ADMIN_TOKEN and MICROGIG_CRON_SECRET");
    }

    let state = Arc::new(AppState::new(AuthConfig {
        admin_token: args.admin_token,
        cron_secret: args.cron_secret,
    }));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "microgig-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
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
