//! rk-daemon entry point.
//!
//! Thin: parses args, sets up tracing, loads config, wires the sync pipeline,
//! spawns the controller and the transport, and serves the status routes.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use rk_config::{load_layered_yaml, report_unused_keys, resolve_secrets, UnusedKeyPolicy};
use rk_daemon::{routes, state, transport, wiring};
use tokio::sync::watch;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "rk-daemon", about = "Keeps a local replica consistent with an upstream stream")]
struct Args {
    /// Config layers, merged in order (later overrides earlier).
    #[arg(long = "config", required = true)]
    config: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let args = Args::parse();

    let loaded = load_layered_yaml(args.config.as_slice()).context("config load failed")?;
    info!(config_hash = %loaded.config_hash, layers = args.config.len(), "config loaded");

    let unused = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "CONFIG_UNUSED_KEYS");
    }

    let settings = loaded.settings()?;
    let secrets = resolve_secrets(&settings)?;
    let wired = wiring::build(&settings, &secrets)?;

    let shared = Arc::new(state::AppState::new(wired.ctx.clone()));
    state::spawn_heartbeat(Arc::clone(&shared), Duration::from_secs(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = tokio::spawn(wired.controller.run(shutdown_rx.clone()));
    let listener = tokio::spawn(transport::run_transport(
        wired.transport,
        wired.processor,
        shutdown_rx,
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env()
        .map(Ok)
        .unwrap_or_else(|| settings.daemon.bind_addr.parse::<SocketAddr>())
        .context("CONFIG_INVALID /daemon/bind_addr")?;
    info!("rk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server crashed")?;

    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    // A resync in flight is never cancelled; do not wait on it forever.
    let grace = Duration::from_secs(5);
    if tokio::time::timeout(grace, listener).await.is_err() {
        warn!("transport did not stop within grace period");
    }
    if tokio::time::timeout(grace, controller).await.is_err() {
        warn!("controller did not stop within grace period");
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("RK_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
