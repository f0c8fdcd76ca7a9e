//! Local Credential Bridge
//!
//! Single-binary service that:
//! 1. Emulates the local identity endpoint (`/metadata/identity/oauth2/token`)
//! 2. Proves callers can read the host's tokens directory via a file challenge
//! 3. Resolves tokens from the credentials already on the host
//! 4. Deletes challenge files once used, expired or at shutdown

mod bridge;
mod config;
mod error;
mod metrics;
mod provider_impl;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use file_challenge::{AuthGate, ChallengeIssuer, evict_challenge_file};
use metrics_exporter_prometheus::PrometheusHandle;
use secret_cache::{Eviction, SecretCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::{BridgeEndpoint, TOKEN_PATH, TokenQuery};
use crate::config::Config;
use crate::error::BridgeError;
use crate::metrics::ServiceMetrics;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    bridge: Arc<BridgeEndpoint>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route(TOKEN_PATH, get(token_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Eviction handler run by the sweeper: count it, then delete the file.
fn on_eviction(eviction: Eviction<PathBuf>) {
    metrics::record_eviction(eviction.reason.label());
    evict_challenge_file(eviction);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting local-credential-bridge");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config = match Config::resolve_path(cli_config_path) {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Config::load(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => {
            info!("no configuration file, using defaults");
            Config::from_env().context("invalid configuration")?
        }
    };

    info!(
        listen_addr = %config.server.listen_addr,
        challenge_enabled = config.challenge.enabled,
        local_tokens_path = %config.challenge.local_tokens_path,
        remote_tokens_path = %config.challenge.remote_tokens_path,
        challenge_timeout_secs = config.challenge.timeout_secs,
        provider = ?config.provider.kind,
        "configuration loaded"
    );

    let provider = provider_impl::build_provider(&config.provider)
        .context("failed to configure token provider")?;

    let cache: Arc<SecretCache<PathBuf>> = Arc::new(SecretCache::new());
    let gate = if config.challenge.enabled {
        let issuer = ChallengeIssuer::new(cache.clone(), config.challenge.settings());
        AuthGate::new(cache.clone(), issuer)
    } else {
        warn!("file challenge auth disabled, every caller that reaches the port gets tokens");
        AuthGate::disabled()
    };

    let sweeper = secret_cache::spawn_sweep_task(
        cache.clone(),
        config.challenge.sweep_interval(),
        on_eviction,
    );

    let app_state = AppState {
        bridge: Arc::new(BridgeEndpoint::new(gate, provider)),
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    sweeper.abort();
    let outstanding = cache.drain();
    info!(
        outstanding = outstanding.len(),
        "removing outstanding challenge files"
    );
    for eviction in outstanding {
        on_eviction(eviction);
    }

    info!("shutdown complete");
    Ok(())
}

/// Token endpoint: `GET /metadata/identity/oauth2/token?resource=<r>`.
async fn token_handler(
    State(state): State<AppState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let query = query
        .map(|Query(query)| query)
        .map_err(|rejection| BridgeError::InvalidRequest(rejection.body_text()));
    // Non-UTF-8 bytes become U+FFFD, which can never match an issued secret
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()));
    bridge::serve_token_request(
        &state.bridge,
        &state.metrics,
        query,
        authorization.as_deref(),
        request_id,
    )
    .await
}

/// Health endpoint: JSON with status, challenge mode, live challenges,
/// provider id, uptime and request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gate = state.bridge.gate();
    let body = serde_json::json!({
        "status": "healthy",
        "file_challenge_auth": gate.is_enforced(),
        "outstanding_challenges": gate.outstanding_challenges(),
        "provider": state.bridge.provider_id(),
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
