//! Auth Refresh Proxy
//!
//! Single-binary Rust service that:
//! 1. Holds an OAuth refresh token and the current access token
//! 2. Listens for incoming requests and forwards them with the access token
//! 3. On an upstream 401, refreshes the token once for all affected requests
//!    and replays each of them with the new token

mod config;
mod error;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use oauth_refresh::{AccessToken, OAuthRefresher};
use refresh_coordinator::{Options, attach, predicate};
use transport::ReqwestTransport;

use crate::config::Config;
use crate::proxy::ProxyState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the refresher, transport and coordinator into the proxy state.
fn build_proxy_state(
    config: &Config,
    http: reqwest::Client,
    refresher: OAuthRefresher,
    access: AccessToken,
) -> ProxyState {
    let timeout = Duration::from_secs(config.proxy.timeout_secs);
    let transport = ReqwestTransport::new(http)
        .with_timeout(timeout)
        .with_headers(config.headers.iter().map(Into::into).collect());

    let client = attach(
        transport,
        refresher,
        Options {
            update_credential: Some(oauth_refresh::bearer_updater()),
            eligible: Some(predicate::status_codes(
                config.oauth.refresh_status_codes.clone(),
            )),
        },
    );

    ProxyState {
        client: Arc::new(client),
        access,
        upstream_url: config.proxy.upstream_url.clone(),
        timeout,
        requests_total: Arc::new(AtomicU64::new(0)),
        errors_total: Arc::new(AtomicU64::new(0)),
    }
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

    info!("starting auth-refresh-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let refresh_token = config
        .take_refresh_token()
        .context("no refresh token configured")?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        token_endpoint = %config.oauth.token_endpoint,
        refresh_status_codes = ?config.oauth.refresh_status_codes,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let http = reqwest::Client::new();
    let access = AccessToken::new(config.oauth.access_token.take());
    let mut refresher = OAuthRefresher::new(
        http.clone(),
        config.oauth.token_endpoint.clone(),
        refresh_token,
    )
    .with_access_token(access.clone());
    if let Some(client_id) = &config.oauth.client_id {
        refresher = refresher.with_client_id(client_id.clone());
    }

    // Without a starting access token every first request would 401; fetch one up front
    if access.get().is_none() {
        match refresher.refresh_once().await {
            Ok(_) => info!("obtained initial access token"),
            Err(e) => warn!(
                error = %e,
                "initial token refresh failed, will refresh on first unauthorized response"
            ),
        }
    }

    let proxy_state = build_proxy_state(&config, http, refresher, access);
    let app_state = AppState {
        proxy: proxy_state,
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);
    let listen_addr = config.proxy.listen_addr;

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown: the drain timer starts when the signal arrives, not
    // when the server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await?;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: JSON with status, refresh coordinator state, uptime, requests served.
/// Returns 200 when an access token is held, 503 when degraded (none obtained yet).
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let requests = state.proxy.requests_total.load(Ordering::Relaxed);
    let errors = state.proxy.errors_total.load(Ordering::Relaxed);
    let refresh = state.proxy.client.coordinator().snapshot().await;
    let has_token = state.proxy.access.get().is_some();

    let (status_code, status) = if has_token {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": status,
        "access_token": if has_token { "present" } else { "missing" },
        "refresh": {
            "refreshing": refresh.refreshing,
            "queued": refresh.queued,
        },
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies all non-health requests to upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                info!("received SIGINT, shutting down");
            }
            _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("received SIGINT, shutting down");
    }

    Ok(())
}
