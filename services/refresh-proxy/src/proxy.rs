//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers, applies the current
//! access token, and forwards to the upstream URL through `AuthRefresh`. An
//! upstream 401 triggers one shared refresh and a single replay. Upstream
//! responses are returned verbatim, including error statuses that survive
//! the replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::response::Response;
use oauth_refresh::{AccessToken, TokenResponse};
use refresh_coordinator::{AuthRefresh, Error as RefreshError};
use tracing::{error, instrument, warn};
use transport::{FailureKind, ReqwestTransport};

use crate::error::ProxyError;
use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Upstream client with credential refresh attached.
pub type UpstreamClient = AuthRefresh<ReqwestTransport, TokenResponse>;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: Arc<UpstreamClient>,
    pub access: AccessToken,
    pub upstream_url: String,
    pub timeout: Duration,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// Proxy an inbound request to upstream, refreshing the credential on 401.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let method = request.method().clone();

    let response = match forward(state, request).await {
        Ok(response) => response,
        Err(err) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error(err.metric_label());
            err.into_response(&request_id)
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let upstream_url = upstream_url(&state.upstream_url, &parts.uri);

    let mut headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if !is_hop_by_hop(name.as_str()) && name != axum::http::header::HOST {
            headers.append(name.clone(), value.clone());
        }
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to read request body");
            ProxyError::InvalidBody(e.to_string())
        })?;

    let mut outbound = transport::Request::new(parts.method, upstream_url)
        .with_headers(headers)
        .with_body(body);
    state.access.authorize(&mut outbound);

    match state.client.send(outbound).await {
        Ok(response) => Ok(relay(response)),
        Err(RefreshError::RefreshFailed(source)) => {
            error!(error = %source, "credential refresh failed");
            Err(ProxyError::Refresh(source.to_string()))
        }
        Err(err) => {
            let Some(failure) = err.failure() else {
                return Err(ProxyError::Upstream(err.to_string()));
            };
            match &failure.kind {
                FailureKind::Status(response) => {
                    if response.status == 401 {
                        warn!("upstream still unauthorized after refresh");
                    }
                    Ok(relay(response.clone()))
                }
                FailureKind::Timeout(_) => {
                    error!(error = %err, "upstream timeout");
                    Err(ProxyError::Timeout(state.timeout.as_secs()))
                }
                FailureKind::Network(message) => {
                    error!(error = %err, "upstream request failed");
                    Err(ProxyError::Upstream(message.clone()))
                }
            }
        }
    }
}

/// Join the upstream base URL with the inbound path and query.
fn upstream_url(base: &str, uri: &axum::http::Uri) -> String {
    match uri.path_and_query() {
        Some(pq) => format!("{}{}", base.trim_end_matches('/'), pq),
        None => base.to_string(),
    }
}

/// Convert an upstream response into an axum response, dropping hop-by-hop headers.
fn relay(upstream: transport::Response) -> Response {
    let mut response = Response::new(axum::body::Body::from(upstream.body));
    *response.status_mut() = axum::http::StatusCode::from_u16(upstream.status)
        .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
    let headers = response.headers_mut();
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) && name != axum::http::header::CONTENT_LENGTH {
            headers.append(name.clone(), value.clone());
        }
    }
    response
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
