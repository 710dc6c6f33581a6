//! Per-request proxy failures and their JSON error responses
//!
//! Upstream answers (any status) are relayed verbatim and never become a
//! `ProxyError`. These variants cover the cases where there is no upstream
//! response to relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("credential refresh failed: {0}")]
    Refresh(String),

    #[error("upstream timeout after {0}s")]
    Timeout(u64),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Refresh(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Value of the `error.type` field in the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Refresh(_) => "refresh_error",
            _ => "proxy_error",
        }
    }

    /// Label for `proxy_upstream_errors_total`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProxyError::InvalidBody(_) => "invalid_request",
            ProxyError::Refresh(_) => "refresh",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Upstream(_) => "connection",
        }
    }

    /// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
    pub fn into_response(self, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
