//! `reqwest`-backed transport with static header injection.
//!
//! Configured headers are added to every outgoing request (replacing any
//! existing value) except `Authorization`, which belongs to the credential
//! updater and is never overwritten here.

use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::request::{FailureKind, Request, Response, TransportFailure};
use crate::{SendFuture, Transport};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
    headers: Vec<HeaderInjection>,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
            headers: Vec::new(),
        }
    }

    /// Per-request timeout. A timed-out request fails with `FailureKind::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_headers(mut self, headers: Vec<HeaderInjection>) -> Self {
        self.headers = headers;
        self
    }

    async fn execute(&self, request: Request) -> crate::Result<Response> {
        let mut headers = request.headers.clone();
        inject_headers(&mut headers, &self.headers);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .body(request.body.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let upstream = match builder.send().await {
            Ok(upstream) => upstream,
            Err(e) if e.is_timeout() => {
                return Err(TransportFailure::new(
                    request,
                    FailureKind::Timeout(e.to_string()),
                ));
            }
            Err(e) => {
                return Err(TransportFailure::new(
                    request,
                    FailureKind::Network(e.to_string()),
                ));
            }
        };

        let status = upstream.status();
        let resp_headers = upstream.headers().clone();
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return Err(TransportFailure::new(
                    request,
                    FailureKind::Network(format!("reading response body: {e}")),
                ));
            }
        };

        let response = Response {
            status: status.as_u16(),
            headers: resp_headers,
            body,
        };
        if status.is_success() {
            Ok(response)
        } else {
            Err(TransportFailure::from_response(request, response))
        }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: Request) -> SendFuture<'_> {
        Box::pin(self.execute(request))
    }
}

/// Apply static header injections, skipping invalid entries and `Authorization`.
pub fn inject_headers(headers: &mut HeaderMap, injections: &[HeaderInjection]) {
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == reqwest::header::AUTHORIZATION {
            warn!(header = %injection.name, "refusing to overwrite authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}
