//! Request, response and failure types shared by transports and the interceptor
//!
//! `Request` is a fully-buffered, replayable description of an HTTP call. It
//! carries an `AttemptState` alongside the transport-native fields so the
//! refresh coordinator can tell fresh requests from ones that already went
//! through a refresh cycle, without stashing ad hoc flags in the headers.

use std::fmt;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;

/// Where a request stands with respect to credential refresh.
///
/// Transitions:
/// - Fresh → Retried (request triggered or joined a refresh cycle)
/// - Retried → Replayed (credential applied, request reissued)
///
/// Any non-Fresh request is loop-guarded: if it fails again it is never
/// coordinated a second time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttemptState {
    #[default]
    Fresh,
    Retried,
    Replayed,
}

impl AttemptState {
    /// Whether a failure of this request must bypass refresh coordination.
    pub fn is_guarded(self) -> bool {
        !matches!(self, AttemptState::Fresh)
    }

    /// Label for logging and metrics.
    pub fn label(self) -> &'static str {
        match self {
            AttemptState::Fresh => "fresh",
            AttemptState::Retried => "retried",
            AttemptState::Replayed => "replayed",
        }
    }
}

/// A buffered HTTP request that can be sent more than once.
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    attempt: AttemptState,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attempt: AttemptState::Fresh,
        }
    }

    /// Shorthand for a bodyless GET.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Current refresh attempt state.
    pub fn attempt(&self) -> AttemptState {
        self.attempt
    }

    /// Copy-on-write transition to a new attempt state.
    pub fn with_attempt(mut self, attempt: AttemptState) -> Self {
        self.attempt = attempt;
        self
    }
}

// Header values are omitted: they routinely carry bearer tokens.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("body_len", &self.body.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a request did not produce a successful response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailureKind {
    /// Upstream answered with a non-2xx status
    #[error("upstream returned status {}", .0.status)]
    Status(Response),

    /// No response within the configured timeout
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connection, TLS, or body read error
    #[error("network error: {0}")]
    Network(String),
}

/// A failed request together with the request that produced it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} {} failed: {kind}", .request.method, .request.url)]
pub struct TransportFailure {
    pub request: Request,
    pub kind: FailureKind,
}

impl TransportFailure {
    pub fn new(request: Request, kind: FailureKind) -> Self {
        Self { request, kind }
    }

    /// Failure for a non-2xx response.
    pub fn from_response(request: Request, response: Response) -> Self {
        Self::new(request, FailureKind::Status(response))
    }

    /// HTTP status code, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            FailureKind::Status(response) => Some(response.status),
            FailureKind::Timeout(_) | FailureKind::Network(_) => None,
        }
    }

    /// The upstream response, if there was one.
    pub fn response(&self) -> Option<&Response> {
        match &self.kind {
            FailureKind::Status(response) => Some(response),
            FailureKind::Timeout(_) | FailureKind::Network(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout(_))
    }
}
