//! Scripted transport and refresher doubles shared by the crate's tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use transport::header::{AUTHORIZATION, HeaderValue};
use transport::{FailureKind, Request, Response, SendFuture, Transport, TransportFailure};

use crate::BoxError;
use crate::coordinator::{Coordinator, RefreshFuture, Refresher};
use crate::replay::CredentialUpdater;

const BASE_URL: &str = "http://upstream.test";

enum Mode {
    /// 200 for the given bearer token, 401 for anything else
    Accept(String),
    /// Always this status
    Status(u16),
    /// Connection never established
    Unreachable,
}

/// Upstream double that answers based on the request's bearer token.
pub(crate) struct ScriptedTransport {
    mode: Mode,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn accepting(token: &str) -> Arc<Self> {
        Self::with_mode(Mode::Accept(token.to_string()))
    }

    pub(crate) fn always(status: u16) -> Arc<Self> {
        Self::with_mode(Mode::Status(status))
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Self::with_mode(Mode::Unreachable)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Authorization header values in the order requests arrived.
    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: Request) -> SendFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let auth = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.seen.lock().unwrap().push(auth.clone());

        let outcome = match &self.mode {
            Mode::Accept(token) if auth == format!("Bearer {token}") => {
                Ok(Response::new(200, format!("ok {}", request.url)))
            }
            Mode::Accept(_) => Err(TransportFailure::from_response(
                request,
                Response::new(401, "token expired"),
            )),
            Mode::Status(status) => Err(TransportFailure::from_response(
                request,
                Response::new(*status, "scripted"),
            )),
            Mode::Unreachable => Err(TransportFailure::new(
                request,
                FailureKind::Network("connection refused".into()),
            )),
        };
        Box::pin(async move { outcome })
    }
}

/// GET `{BASE_URL}{path}` carrying `Authorization: Bearer {token}`.
pub(crate) fn bearer_request(path: &str, token: &str) -> Request {
    let mut request = Request::get(format!("{BASE_URL}{path}"));
    request.headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    request
}

/// A 401 failure for a fresh bearer request.
pub(crate) fn unauthorized(path: &str, token: &str) -> TransportFailure {
    TransportFailure::from_response(
        bearer_request(path, token),
        Response::new(401, "token expired"),
    )
}

pub(crate) fn bearer_updater() -> CredentialUpdater<String> {
    Arc::new(|request: &mut Request, token: &String| {
        request.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    })
}

/// Bearer updater that also records the URL of every request it touches.
pub(crate) fn recording_updater(log: Arc<Mutex<Vec<String>>>) -> CredentialUpdater<String> {
    let bearer = bearer_updater();
    Arc::new(move |request: &mut Request, token: &String| {
        log.lock().unwrap().push(request.url.clone());
        bearer(request, token);
    })
}

/// Refresher with a fixed outcome, optionally held until `open` is called.
pub(crate) struct GatedRefresher {
    outcome: Result<String, String>,
    gate: Option<Notify>,
    calls: AtomicUsize,
}

impl GatedRefresher {
    fn build(outcome: Result<String, String>, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            gate: gated.then(Notify::new),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn succeeding(token: &str) -> Arc<Self> {
        Self::build(Ok(token.to_string()), false)
    }

    pub(crate) fn gated_success(token: &str) -> Arc<Self> {
        Self::build(Ok(token.to_string()), true)
    }

    pub(crate) fn gated_failure(reason: &str) -> Arc<Self> {
        Self::build(Err(reason.to_string()), true)
    }

    /// Let a pending (or the next) refresh complete.
    pub(crate) fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Refresher for GatedRefresher {
    type Credential = String;

    fn refresh(&self) -> RefreshFuture<'_, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcome.clone().map_err(BoxError::from)
        })
    }
}

/// Yield until at least `n` callers are queued on the coordinator.
pub(crate) async fn wait_for_queue<C: Send + Sync + 'static>(
    coordinator: &Coordinator<C>,
    n: usize,
) {
    while coordinator.snapshot().await.queued < n {
        tokio::task::yield_now().await;
    }
}
