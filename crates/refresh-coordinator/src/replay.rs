//! Request replay after a successful refresh.
//!
//! `prepare` applies the new credential to a waiting request and marks it
//! `Replayed`; `replay` reissues it through the underlying transport. A
//! replayed request is loop-guarded, so if it fails again it is surfaced to
//! the caller instead of starting another refresh cycle.

use std::sync::Arc;

use tracing::debug;
use transport::{AttemptState, Request, Response, Transport};

/// Caller-supplied hook that writes a new credential into a request
/// (typically the `Authorization` header).
pub type CredentialUpdater<C> = Arc<dyn Fn(&mut Request, &C) + Send + Sync>;

/// Apply the credential (if an updater is configured) and mark the request replayed.
pub(crate) fn prepare<C>(
    mut request: Request,
    credential: &C,
    updater: Option<&CredentialUpdater<C>>,
) -> Request {
    if let Some(update) = updater {
        update(&mut request, credential);
    }
    request.with_attempt(AttemptState::Replayed)
}

/// Reissue a prepared request once.
pub(crate) async fn replay<T: Transport + ?Sized>(
    transport: &T,
    request: Request,
) -> transport::Result<Response> {
    debug!(method = %request.method, url = %request.url, "replaying request with refreshed credential");
    let result = transport.send(request).await;
    let outcome = if result.is_ok() { "success" } else { "failure" };
    metrics::counter!("auth_refresh_replays_total", "outcome" => outcome).increment(1);
    result
}
