//! Decision predicate: is a transport failure caused by an expired credential?
//!
//! The default predicate matches the canonical unauthorized status (401) and
//! fails closed: a failure with no status (timeout, connection error) is never
//! eligible. Custom predicates may return `Err`, which the coordinator treats
//! as a passthrough signal and surfaces as `Error::Predicate`.

use std::sync::Arc;

use transport::TransportFailure;

use crate::BoxError;

/// HTTP status that signals an expired or invalid credential.
pub const UNAUTHORIZED: u16 = 401;

/// Shared eligibility predicate.
pub type Eligibility =
    Arc<dyn Fn(&TransportFailure) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// Default predicate: eligible iff the upstream answered 401.
pub fn unauthorized(failure: &TransportFailure) -> std::result::Result<bool, BoxError> {
    Ok(failure.status() == Some(UNAUTHORIZED))
}

/// The default predicate as a shareable `Eligibility`.
pub fn default_eligibility() -> Eligibility {
    Arc::new(unauthorized)
}

/// Predicate matching any of the given status codes.
///
/// Useful for upstreams that signal an expired token with 403 or 419.
pub fn status_codes(codes: Vec<u16>) -> Eligibility {
    Arc::new(move |failure: &TransportFailure| -> std::result::Result<bool, BoxError> {
        Ok(failure
            .status()
            .is_some_and(|status| codes.contains(&status)))
    })
}

/// Result of running the predicate against one failure.
pub(crate) enum Verdict {
    Eligible,
    Ineligible,
    Errored(BoxError),
}

pub(crate) fn evaluate(predicate: &Eligibility, failure: &TransportFailure) -> Verdict {
    match predicate(failure) {
        Ok(true) => Verdict::Eligible,
        Ok(false) => Verdict::Ineligible,
        Err(e) => Verdict::Errored(e),
    }
}
