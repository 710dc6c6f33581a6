//! Error types for refresh coordination

use transport::TransportFailure;

use crate::BoxError;

/// Outcome of a request that went through the interceptor and did not succeed.
///
/// Only the caller that started a refresh cycle can ever see `RefreshFailed`.
/// Callers that joined a cycle get their own `Transport` failure back when the
/// refresh fails, exactly as if no interceptor were attached.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's own failure, unchanged (ineligible, loop-guarded, joiner
    /// of a failed refresh, or replay that failed again)
    #[error(transparent)]
    Transport(TransportFailure),

    /// The eligibility predicate itself errored; the failure was not coordinated
    #[error("eligibility predicate failed: {source}")]
    Predicate {
        source: BoxError,
        failure: TransportFailure,
    },

    /// The refresh operation failed (initiating caller only)
    #[error("credential refresh failed: {0}")]
    RefreshFailed(#[source] BoxError),
}

impl Error {
    /// The transport failure behind this error, if any.
    pub fn failure(&self) -> Option<&TransportFailure> {
        match self {
            Error::Transport(failure) | Error::Predicate { failure, .. } => Some(failure),
            Error::RefreshFailed(_) => None,
        }
    }

    /// Upstream HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        self.failure().and_then(TransportFailure::status)
    }

    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Error::RefreshFailed(_))
    }
}

impl From<TransportFailure> for Error {
    fn from(failure: TransportFailure) -> Self {
        Error::Transport(failure)
    }
}

/// Result alias for coordinated requests.
pub type Result<T> = std::result::Result<T, Error>;
