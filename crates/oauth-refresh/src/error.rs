//! Error types for OAuth refresh operations

/// Errors from the token endpoint exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// Refresh token revoked or unknown; retrying will not help
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, Error>;
