//! Common error types

use thiserror::Error;

/// Errors raised while loading configuration and secrets
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("missing secret: set {env_var} or {file_key}")]
    MissingSecret {
        env_var: &'static str,
        file_key: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
