//! Shared configuration errors and secret handling for the auth-refresh workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, resolve_secret};
