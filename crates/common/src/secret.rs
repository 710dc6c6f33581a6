//! Secret wrapper for sensitive values, and env/file secret resolution

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Resolve a secret from an env var, falling back to a file.
///
/// The env var wins when set and non-empty. File contents are trimmed; an
/// empty file yields `None`. A configured file that cannot be read is an error.
pub fn resolve_secret(env_var: &str, file: Option<&Path>) -> Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var)
        && !value.is_empty()
    {
        return Ok(Some(Secret::new(value)));
    }

    let Some(path) = file else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read secret file {}: {e}", path.display()))
    })?;
    let value = contents.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(Secret::new(value.to_owned())))
}
