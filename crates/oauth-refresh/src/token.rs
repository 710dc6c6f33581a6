//! OAuth token refresh
//!
//! POSTs `grant_type=refresh_token` as a form to the configured token
//! endpoint. Endpoints that rotate refresh tokens return a new one alongside
//! the access token; endpoints that don't simply omit it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time, when present.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("rotated", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    client_id: Option<&str>,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh)];
    if let Some(client_id) = client_id {
        form.push(("client_id", client_id));
    }

    let response = client
        .post(endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 400/401/403 means the refresh token is revoked or invalid
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenRefresh(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenRefresh(format!("invalid refresh response: {e}")))
}
