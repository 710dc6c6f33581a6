//! `Refresher` backed by an OAuth token endpoint
//!
//! The current refresh token lives behind an async mutex: the coordinator
//! never runs two refreshes at once, but callers outside the interceptor
//! (startup, manual refresh) may. A rotated refresh token replaces the stored
//! one before the lock is released.

use std::sync::{Arc, PoisonError, RwLock};

use common::Secret;
use refresh_coordinator::{BoxError, CredentialUpdater, RefreshFuture, Refresher};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transport::Request;
use transport::header::{AUTHORIZATION, HeaderValue};

use crate::error::Result;
use crate::token::{self, TokenResponse};

/// Shared cell holding the current access token.
///
/// The refresher publishes into it; request builders read from it so new
/// requests start out with the latest token instead of hitting a 401 first.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<Secret<String>>>>);

impl AccessToken {
    pub fn new(initial: Option<Secret<String>>) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    pub fn get(&self) -> Option<String> {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|token| token.expose().clone())
    }

    pub fn set(&self, token: String) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Secret::new(token));
    }

    /// Set `Authorization: Bearer <token>` on the request, if a token is known.
    pub fn authorize(&self, request: &mut Request) {
        if let Some(token) = self.get() {
            set_bearer(request, &token);
        }
    }
}

/// Refreshes credentials with the OAuth refresh-token grant.
pub struct OAuthRefresher {
    client: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    refresh_token: Mutex<Secret<String>>,
    access: AccessToken,
}

impl OAuthRefresher {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        refresh_token: Secret<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            client_id: None,
            refresh_token: Mutex::new(refresh_token),
            access: AccessToken::default(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Publish refreshed access tokens into an existing cell.
    pub fn with_access_token(mut self, access: AccessToken) -> Self {
        self.access = access;
        self
    }

    pub fn access_token(&self) -> AccessToken {
        self.access.clone()
    }

    /// Run one refresh-token exchange.
    pub async fn refresh_once(&self) -> Result<TokenResponse> {
        let mut current = self.refresh_token.lock().await;
        let token = token::refresh_token(
            &self.client,
            &self.endpoint,
            self.client_id.as_deref(),
            current.expose(),
        )
        .await?;

        if let Some(rotated) = &token.refresh_token {
            *current = Secret::new(rotated.clone());
            debug!("refresh token rotated");
        }
        drop(current);

        self.access.set(token.access_token.clone());
        info!(expires_in = ?token.expires_in, "access token refreshed");
        Ok(token)
    }
}

impl Refresher for OAuthRefresher {
    type Credential = TokenResponse;

    fn refresh(&self) -> RefreshFuture<'_, TokenResponse> {
        Box::pin(async move { self.refresh_once().await.map_err(BoxError::from) })
    }
}

/// Credential updater writing the refreshed access token as a bearer header.
pub fn bearer_updater() -> CredentialUpdater<TokenResponse> {
    Arc::new(|request: &mut Request, token: &TokenResponse| {
        set_bearer(request, &token.access_token);
    })
}

fn set_bearer(request: &mut Request, token: &str) {
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(e) => warn!(error = %e, "access token is not a valid header value"),
    }
}
