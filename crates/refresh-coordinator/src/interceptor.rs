//! Interceptor hook: wires a transport to a refresh coordinator
//!
//! `AuthRefresh` sends through the wrapped transport. Successes pass straight
//! back. Failures go to the coordinator, and if admitted the caller waits for
//! the refresh cycle and replays its own request. A replay that fails again is
//! offered to the coordinator once more, where the loop guard turns it away,
//! so every call completes after at most one refresh cycle and one replay.

use std::sync::Arc;

use transport::{Request, Response, Transport, TransportFailure};

use crate::BoxError;
use crate::coordinator::{Coordinator, Refresher};
use crate::error::Result;
use crate::predicate::Eligibility;
use crate::replay::{self, CredentialUpdater};

/// Optional hooks for `attach`.
pub struct Options<C> {
    /// Writes the new credential into a request before replay
    pub update_credential: Option<CredentialUpdater<C>>,
    /// Overrides the default 401 eligibility predicate
    pub eligible: Option<Eligibility>,
}

impl<C> Default for Options<C> {
    fn default() -> Self {
        Self {
            update_credential: None,
            eligible: None,
        }
    }
}

impl<C> Options<C> {
    pub fn update_credential(
        mut self,
        update: impl Fn(&mut Request, &C) + Send + Sync + 'static,
    ) -> Self {
        self.update_credential = Some(Arc::new(update));
        self
    }

    pub fn eligible(
        mut self,
        eligible: impl Fn(&TransportFailure) -> std::result::Result<bool, BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.eligible = Some(Arc::new(eligible));
        self
    }
}

/// A transport with credential refresh attached.
pub struct AuthRefresh<T, C> {
    transport: T,
    coordinator: Coordinator<C>,
}

impl<T, C> AuthRefresh<T, C>
where
    T: Transport,
    C: Send + Sync + 'static,
{
    pub fn new<R>(transport: T, refresher: R) -> Self
    where
        R: Refresher<Credential = C>,
    {
        Self {
            transport,
            coordinator: Coordinator::new(refresher),
        }
    }

    pub fn with_credential_updater(
        mut self,
        update: impl Fn(&mut Request, &C) + Send + Sync + 'static,
    ) -> Self {
        self.coordinator = self.coordinator.with_credential_updater(Arc::new(update));
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.coordinator = self.coordinator.with_eligibility(eligibility);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn coordinator(&self) -> &Coordinator<C> {
        &self.coordinator
    }

    /// Send a request, refreshing the credential and replaying once if the
    /// upstream rejects it as unauthorized.
    pub async fn send(&self, request: Request) -> Result<Response> {
        match self.transport.send(request).await {
            Ok(response) => Ok(response),
            Err(failure) => self.on_failure(failure).await,
        }
    }

    /// Failure half of the interceptor, for callers that drive the transport
    /// themselves.
    pub async fn on_failure(&self, mut failure: TransportFailure) -> Result<Response> {
        loop {
            let ticket = self.coordinator.admit(failure).await?;
            let request = ticket.wait().await?;
            match replay::replay(&self.transport, request).await {
                Ok(response) => return Ok(response),
                Err(again) => failure = again,
            }
        }
    }
}

/// Attach credential refresh to a transport.
pub fn attach<T, R>(
    transport: T,
    refresher: R,
    options: Options<R::Credential>,
) -> AuthRefresh<T, R::Credential>
where
    T: Transport,
    R: Refresher,
{
    let mut coordinator = Coordinator::new(refresher);
    if let Some(updater) = options.update_credential {
        coordinator = coordinator.with_credential_updater(updater);
    }
    if let Some(eligible) = options.eligible {
        coordinator = coordinator.with_eligibility(eligible);
    }
    AuthRefresh {
        transport,
        coordinator,
    }
}
