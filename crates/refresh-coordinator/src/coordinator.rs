//! Refresh coordinator: single-flight credential refresh state machine
//!
//! States:
//! - Idle → Refreshing: first eligible failure; caller becomes the initiator,
//!   is enqueued, and the refresh operation is spawned exactly once
//! - Refreshing → Refreshing: further eligible failures join the queue
//! - Refreshing → Idle (success): queue drained in arrival order; each waiter's
//!   request gets the new credential, is marked `Replayed`, and is handed back
//!   to its caller for replay
//! - Refreshing → Idle (failure): queue drained; the initiator receives the
//!   refresh error, joiners receive their own original failure
//!
//! Ineligible and loop-guarded failures never touch the state.
//!
//! The flag and the queue live behind one async mutex and every
//! read-then-write happens inside a single lock scope, so concurrent arrivals
//! on a multi-threaded runtime cannot start a second refresh. The refresh runs
//! in a task owned by the coordinator: dropping the initiating caller does not
//! strand the cycle, and a panicking refresher still settles every waiter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};
use transport::{AttemptState, Request, TransportFailure};

use crate::BoxError;
use crate::error::{Error, Result};
use crate::predicate::{self, Eligibility, Verdict};
use crate::registry::{PendingCall, Registry, Role, Settlement};
use crate::replay::{self, CredentialUpdater};

/// Boxed future returned by `Refresher::refresh`.
pub type RefreshFuture<'a, C> =
    Pin<Box<dyn Future<Output = std::result::Result<C, BoxError>> + Send + 'a>>;

/// The external refresh operation: exchanges whatever refresh input it holds
/// for a new credential. Called at most once per refresh cycle.
pub trait Refresher: Send + Sync + 'static {
    /// Opaque credential handed to the credential updater.
    type Credential: Send + Sync + 'static;

    fn refresh(&self) -> RefreshFuture<'_, Self::Credential>;
}

impl<R: Refresher + ?Sized> Refresher for Arc<R> {
    type Credential = R::Credential;

    fn refresh(&self) -> RefreshFuture<'_, Self::Credential> {
        (**self).refresh()
    }
}

/// Adapter turning an async closure into a `Refresher`.
pub struct RefreshFn<F>(F);

/// Wrap `|| async { ... }` as a `Refresher`.
pub fn refresh_fn<F>(f: F) -> RefreshFn<F> {
    RefreshFn(f)
}

impl<F, Fut, C> Refresher for RefreshFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<C, BoxError>> + Send + 'static,
    C: Send + Sync + 'static,
{
    type Credential = C;

    fn refresh(&self) -> RefreshFuture<'_, C> {
        Box::pin((self.0)())
    }
}

/// Point-in-time view of the coordinator for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub refreshing: bool,
    pub queued: usize,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    refreshing: bool,
    registry: Registry<PendingCall>,
}

/// Handle held by a caller waiting on a refresh cycle.
#[derive(Debug)]
pub struct Ticket {
    rx: oneshot::Receiver<Settlement>,
    role: Role,
    // Joiners surface this if the cycle is torn down before settling them
    fallback: Option<TransportFailure>,
}

impl Ticket {
    /// Whether this caller started the refresh cycle it is waiting on.
    pub fn is_initiator(&self) -> bool {
        self.role == Role::Initiator
    }

    /// Wait for the cycle to settle. On success the returned request already
    /// carries the new credential and is marked `Replayed`.
    pub async fn wait(self) -> Result<Request> {
        match self.rx.await {
            Ok(Settlement::Replay(request)) => Ok(request),
            Ok(Settlement::Rejected(err)) => Err(err),
            Err(_) => match self.fallback {
                Some(failure) => Err(Error::Transport(failure)),
                None => Err(Error::RefreshFailed(
                    "refresh cycle ended without settling this request".into(),
                )),
            },
        }
    }
}

/// Owns the single-flight flag and the pending-call queue for one client.
///
/// Cloning is cheap and clones share state: every clone belongs to the same
/// refresh domain. Separate `Coordinator::new` calls are fully independent.
pub struct Coordinator<C> {
    state: Arc<Mutex<CoordinatorState>>,
    refresher: Arc<dyn Refresher<Credential = C>>,
    updater: Option<CredentialUpdater<C>>,
    eligibility: Eligibility,
}

impl<C> Clone for Coordinator<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            refresher: Arc::clone(&self.refresher),
            updater: self.updater.clone(),
            eligibility: Arc::clone(&self.eligibility),
        }
    }
}

impl<C: Send + Sync + 'static> Coordinator<C> {
    /// Create an idle coordinator using the default unauthorized predicate
    /// and no credential updater.
    pub fn new<R>(refresher: R) -> Self
    where
        R: Refresher<Credential = C>,
    {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            refresher: Arc::new(refresher),
            updater: None,
            eligibility: predicate::default_eligibility(),
        }
    }

    pub fn with_credential_updater(mut self, updater: CredentialUpdater<C>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.state.lock().await;
        CoordinatorSnapshot {
            refreshing: state.refreshing,
            queued: state.registry.len(),
        }
    }

    /// Decide what to do with a transport failure.
    ///
    /// Returns `Err` immediately for failures that pass through (ineligible,
    /// predicate error, loop-guarded). Otherwise the caller is enqueued,
    /// starting a refresh if none is in flight, and gets a `Ticket` to wait on.
    pub async fn admit(&self, failure: TransportFailure) -> Result<Ticket> {
        match predicate::evaluate(&self.eligibility, &failure) {
            Verdict::Eligible => {}
            Verdict::Ineligible => {
                record_passthrough("ineligible", &failure);
                return Err(Error::Transport(failure));
            }
            Verdict::Errored(source) => {
                record_passthrough("predicate_error", &failure);
                return Err(Error::Predicate { source, failure });
            }
        }

        if failure.request.attempt().is_guarded() {
            record_passthrough("loop_guard", &failure);
            return Err(Error::Transport(failure));
        }

        let TransportFailure { request, kind } = failure;
        let failure = TransportFailure::new(request.with_attempt(AttemptState::Retried), kind);

        let mut state = self.state.lock().await;
        let role = if state.refreshing {
            Role::Joiner
        } else {
            state.refreshing = true;
            Role::Initiator
        };
        let fallback = (role == Role::Joiner).then(|| unqueued(failure.clone()));
        let (call, rx) = PendingCall::new(failure, role);
        state.registry.enqueue(call);
        let queued = state.registry.len();
        drop(state);

        metrics::counter!("auth_refresh_waiters_total", "role" => role.label()).increment(1);
        debug!(role = role.label(), queued, "request waiting on credential refresh");

        if role == Role::Initiator {
            self.spawn_cycle();
        }

        Ok(Ticket { rx, role, fallback })
    }

    /// Run one refresh cycle in the background and settle every waiter.
    fn spawn_cycle(&self) {
        let state = Arc::clone(&self.state);
        let refresher = Arc::clone(&self.refresher);
        let updater = self.updater.clone();

        tokio::spawn(async move {
            // Inner task so a panicking refresher surfaces as a JoinError.
            let outcome = match tokio::spawn(async move { refresher.refresh().await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(format!("refresh task failed: {e}").into()),
            };

            let drained = {
                let mut state = state.lock().await;
                state.refreshing = false;
                state.registry.drain_all()
            };

            settle_all(drained, outcome, updater.as_ref());
        });
    }
}

/// Settle a drained queue in arrival order.
fn settle_all<C>(
    drained: VecDeque<PendingCall>,
    outcome: std::result::Result<C, BoxError>,
    updater: Option<&CredentialUpdater<C>>,
) {
    let waiters = drained.len();
    match outcome {
        Ok(credential) => {
            metrics::counter!("auth_refresh_cycles_total", "outcome" => "success").increment(1);
            info!(waiters, "credential refreshed, releasing queued requests");
            for call in drained {
                let (failure, _, settler) = call.into_parts();
                let request = replay::prepare(failure.request, &credential, updater);
                settler.settle(Settlement::Replay(request));
            }
        }
        Err(reason) => {
            metrics::counter!("auth_refresh_cycles_total", "outcome" => "failure").increment(1);
            debug!(waiters, "credential refresh failed, rejecting queued requests");
            let mut reason = Some(reason);
            for call in drained {
                let (failure, role, settler) = call.into_parts();
                let rejection = match reason.take_if(|_| role == Role::Initiator) {
                    Some(reason) => Error::RefreshFailed(reason),
                    // Joiners see the failure they arrived with, as if never queued
                    None => Error::Transport(unqueued(failure)),
                };
                settler.settle(Settlement::Rejected(rejection));
            }
        }
    }
}

/// Restore a queued failure to how the caller first saw it.
fn unqueued(failure: TransportFailure) -> TransportFailure {
    let TransportFailure { request, kind } = failure;
    TransportFailure::new(request.with_attempt(AttemptState::Fresh), kind)
}

fn record_passthrough(reason: &'static str, failure: &TransportFailure) {
    metrics::counter!("auth_refresh_passthrough_total", "reason" => reason).increment(1);
    debug!(
        reason,
        status = ?failure.status(),
        attempt = failure.request.attempt().label(),
        "failure passed through without refresh"
    );
}
