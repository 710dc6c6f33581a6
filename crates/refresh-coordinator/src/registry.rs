//! Pending-call registry: the FIFO queue of callers waiting on a refresh
//!
//! Each waiting caller is a `PendingCall` holding its own failure (and so its
//! own request) plus a `oneshot::Sender`. Sending consumes the sender, so a
//! call can be settled at most once.
//!
//! `Registry::drain_all` hands back a snapshot and leaves the live queue empty,
//! so settling a snapshot never observes calls enqueued during the drain.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use transport::{Request, TransportFailure};

use crate::error::Error;

/// How a caller entered the refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// First eligible failure while idle; owns the refresh invocation
    Initiator,
    /// Arrived while a refresh was already in flight
    Joiner,
}

impl Role {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Joiner => "joiner",
        }
    }
}

/// What a waiting caller receives when its cycle settles.
#[derive(Debug)]
pub(crate) enum Settlement {
    /// Credential applied; the request is ready to be replayed
    Replay(Request),
    /// The cycle failed for this caller
    Rejected(Error),
}

/// A caller suspended until the current refresh cycle settles.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub(crate) failure: TransportFailure,
    pub(crate) role: Role,
    settle: oneshot::Sender<Settlement>,
}

impl PendingCall {
    pub(crate) fn new(
        failure: TransportFailure,
        role: Role,
    ) -> (Self, oneshot::Receiver<Settlement>) {
        let (settle, rx) = oneshot::channel();
        (
            Self {
                failure,
                role,
                settle,
            },
            rx,
        )
    }

    /// Split into the settle handle and the data needed to compute the outcome.
    pub(crate) fn into_parts(self) -> (TransportFailure, Role, Settler) {
        (self.failure, self.role, Settler(self.settle))
    }
}

/// One-shot settle handle for a pending call.
#[derive(Debug)]
pub(crate) struct Settler(oneshot::Sender<Settlement>);

impl Settler {
    /// Deliver the outcome. Returns false if the caller stopped waiting.
    pub(crate) fn settle(self, settlement: Settlement) -> bool {
        self.0.send(settlement).is_ok()
    }
}

/// Strict FIFO queue of waiting callers.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    queue: VecDeque<T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn enqueue(&mut self, call: T) {
        self.queue.push_back(call);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take every queued call in arrival order, leaving the registry empty.
    pub(crate) fn drain_all(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.queue)
    }
}
