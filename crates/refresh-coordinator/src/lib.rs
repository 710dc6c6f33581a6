//! Single-flight credential refresh for HTTP clients
//!
//! When several in-flight requests fail with an expired credential at the
//! same time, exactly one refresh runs. Every affected request waits for it,
//! gets the new credential applied, and is replayed once.
//!
//! - `predicate`: decides whether a failure should trigger a refresh
//! - `coordinator`: Idle/Refreshing state machine and waiter queue
//! - `interceptor`: `AuthRefresh`, the transport wrapper callers use
//!
//! State is owned per `Coordinator`, so independent clients never share a
//! refresh cycle.

pub mod coordinator;
pub mod error;
pub mod interceptor;
pub mod predicate;
mod registry;
mod replay;

#[cfg(test)]
mod test_support;

pub use coordinator::{
    Coordinator, CoordinatorSnapshot, RefreshFn, RefreshFuture, Refresher, Ticket, refresh_fn,
};
pub use error::{Error, Result};
pub use interceptor::{AuthRefresh, Options, attach};
pub use predicate::Eligibility;
pub use replay::CredentialUpdater;

/// Boxed error accepted from refreshers and eligibility predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
