//! HTTP transport abstraction for the auth-refresh interceptor
//!
//! Defines the `Transport` trait that decouples refresh coordination from the
//! HTTP client doing the actual I/O. `ReqwestTransport` is the production
//! implementation; tests substitute scripted transports that implement the
//! same trait.
//!
//! Calling convention: a 2xx response resolves to `Ok(Response)`. Anything
//! else (non-2xx status, timeout, connection error) resolves to
//! `Err(TransportFailure)`, which always carries the original `Request` so a
//! failure handler can replay it.

pub mod request;
pub mod reqwest_transport;

pub use request::{AttemptState, FailureKind, Request, Response, TransportFailure};
pub use reqwest_transport::{HeaderInjection, ReqwestTransport};
pub use reqwest::Method;
pub use reqwest::header;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportFailure>;

/// Boxed future returned by `Transport::send`.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;

/// Sends a `Request` and reports either a successful `Response` or a
/// `TransportFailure` carrying the request back to the caller.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Issue the request once. Implementations must not retry internally.
    fn send(&self, request: Request) -> SendFuture<'_>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: Request) -> SendFuture<'_> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, request: Request) -> SendFuture<'_> {
        (**self).send(request)
    }
}
