//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! Routes, middleware layers and the composed pipeline all need to hold
//! handlers of *different* concrete types behind one type. Every handler is
//! therefore erased into a [`BoxedHandler`]: an `Arc` around a trait object
//! with a single `call` method.
//!
//! ```text
//! async fn bar(req: Request) -> Response { … }   ← user writes this
//!        ↓ server.route(Method::GET, "/bar", bar)
//! bar.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! BoxedHandler(Arc::new(FnHandler(bar)))        ← stored in the router
//!        ↓ middleware.wrap(handler)
//! BoxedHandler(…)                               ← another layer, same type
//!        ↓
//! chain.call(req) at request time               ← one virtual call per layer
//! ```
//!
//! Cloning a `BoxedHandler` is one atomic increment, which is what lets a
//! middleware layer keep its inner handler and call it from every request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future that resolves to a [`Response`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

// ── BoxedHandler ──────────────────────────────────────────────────────────────

/// A type-erased request handler, shared across concurrent requests.
///
/// This is the value middleware receives and returns: a unit wraps one
/// `BoxedHandler` and hands back another.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler>);

impl BoxedHandler {
    /// Erases any [`Handler`] (typically an `async fn` or closure).
    pub fn new(handler: impl Handler) -> Self {
        handler.into_boxed_handler()
    }

    /// Runs the handler on one request.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

impl fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedHandler")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any function or
/// closure with the shape:
///
/// ```text
/// Fn(Request) -> impl Future<Output = impl IntoResponse>
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

/// An already-erased handler registers as-is, so a composed chain or a
/// prebuilt handler can be mounted as a route.
impl private::Sealed for BoxedHandler {}

impl Handler for BoxedHandler {
    fn into_boxed_handler(self) -> BoxedHandler {
        self
    }
}

/// Bridges a concrete `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
