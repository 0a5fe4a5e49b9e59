//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: structured tracing, request-id injection and
//! session authentication.
//!
//! A unit is anything that can turn one [`BoxedHandler`] into another:
//!
//! ```text
//! wrap(next) -> handler
//! ```
//!
//! The returned handler decides what happens around `next`: run code before
//! it, after it, or not call it at all (short-circuit).
//!
//! # Ordering
//!
//! [`Pipeline::build`] folds the registered units around the terminal
//! handler **in reverse**, so the first unit registered is the outermost
//! layer. For units `[a, b]` around terminal `t` a request observes:
//!
//! ```text
//! a-pre → b-pre → t → b-post → a-post
//! ```
//!
//! # Writing a unit
//!
//! ```rust
//! use rainbow::middleware::{self, Middleware};
//! use rainbow::{BoxedHandler, Request};
//!
//! let log = middleware::from_fn(|req: Request, next: BoxedHandler| async move {
//!     tracing::info!("middleware1 request");
//!     let res = next.call(req).await;
//!     tracing::info!("middleware1 response");
//!     res
//! });
//! # fn assert_unit(_: impl Middleware) {}
//! # assert_unit(log);
//! ```

mod trace;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::IntoResponse;

pub use trace::{Trace, trace};

// ── Middleware trait ──────────────────────────────────────────────────────────

/// A composable request interceptor.
///
/// `wrap` is called once when the pipeline is built, not once per request;
/// per-request work belongs in the handler it returns. Implementations must
/// be safe to share across concurrent requests.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

/// A plain `Fn(BoxedHandler) -> BoxedHandler` is a unit.
impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Builds a unit from an async function of the request and the next layer.
///
/// `f` receives ownership of the request and a handle to the rest of the
/// chain; whatever it returns becomes the response seen by outer layers.
pub fn from_fn<F, Fut, R>(f: F) -> FromFn<F>
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    FromFn(Arc::new(f))
}

/// Unit returned by [`from_fn`].
pub struct FromFn<F>(Arc<F>);

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let f = Arc::clone(&self.0);
        BoxedHandler::new(move |req: Request| f(req, next.clone()))
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Ordered, append-only list of middleware units.
///
/// The server owns one of these while it is being configured and freezes it
/// into a single composed handler when it starts listening.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit. It becomes the innermost layer so far.
    pub fn register(&mut self, middleware: impl Middleware) {
        self.layers.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Composes every registered unit around `terminal`.
    ///
    /// Equivalent to `mw[0](mw[1](… mw[n-1](terminal) …))`.
    pub fn build(&self, terminal: BoxedHandler) -> BoxedHandler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |next, layer| layer.wrap(next))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("layers", &self.layers.len()).finish()
    }
}
