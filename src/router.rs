//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is the
//! terminal handler of the pipeline: middleware runs around it, never
//! inside it.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// Routes for one method. The tree maps a pattern to a slot so that
/// re-registering the same pattern can swap the handler in place.
#[derive(Default)]
struct Tree {
    paths: MatchitRouter<usize>,
    slots: Vec<BoxedHandler>,
    index: HashMap<String, usize>,
}

impl Tree {
    fn insert(&mut self, path: &str, handler: BoxedHandler) {
        if let Some(&slot) = self.index.get(path) {
            self.slots[slot] = handler;
            return;
        }
        let slot = self.slots.len();
        self.paths
            .insert(path, slot)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self.slots.push(handler);
        self.index.insert(path.to_owned(), slot);
    }
}

pub(crate) enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// The application router.
///
/// Registering the same method and path twice replaces the earlier handler:
/// the last registration wins.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, Tree>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax, retrieved with `req.param("name")`:
    ///
    /// ```rust
    /// # use rainbow::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with a different pattern
    /// already registered for `method` (e.g. `/users/{id}` vs `/users/{name}`).
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(method, path, handler);
        self
    }

    /// In-place form of [`on`](Router::on), for use through
    /// [`Server::default_router`](crate::Server::default_router).
    pub fn route(&mut self, method: Method, path: &str, handler: impl Handler) -> &mut Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler());
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(method).and_then(|t| {
            t.paths.at(path).ok().map(|m| (t.slots[*m.value].clone(), m.params))
        }) {
            let (handler, params) = matched;
            let params = params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(handler, params);
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(m, t)| *m != method && t.paths.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }

    /// Routes one request to its handler.
    pub(crate) async fn dispatch(&self, mut req: Request) -> Response {
        match self.lookup(req.method(), req.path()) {
            Lookup::Found(handler, params) => {
                req.params = params;
                handler.call(req).await
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                let mut res = Response::status(StatusCode::METHOD_NOT_ALLOWED);
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    res.headers_mut().insert(ALLOW, value);
                }
                res
            }
            Lookup::NotFound => Response::status(StatusCode::NOT_FOUND),
        }
    }

    /// Freezes the router into the terminal handler of a pipeline.
    pub fn into_handler(self) -> BoxedHandler {
        let router = Arc::new(self);
        BoxedHandler::new(move |req: Request| {
            let router = Arc::clone(&router);
            async move { router.dispatch(req).await }
        })
    }
}
