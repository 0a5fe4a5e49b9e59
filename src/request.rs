//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri};

/// An incoming HTTP request with its body fully read.
///
/// Middleware may stash typed values in [`extensions_mut`](Request::extensions_mut)
/// for inner layers to pick up; the session middleware does this with
/// [`Identity`](crate::auth::Identity).
pub struct Request {
    pub(crate) parts: Parts,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes) -> Self {
        Self { parts, body, params: HashMap::new() }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn extensions(&self) -> &Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.parts.extensions }
}

#[cfg(test)]
impl Request {
    /// Builds a request without a socket, for unit tests.
    pub(crate) fn test(method: Method, path: &str, body: &str) -> Self {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .expect("valid test request")
            .into_parts();
        Self::new(parts, Bytes::copy_from_slice(body.as_bytes()))
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.parts.headers.insert(
            name,
            http::HeaderValue::from_str(value).expect("valid test header"),
        );
        self
    }
}
