//! Per-request span with method, path, status and latency.

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use super::Middleware;
use crate::handler::BoxedHandler;
use crate::request::Request;

/// Wraps every request in an `info`-level `request` span and logs the
/// outcome when the inner layers return.
///
/// Register it first so the span covers every other unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

/// Shorthand for [`Trace`].
pub fn trace() -> Trace {
    Trace
}

impl Middleware for Trace {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        BoxedHandler::new(move |req: Request| {
            let next = next.clone();
            let span = info_span!("request", method = %req.method(), path = %req.path());
            async move {
                let started = Instant::now();
                let res = next.call(req).await;
                info!(
                    status = res.status_code().as_u16(),
                    latency_us = started.elapsed().as_micros() as u64,
                    "request finished"
                );
                res
            }
            .instrument(span)
        })
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::response::Response;

    #[tokio::test]
    async fn passes_the_response_through() {
        let terminal = BoxedHandler::new(|_req: Request| async {
            Response::builder().status(StatusCode::CREATED).text("made")
        });
        let chain = trace().wrap(terminal);

        let res = chain.call(Request::test(Method::POST, "/things", "")).await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.body(), b"made".as_slice());
    }
}
