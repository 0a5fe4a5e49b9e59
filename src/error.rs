//! Unified error type.

use std::time::Duration;

/// The error type returned by rainbow's fallible lifecycle operations.
///
/// Every variant is fatal: it means the server could not start, or could not
/// stop cleanly. Request-level failures (bad body, wrong password, unknown
/// route) are expressed as HTTP [`Response`](crate::Response) values and
/// never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed configuration, e.g. `STORE_PORT=abc`.
    #[error("config: {0}")]
    Config(String),

    /// The listen address could not be bound.
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener failed while serving.
    #[error("accept: {0}")]
    Accept(#[source] std::io::Error),

    /// The termination signal handler could not be installed.
    #[error("signal: {0}")]
    Signal(#[source] std::io::Error),

    /// In-flight requests were still running when the drain deadline passed.
    #[error("graceful shutdown timed out after {timeout:?} with {in_flight} connection(s) still open")]
    DrainTimeout { timeout: Duration, in_flight: usize },
}
