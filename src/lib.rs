//! # rainbow
//!
//! A small composable HTTP server builder.
//!
//! You pick an address, stack middleware in the order you want it to run,
//! optionally switch on cookie sessions, register routes, and start. The
//! server handles SIGTERM by refusing new connections and giving in-flight
//! requests up to a minute to finish.
//!
//! What rainbow owns:
//!
//! - **Middleware composition**: units registered `[a, b]` run
//!   `a → b → handler → b → a`; any unit may answer early
//! - **Lifecycle**: bind, serve on tokio + hyper, drain on signal with a
//!   deadline, fatal errors returned to `main` instead of panicking
//! - **Session auth**: login/register endpoints and a session middleware
//!   over a pluggable store (in-memory or Redis)
//!
//! What it leaves to others: TLS, rate limiting, body-size limits, cookie
//! signing, connection pooling (deadpool-redis does that).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rainbow::{BoxedHandler, Method, Request, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rainbow::Error> {
//!     let log = middleware::from_fn(|req: Request, next: BoxedHandler| async move {
//!         tracing::info!("middleware1 request");
//!         let res = next.call(req).await;
//!         tracing::info!("middleware1 response");
//!         res
//!     });
//!
//!     Server::new(":8081")
//!         .register_middleware(middleware::trace())
//!         .register_middleware(log)
//!         .use_auth()
//!         .route(Method::GET, "/bar", |_req: Request| async { "Hello world, Bar\n" })
//!         .start()
//!         .await
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod template;

pub mod auth;
pub mod config;
pub mod middleware;
pub mod session;
pub mod users;

pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use http::{Method, StatusCode};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{DEFAULT_DRAIN_TIMEOUT, Listening, Server, termination_signal};
