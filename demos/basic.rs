//! Two logging middleware, session auth, one route and a template.
//!
//! Run with an in-memory session store:
//!   RUST_LOG=info cargo run --example basic
//!
//! Or against Redis:
//!   STORE_HOST=127.0.0.1 STORE_PORT=6379 cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8081/bar
//!   curl -X POST localhost:8081/api/users/register -d '{"username":"alice","password":"pw1"}'
//!   curl -i -X POST localhost:8081/api/users/login -d '{"username":"alice","password":"pw1"}'
//!   pkill -15 basic

use rainbow::middleware::{self, Middleware};
use rainbow::session::MemorySessionStore;
use rainbow::{BoxedHandler, Method, Request, Response, Server};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
struct Page {
    name: &'static str,
}

fn logger(name: &'static str) -> impl Middleware {
    middleware::from_fn(move |req: Request, next: BoxedHandler| async move {
        info!("[log] {name} request");
        let res = next.call(req).await;
        info!("[log] {name} response");
        res
    })
}

// GET /bar
async fn bar(_req: Request) -> Response {
    Response::builder()
        .header("content-type", "text/plain")
        .text("Hello world, Bar\n")
}

#[tokio::main]
async fn main() -> Result<(), rainbow::Error> {
    tracing_subscriber::fmt::init();

    let server = Server::new(":8081");
    let server = if std::env::var_os("STORE_HOST").is_some() {
        server.use_session_store()?
    } else {
        warn!("STORE_HOST not set, using in-memory sessions");
        server.with_session_store(MemorySessionStore::default())
    };

    server
        .register_middleware(middleware::trace())
        .use_auth()
        .register_middleware(logger("middleware1"))
        .register_middleware(logger("middleware2"))
        .route(Method::GET, "/bar", bar)
        .serve_template(
            "/",
            Page { name: "Hello, Foo" },
            [concat!(env!("CARGO_MANIFEST_DIR"), "/demos/index.html")],
        )
        .start()
        .await
}
