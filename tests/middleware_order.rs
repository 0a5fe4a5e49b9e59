mod common;

use std::sync::{Arc, Mutex};

use rainbow::middleware::{self, Middleware};
use rainbow::{BoxedHandler, Method, Request, Response, Server, StatusCode};

type Log = Arc<Mutex<Vec<String>>>;

fn logger(log: &Log, name: &'static str) -> impl Middleware {
    let log = Arc::clone(log);
    middleware::from_fn(move |req: Request, next: BoxedHandler| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(format!("{name}-request"));
            let res = next.call(req).await;
            log.lock().unwrap().push(format!("{name}-response"));
            res
        }
    })
}

async fn bar(_req: Request) -> Response {
    Response::builder()
        .header("content-type", "text/plain")
        .text("Hello world, Bar\n")
}

#[tokio::test]
async fn two_loggers_around_bar() {
    let log = Log::default();
    let server = Server::new("127.0.0.1:0")
        .register_middleware(logger(&log, "logA"))
        .register_middleware(logger(&log, "logB"))
        .route(Method::GET, "/bar", bar);
    let running = common::spawn(server).await;

    let reply = common::get(running.addr, "/bar").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "Hello world, Bar\n");
    assert_eq!(reply.header("content-type"), Some("text/plain"));
    assert_eq!(
        *log.lock().unwrap(),
        ["logA-request", "logB-request", "logB-response", "logA-response"]
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn later_registrations_nest_inside_earlier_ones() {
    let log = Log::default();
    let mut server = Server::new("127.0.0.1:0")
        .register_middleware(logger(&log, "A"))
        .register_middleware(logger(&log, "B"));
    server.default_router().route(Method::GET, "/", |_req: Request| async { "root" });
    let server = server.register_middleware(logger(&log, "C"));
    let running = common::spawn(server).await;

    common::get(running.addr, "/").await;
    assert_eq!(
        *log.lock().unwrap(),
        ["A-request", "B-request", "C-request", "C-response", "B-response", "A-response"]
    );

    running.stop().await.unwrap();
}

#[tokio::test]
async fn middleware_wraps_unmatched_routes_too() {
    let log = Log::default();
    let server = Server::new("127.0.0.1:0").register_middleware(logger(&log, "A"));
    let running = common::spawn(server).await;

    let reply = common::get(running.addr, "/nowhere").await;
    assert_eq!(reply.status, 404);
    assert_eq!(*log.lock().unwrap(), ["A-request", "A-response"]);

    running.stop().await.unwrap();
}

#[tokio::test]
async fn short_circuit_never_reaches_the_router() {
    let hits = Arc::new(Mutex::new(0));
    let counted = Arc::clone(&hits);
    let server = Server::new("127.0.0.1:0")
        .register_middleware(middleware::from_fn(|req: Request, next: BoxedHandler| async move {
            if req.header("x-api-key") != Some("secret") {
                return Response::status(StatusCode::FORBIDDEN);
            }
            next.call(req).await
        }))
        .route(Method::GET, "/bar", move |_req: Request| {
            let counted = Arc::clone(&counted);
            async move {
                *counted.lock().unwrap() += 1;
                "bar"
            }
        });
    let running = common::spawn(server).await;

    let denied = common::get(running.addr, "/bar").await;
    assert_eq!(denied.status, 403);
    assert_eq!(*hits.lock().unwrap(), 0);

    let allowed = common::send(running.addr, "GET", "/bar", &[("x-api-key", "secret")], "").await;
    assert_eq!(allowed.status, 200);
    assert_eq!(allowed.body, "bar");
    assert_eq!(*hits.lock().unwrap(), 1);

    running.stop().await.unwrap();
}
