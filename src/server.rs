//! Server builder, lifecycle and graceful shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Server::new ──builder calls──▶ listen() ──▶ Listening::serve(signal)
//!  Configuring                    Serving        │ signal fires
//!                                                ▼
//!                                  Draining ──▶ Stopped (Ok)  or  DrainTimeout (Err)
//! ```
//!
//! Each state is a different value: a [`Server`] can only be configured, a
//! [`Listening`] can only serve, and serving consumes it. The middleware list
//! is moved into the composed chain when `listen` is called, so nothing can
//! register a unit once traffic flows.
//!
//! # Graceful shutdown
//!
//! When the stop signal fires the server:
//! 1. Stops calling `listener.accept()` and closes the socket; new
//!    connections are refused.
//! 2. Tells every open connection to finish the request it is serving and
//!    then close, instead of waiting for the next keep-alive request.
//! 3. Waits for those connections for at most the drain deadline (one minute
//!    by default). Past it, the remaining tasks are aborted and
//!    [`Error::DrainTimeout`] is returned; the caller decides how to exit.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::auth::{self, SessionAuth};
use crate::config::StoreConfig;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::session::{MemorySessionStore, RedisSessionStore, SessionStore};
use crate::template;
use crate::users::{MemoryUserStore, UserStore};

/// Default upper bound on the graceful drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

// ── Server (configuring) ──────────────────────────────────────────────────────

/// The HTTP server, while it is being configured.
///
/// Every builder call consumes the server and hands it back, so
/// configuration reads as one chain:
///
/// ```rust,no_run
/// use rainbow::{Method, Request, Server, middleware};
///
/// # async fn run() -> Result<(), rainbow::Error> {
/// Server::new(":8081")
///     .register_middleware(middleware::trace())
///     .use_auth()
///     .route(Method::GET, "/bar", |_req: Request| async { "Hello world, Bar\n" })
///     .start()
///     .await
/// # }
/// ```
pub struct Server {
    addr: String,
    router: Router,
    pipeline: Pipeline,
    sessions: Option<Arc<dyn SessionStore>>,
    auth_prefix: String,
    auth_mounted: bool,
    drain_timeout: Duration,
}

impl Server {
    /// A server that will listen on `addr` (`host:port`, or `:port` for all
    /// interfaces). Nothing is bound until [`listen`](Server::listen).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            router: Router::new(),
            pipeline: Pipeline::new(),
            sessions: None,
            auth_prefix: auth::DEFAULT_PREFIX.to_owned(),
            auth_mounted: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Appends a middleware unit. Units run request-side in the order they
    /// are registered and response-side in reverse.
    pub fn register_middleware(mut self, middleware: impl Middleware) -> Self {
        self.pipeline.register(middleware);
        self
    }

    /// Uses a Redis session store configured from `STORE_HOST` / `STORE_PORT`.
    ///
    /// Fails with [`Error::Config`] when the variables are missing or invalid.
    pub fn use_session_store(self) -> Result<Self, Error> {
        let cfg = StoreConfig::from_env()?;
        info!(addr = %cfg.url(), "connecting to session store pool");
        let store = RedisSessionStore::connect(&cfg)?;
        Ok(self.with_session_store(store))
    }

    /// Uses the given session store.
    pub fn with_session_store(mut self, store: impl SessionStore) -> Self {
        self.sessions = Some(Arc::new(store));
        self
    }

    /// Where [`use_auth`](Server::use_auth) mounts its routes. Call it first:
    /// once the routes are mounted a new prefix is ignored with a warning.
    pub fn auth_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_owned();
        if self.auth_mounted {
            warn!(
                ignored = %prefix,
                mounted = %self.auth_prefix,
                "auth routes are already mounted, auth_prefix has no effect"
            );
            return self;
        }
        self.auth_prefix = prefix;
        self
    }

    /// Enables session auth with an in-memory user store.
    pub fn use_auth(self) -> Self {
        self.use_auth_with(MemoryUserStore::new())
    }

    /// Enables session auth backed by `users`.
    ///
    /// Appends one [`SessionAuth`] unit at the current end of the middleware
    /// list, and registers `POST {prefix}/login` and `POST {prefix}/register`.
    pub fn use_auth_with(mut self, users: impl UserStore) -> Self {
        let users: Arc<dyn UserStore> = Arc::new(users);
        let sessions = match self.sessions.clone() {
            Some(s) => s,
            None => {
                warn!("no session store configured, keeping sessions in memory");
                let s: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
                self.sessions = Some(Arc::clone(&s));
                s
            }
        };

        self.pipeline.register(SessionAuth::new(Arc::clone(&sessions), Arc::clone(&users)));

        let login = {
            let users = Arc::clone(&users);
            move |req: Request| auth::login(req, Arc::clone(&users), Arc::clone(&sessions))
        };
        let register = move |req: Request| auth::register(req, Arc::clone(&users));
        let prefix = self.auth_prefix.clone();
        self.router
            .route(Method::POST, &format!("{prefix}/login"), login)
            .route(Method::POST, &format!("{prefix}/register"), register);
        self.auth_mounted = true;
        self
    }

    /// Serves `GET path` by rendering the first of `files` with `data`.
    pub fn serve_template<P>(
        mut self,
        path: &str,
        data: impl Serialize,
        files: impl IntoIterator<Item = P>,
    ) -> Self
    where
        P: Into<PathBuf>,
    {
        let files = files.into_iter().map(Into::into).collect();
        let data = minijinja::Value::from_serialize(data);
        self.router.route(Method::GET, path, template::handler(data, files));
        self
    }

    /// Registers a route on the default router.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.router.route(method, path, handler);
        self
    }

    /// The router that terminates the pipeline, for registering many routes.
    pub fn default_router(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Upper bound on the graceful drain. Defaults to one minute.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Binds the listen address and freezes the pipeline.
    pub async fn listen(self) -> Result<Listening, Error> {
        let addr = normalize_addr(&self.addr);
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| Error::Bind { addr: addr.clone(), source })?;

        let chain = self.pipeline.build(self.router.into_handler());
        info!(addr = %addr, middleware = self.pipeline.len(), "rainbow listening");

        Ok(Listening { listener, chain, drain_timeout: self.drain_timeout })
    }

    /// Serves until SIGTERM or Ctrl-C, then drains.
    ///
    /// The signal handler is installed before the socket is bound, so a
    /// signal that arrives during startup is not lost.
    pub async fn start(self) -> Result<(), Error> {
        let signal = termination_signal()?;
        self.start_with_shutdown(signal).await
    }

    /// Serves until `signal` resolves, then drains.
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        self.listen().await?.serve(signal).await
    }
}

/// `":8081"` means every interface, as in most Go and Node servers.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_owned()
    }
}

// ── Listening (serving, draining) ─────────────────────────────────────────────

/// A bound server, ready to accept connections.
pub struct Listening {
    listener: TcpListener,
    chain: BoxedHandler,
    drain_timeout: Duration,
}

impl Listening {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, then drains.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let Listening { listener, chain, drain_timeout } = self;

        // Flipped once, when draining starts; every connection task watches it.
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut accept_delay: Option<Duration> = None;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting immediately,
                // even if more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => {
                            accept_delay = None;
                            v
                        }
                        Err(e) => match classify_accept_error(&e) {
                            AcceptFault::Connection => {
                                warn!("accept error: {e}");
                                continue;
                            }
                            AcceptFault::Exhausted => {
                                let delay = next_accept_delay(accept_delay);
                                accept_delay = Some(delay);
                                warn!(retry_in = ?delay, in_flight = tasks.len(), "accept error: {e}");
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                            AcceptFault::Listener => {
                                error!("listener failed: {e}");
                                tasks.abort_all();
                                return Err(Error::Accept(e));
                            }
                        },
                    };
                    tasks.spawn(serve_connection(stream, remote_addr, chain.clone(), drain_rx.clone()));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!("connection task failed: {e}");
                    }
                }
            }
        }

        drop(listener);
        drain_tx.send_replace(true);

        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    error!("connection task failed: {e}");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("rainbow stopped");
                Ok(())
            }
            Err(_) => {
                let in_flight = tasks.len();
                tasks.abort_all();
                error!(in_flight, timeout = ?drain_timeout, "graceful shutdown timed out");
                Err(Error::DrainTimeout { timeout: drain_timeout, in_flight })
            }
        }
    }
}

const ACCEPT_DELAY_START: Duration = Duration::from_millis(5);
const ACCEPT_DELAY_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq)]
enum AcceptFault {
    /// One half-open connection failed; accept the next one.
    Connection,
    /// The process is out of descriptors or buffers; back off and retry.
    Exhausted,
    /// The listener itself is broken.
    Listener,
}

fn classify_accept_error(e: &io::Error) -> AcceptFault {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFault::Connection,
        io::ErrorKind::OutOfMemory => AcceptFault::Exhausted,
        _ if is_resource_exhaustion(e) => AcceptFault::Exhausted,
        _ => AcceptFault::Listener,
    }
}

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

/// 5ms, doubling up to one second; reset by the next successful accept.
fn next_accept_delay(prev: Option<Duration>) -> Duration {
    prev.map_or(ACCEPT_DELAY_START, |d| (d * 2).min(ACCEPT_DELAY_MAX))
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    chain: BoxedHandler,
    mut draining: watch::Receiver<bool>,
) {
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let chain = chain.clone();
        async move { Ok::<_, Infallible>(dispatch(chain, req).await) }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2, whatever the client
    // negotiates.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = draining.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Reads one request body and runs it through the composed chain.
///
/// Never fails: an unreadable body becomes a `400`, anything else is the
/// chain's own response.
async fn dispatch(
    chain: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("error reading body: {e}");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .text("can't read body")
                .into_hyper();
        }
    };

    debug!(method = %parts.method, path = parts.uri.path(), "start request");
    let res = chain.call(Request::new(parts, body)).await;
    debug!(status = res.status_code().as_u16(), "finish request");
    res.into_hyper()
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Installs the termination handlers now and returns a future that resolves
/// on the first signal.
///
/// On Unix this listens for both **SIGTERM** (`kill -15`, container
/// orchestrators) and **SIGINT** (Ctrl-C, for local dev). Both handlers are
/// in place when this returns, so a signal that arrives before the future is
/// first polled is still observed.
#[cfg(unix)]
pub fn termination_signal() -> Result<impl Future<Output = ()> + Send + 'static, Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::Signal)?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    })
}

/// Installs the Ctrl-C handler now and returns a future that resolves on
/// the first Ctrl-C.
#[cfg(windows)]
pub fn termination_signal() -> Result<impl Future<Output = ()> + Send + 'static, Error> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c().map_err(Error::Signal)?;

    Ok(async move {
        ctrl_c.recv().await;
        info!("Ctrl-C received");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Lookup;

    #[test]
    fn bare_port_means_all_interfaces() {
        assert_eq!(normalize_addr(":8081"), "0.0.0.0:8081");
        assert_eq!(normalize_addr("127.0.0.1:0"), "127.0.0.1:0");
    }

    #[test]
    fn per_connection_accept_errors_are_not_fatal() {
        let classify = |kind: io::ErrorKind| classify_accept_error(&io::Error::from(kind));
        assert_eq!(classify(io::ErrorKind::ConnectionAborted), AcceptFault::Connection);
        assert_eq!(classify(io::ErrorKind::ConnectionReset), AcceptFault::Connection);
        assert_eq!(classify(io::ErrorKind::OutOfMemory), AcceptFault::Exhausted);
        assert_eq!(classify(io::ErrorKind::PermissionDenied), AcceptFault::Listener);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_backs_off_instead_of_failing() {
        for errno in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS] {
            let e = io::Error::from_raw_os_error(errno);
            assert_eq!(classify_accept_error(&e), AcceptFault::Exhausted, "{e}");
        }
        let e = io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(classify_accept_error(&e), AcceptFault::Listener);
    }

    #[test]
    fn accept_delay_doubles_up_to_one_second() {
        let mut delay = next_accept_delay(None);
        assert_eq!(delay, Duration::from_millis(5));
        delay = next_accept_delay(Some(delay));
        assert_eq!(delay, Duration::from_millis(10));
        for _ in 0..20 {
            delay = next_accept_delay(Some(delay));
        }
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unbindable_address_is_a_bind_error() {
        let err = Server::new("not-an-address").listen().await.err().unwrap();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[test]
    fn auth_prefix_drops_trailing_slash() {
        let server = Server::new(":0").auth_prefix("/auth/");
        assert_eq!(server.auth_prefix, "/auth");
    }

    #[test]
    fn auth_prefix_after_use_auth_keeps_mounted_routes() {
        let server = Server::new(":0").use_auth().auth_prefix("/auth");
        assert_eq!(server.auth_prefix, "/api/users");
        assert!(matches!(
            server.router.lookup(&Method::POST, "/api/users/login"),
            Lookup::Found(..)
        ));
        assert!(matches!(server.router.lookup(&Method::POST, "/auth/login"), Lookup::NotFound));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigint_before_first_poll_is_not_lost() {
        let signal = termination_signal().unwrap();
        // The handler is installed, so this does not terminate the test process.
        unsafe {
            libc::raise(libc::SIGINT);
        }
        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("SIGINT raised before polling resolves the signal future");
    }
}
