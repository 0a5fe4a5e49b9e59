//! Cookie-session authentication.
//!
//! Enabling auth on a [`Server`](crate::Server) contributes:
//!
//! | Piece | What it does |
//! |---|---|
//! | [`SessionAuth`] middleware | resolves the `session` cookie to an [`Identity`]; attaches new sessions to responses |
//! | `POST {prefix}/login` | checks credentials, opens a session, replies with `X-User-Id` |
//! | `POST {prefix}/register` | creates a user, replies `success: <id>` |
//!
//! The login handler never writes `Set-Cookie` itself. It tags its response
//! with a [`SessionToken`] extension and `SessionAuth` turns that into the
//! cookie on the way out, so the cookie format lives in one place.

use std::sync::Arc;

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderValue, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::handler::BoxedHandler;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::session::SessionStore;
use crate::users::UserStore;

/// Name of the session cookie.
pub const COOKIE_NAME: &str = "session";

/// Default mount point of the login and register routes.
pub const DEFAULT_PREFIX: &str = "/api/users";

/// The authenticated user of a request, attached by [`SessionAuth`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity(pub String);

/// Response extension asking [`SessionAuth`] to set the session cookie.
#[derive(Clone, Debug)]
pub struct SessionToken(pub String);

/// Returns the logged-in user id, if [`SessionAuth`] resolved one.
pub fn current_user(req: &Request) -> Option<&str> {
    req.extensions().get::<Identity>().map(|id| id.0.as_str())
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Session middleware.
///
/// Request phase:
/// - no cookie, or a token the store does not know → anonymous, continue;
/// - a token whose user still validates → attach [`Identity`], continue;
/// - a token whose user no longer validates → `401`, inner layers skipped;
/// - store failure → `503`, inner layers skipped.
///
/// Response phase: a [`SessionToken`] extension becomes a `Set-Cookie`.
#[derive(Clone)]
pub struct SessionAuth {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
}

impl SessionAuth {
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>) -> Self {
        Self { sessions, users }
    }

    async fn handle(&self, mut req: Request, next: BoxedHandler) -> Response {
        if let Some(token) = session_cookie(&req) {
            match self.sessions.user_id(&token).await {
                Ok(Some(user_id)) => {
                    if !self.users.validate(&user_id).await {
                        warn!(user_id = %user_id, "session for unknown user rejected");
                        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
                    }
                    debug!(user_id = %user_id, "session resolved");
                    req.extensions_mut().insert(Identity(user_id));
                }
                Ok(None) => debug!("unknown session token; continuing anonymous"),
                Err(e) => {
                    error!("session lookup failed: {e}");
                    return Response::status(StatusCode::SERVICE_UNAVAILABLE);
                }
            }
        } else {
            debug!("non logged-in session");
        }

        let mut res = next.call(req).await;

        if let Some(SessionToken(token)) = res.extensions_mut().remove::<SessionToken>() {
            let cookie = format!(
                "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
                self.sessions.ttl().as_secs()
            );
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    res.headers_mut().append(SET_COOKIE, value);
                }
                Err(_) => error!("session token is not a valid cookie value"),
            }
        }
        res
    }
}

impl Middleware for SessionAuth {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let auth = self.clone();
        BoxedHandler::new(move |req: Request| {
            let auth = auth.clone();
            let next = next.clone();
            async move { auth.handle(req, next).await }
        })
    }
}

/// Value of the session cookie across every `Cookie` header, if present.
fn session_cookie(req: &Request) -> Option<String> {
    req.headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == COOKIE_NAME && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

fn credentials(req: &Request) -> Result<Credentials, Response> {
    serde_json::from_slice(req.body()).map_err(|e| {
        warn!("error unmarshaling body: {e}");
        (StatusCode::BAD_REQUEST, "can't read body").into_response()
    })
}

/// `POST {prefix}/login`
pub(crate) async fn login(
    req: Request,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
) -> Response {
    let creds = match credentials(&req) {
        Ok(c) => c,
        Err(res) => return res,
    };

    let user_id = match users.login(&creds.username, &creds.password).await {
        Ok(id) => id,
        Err(e) => {
            debug!(username = %creds.username, "login refused: {e}");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    };

    let token = match sessions.create(&user_id).await {
        Ok(token) => token,
        Err(e) => {
            error!(user_id = %user_id, "could not create session: {e}");
            return Response::status(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    info!(user_id = %user_id, "login success");
    let mut res = Response::builder().header("x-user-id", &user_id).no_body();
    res.extensions_mut().insert(SessionToken(token));
    res
}

/// `POST {prefix}/register`
pub(crate) async fn register(req: Request, users: Arc<dyn UserStore>) -> Response {
    let creds = match credentials(&req) {
        Ok(c) => c,
        Err(res) => return res,
    };

    match users.create(&creds.username, &creds.password).await {
        Ok(user_id) => {
            info!(user_id = %user_id, "register success");
            Response::text(format!("success: {user_id}"))
        }
        Err(e) => {
            debug!(username = %creds.username, "register refused: {e}");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}
