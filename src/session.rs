//! Session stores.
//!
//! A session maps an opaque random token (carried in the `session` cookie)
//! to a user id. Tokens are not signed; whoever holds one holds the session.
//!
//! Two stores ship with the crate:
//!
//! - [`MemorySessionStore`]: process-local, for development and tests.
//! - [`RedisSessionStore`]: Redis behind a `deadpool-redis` pool, shared by
//!   every replica of the service.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use deadpool_redis::redis;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::Error;

const TOKEN_BYTES: usize = 32;
const KEY_PREFIX: &str = "session:";

/// Failure talking to a session backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session pool: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("session backend: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Backend that establishes and resolves login sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Starts a session for `user_id` and returns its token.
    async fn create(&self, user_id: &str) -> Result<String, StoreError>;

    /// Resolves a token to its user id; `None` for unknown or expired tokens.
    async fn user_id(&self, token: &str) -> Result<Option<String>, StoreError>;

    /// Ends a session. Unknown tokens are not an error.
    async fn remove(&self, token: &str) -> Result<(), StoreError>;

    /// How long a fresh session stays valid.
    fn ttl(&self) -> Duration;
}

/// A fresh URL-safe session token.
pub fn new_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Process-local session store. Expired entries are dropped on lookup and
/// whenever a new session is created.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: &str) -> Result<String, StoreError> {
        let token = new_token();
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        // Expired tokens that are never looked up again only leave the map here.
        let before = sessions.len();
        sessions.retain(|_, (_, expires)| *expires > now);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "dropped expired sessions");
        }

        sessions.insert(token.clone(), (user_id.to_owned(), now + self.ttl));
        Ok(token)
    }

    async fn user_id(&self, token: &str) -> Result<Option<String>, StoreError> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                None => return Ok(None),
                Some((user_id, expires)) if *expires > Instant::now() => {
                    return Ok(Some(user_id.clone()));
                }
                Some(_) => {}
            }
        }
        debug!("dropping expired session");
        self.sessions.write().await.remove(token);
        Ok(None)
    }

    async fn remove(&self, token: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

// ── Redis ─────────────────────────────────────────────────────────────────────

/// Redis-backed session store.
///
/// Each session is one key, `session:<token>`, holding the user id and
/// expiring after the configured TTL. The pool caps concurrent connections
/// at [`StoreConfig::max_connections`] and health-checks a connection with
/// `PING` before handing it out again.
pub struct RedisSessionStore {
    pool: Pool,
    ttl: Duration,
}

impl RedisSessionStore {
    /// Creates the pool. No connection is opened until the first request.
    pub fn connect(cfg: &StoreConfig) -> Result<Self, Error> {
        let mut pool_cfg = deadpool_redis::Config::from_url(cfg.url());
        pool_cfg.pool = Some(PoolConfig::new(cfg.max_connections));
        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("session store pool: {e}")))?;

        info!(host = %cfg.host, port = cfg.port, max_connections = cfg.max_connections, "session store pool ready");
        Ok(Self { pool, ttl: cfg.session_ttl })
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{token}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, user_id: &str) -> Result<String, StoreError> {
        let token = new_token();
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("SET")
            .arg(Self::key(&token))
            .arg(user_id)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(token)
    }

    async fn user_id(&self, token: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user_id: Option<String> = redis::cmd("GET")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await?;
        Ok(user_id)
    }

    async fn remove(&self, token: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("DEL")
            .arg(Self::key(token))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn memory_store_resolves_and_removes() {
        let store = MemorySessionStore::default();
        let token = store.create("u1").await.unwrap();
        assert_eq!(store.user_id(&token).await.unwrap().as_deref(), Some("u1"));

        store.remove(&token).await.unwrap();
        assert_eq!(store.user_id(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_expires_sessions() {
        let store = MemorySessionStore::new(Duration::ZERO);
        let token = store.create("u1").await.unwrap();
        assert_eq!(store.user_id(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_sessions_do_not_accumulate() {
        let store = MemorySessionStore::new(Duration::ZERO);
        for i in 0..1000 {
            store.create(&format!("u{i}")).await.unwrap();
        }
        assert!(store.sessions.read().await.len() <= 1);
    }

    #[tokio::test]
    async fn creating_keeps_live_sessions() {
        let store = MemorySessionStore::default();
        let first = store.create("u1").await.unwrap();
        let second = store.create("u2").await.unwrap();
        assert_eq!(store.sessions.read().await.len(), 2);
        assert_eq!(store.user_id(&first).await.unwrap().as_deref(), Some("u1"));
        assert_eq!(store.user_id(&second).await.unwrap().as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn redis_store_builds_lazily() {
        let cfg = StoreConfig {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            max_connections: 4,
            session_ttl: Duration::from_secs(60),
        };
        let store = RedisSessionStore::connect(&cfg).unwrap();
        assert_eq!(store.ttl(), Duration::from_secs(60));
        assert_eq!(RedisSessionStore::key("abc"), "session:abc");
    }
}
