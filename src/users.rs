//! User stores backing the login and register endpoints.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// Why a user store refused a request.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserError {
    #[error("username `{0}` is already taken")]
    DuplicateUsername(String),

    #[error("invalid username")]
    UnknownUsername,

    #[error("invalid password")]
    WrongPassword,

    #[error("user store: {0}")]
    Backend(String),
}

/// Where user accounts live.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Registers a user and returns its new id.
    async fn create(&self, username: &str, password: &str) -> Result<String, UserError>;

    /// Checks credentials and returns the user's id.
    async fn login(&self, username: &str, password: &str) -> Result<String, UserError>;

    /// Whether `user_id` still names an account.
    async fn validate(&self, user_id: &str) -> bool;
}

struct UserEntity {
    id: String,
    password_hash: String,
    salt: String,
}

/// Process-local user store for development.
///
/// Passwords are stored as `sha256(password + salt)` with a random 4-byte
/// hex salt per user. Lost on restart.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserEntity>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, username: &str, password: &str) -> Result<String, UserError> {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(UserError::DuplicateUsername(username.to_owned()));
        }

        let salt = hex::encode(random_bytes::<4>());
        let entity = UserEntity {
            id: URL_SAFE_NO_PAD.encode(random_bytes::<8>()),
            password_hash: hash_password(password, &salt),
            salt,
        };
        let id = entity.id.clone();
        users.insert(username.to_owned(), entity);
        Ok(id)
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, UserError> {
        let users = self.users.read().await;
        let entity = users.get(username).ok_or(UserError::UnknownUsername)?;
        if hash_password(password, &entity.salt) != entity.password_hash {
            return Err(UserError::WrongPassword);
        }
        Ok(entity.id.clone())
    }

    async fn validate(&self, user_id: &str) -> bool {
        self.users.read().await.values().any(|e| e.id == user_id)
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_login() {
        let store = MemoryUserStore::new();
        let id = store.create("alice", "pw1").await.unwrap();
        assert_eq!(id.len(), 11);
        assert_eq!(store.login("alice", "pw1").await.unwrap(), id);
        assert!(store.validate(&id).await);
    }

    #[tokio::test]
    async fn rejects_bad_credentials() {
        let store = MemoryUserStore::new();
        store.create("alice", "pw1").await.unwrap();
        assert_eq!(store.login("alice", "wrong").await, Err(UserError::WrongPassword));
        assert_eq!(store.login("bob", "pw1").await, Err(UserError::UnknownUsername));
        assert!(!store.validate("nobody").await);
    }

    #[tokio::test]
    async fn rejects_duplicate_usernames() {
        let store = MemoryUserStore::new();
        store.create("alice", "pw1").await.unwrap();
        assert_eq!(
            store.create("alice", "pw2").await,
            Err(UserError::DuplicateUsername("alice".to_owned()))
        );
        // The original account is untouched.
        assert!(store.login("alice", "pw1").await.is_ok());
    }

    #[test]
    fn salt_changes_the_hash() {
        assert_ne!(hash_password("pw", "aa"), hash_password("pw", "bb"));
        assert_eq!(hash_password("pw", "aa"), hash_password("pw", "aa"));
    }
}
