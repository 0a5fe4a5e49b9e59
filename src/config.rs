//! Session-store configuration from the environment.
//!
//! | Variable | Required | Default |
//! |---|---|---|
//! | `STORE_HOST` | yes | |
//! | `STORE_PORT` | yes | |
//! | `STORE_MAX_CONNECTIONS` | no | `16` |
//! | `STORE_SESSION_TTL_SECS` | no | `86400` |

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where the session backend lives and how hard to use it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on pooled connections open at once.
    pub max_connections: usize,
    pub session_ttl: Duration,
}

impl StoreConfig {
    /// Reads the `STORE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](StoreConfig::from_env) with an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let host = lookup("STORE_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::Config("STORE_HOST is not set".to_owned()))?;
        let port: u16 = lookup("STORE_PORT")
            .ok_or_else(|| Error::Config("STORE_PORT is not set".to_owned()))
            .and_then(|raw| parse("STORE_PORT", &raw))?;
        let max_connections: usize = match lookup("STORE_MAX_CONNECTIONS") {
            Some(raw) => parse("STORE_MAX_CONNECTIONS", &raw)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(Error::Config("STORE_MAX_CONNECTIONS must be at least 1".to_owned()));
        }
        let session_ttl = match lookup("STORE_SESSION_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse("STORE_SESSION_TTL_SECS", &raw)?),
            None => DEFAULT_SESSION_TTL,
        };

        Ok(Self { host: host.trim().to_owned(), port, max_connections, session_ttl })
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has an invalid value `{raw}`")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn reads_host_and_port_with_defaults() {
        let cfg = StoreConfig::from_lookup(env(&[("STORE_HOST", "cache"), ("STORE_PORT", "6379")]))
            .unwrap();
        assert_eq!(cfg.url(), "redis://cache:6379");
        assert_eq!(cfg.max_connections, 16);
        assert_eq!(cfg.session_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let err = StoreConfig::from_lookup(env(&[("STORE_PORT", "6379")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("STORE_HOST")));
    }

    #[test]
    fn non_numeric_port_is_a_config_error() {
        let err = StoreConfig::from_lookup(env(&[("STORE_HOST", "cache"), ("STORE_PORT", "abc")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("STORE_PORT")));
    }

    #[test]
    fn zero_connections_is_rejected() {
        let err = StoreConfig::from_lookup(env(&[
            ("STORE_HOST", "cache"),
            ("STORE_PORT", "6379"),
            ("STORE_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
