//! Relay configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tally_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_REQUEST_AGE_MS};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`, default `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`, default `./tally-relay.db`
    pub database_path: PathBuf,

    /// Largest accepted request body in bytes.
    /// Env: `MAX_BODY_SIZE`, default 16 MiB
    pub max_body_size: usize,

    /// Replay window for signed requests.
    /// Env: `AUTH_MAX_AGE_MS`, default 300000
    pub auth_max_age_ms: i64,

    /// Snapshots kept per vault (0 = keep all).
    /// Env: `SNAPSHOT_RETENTION`
    pub snapshot_retention: usize,

    /// Env: `RATE_LIMIT_PER_SEC`, default 10
    pub rate_limit_per_sec: f64,

    /// Env: `RATE_LIMIT_BURST`, default 30
    pub rate_limit_burst: f64,

    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./tally-relay.db"),
            max_body_size: 16 * 1024 * 1024, // 16 MiB
            auth_max_age_ms: DEFAULT_MAX_REQUEST_AGE_MS,
            snapshot_retention: 0,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            instance_name: "Tally Relay".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        parse_into(&lookup, "MAX_BODY_SIZE", &mut config.max_body_size);
        parse_into(&lookup, "AUTH_MAX_AGE_MS", &mut config.auth_max_age_ms);
        parse_into(&lookup, "SNAPSHOT_RETENTION", &mut config.snapshot_retention);
        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        if config.auth_max_age_ms <= 0 {
            tracing::warn!(
                value = config.auth_max_age_ms,
                "AUTH_MAX_AGE_MS must be positive, using default"
            );
            config.auth_max_age_ms = DEFAULT_MAX_REQUEST_AGE_MS;
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.is_empty()) {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_body_size, 16 * 1024 * 1024);
        assert_eq!(config.auth_max_age_ms, 300_000);
        assert_eq!(config.snapshot_retention, 0);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/var/lib/tally/relay.db"),
            ("SNAPSHOT_RETENTION", "3"),
            ("AUTH_MAX_AGE_MS", "60000"),
            ("INSTANCE_NAME", "Home"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/tally/relay.db"));
        assert_eq!(config.snapshot_retention, 3);
        assert_eq!(config.auth_max_age_ms, 60_000);
        assert_eq!(config.instance_name, "Home");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MAX_BODY_SIZE", "huge"),
            ("AUTH_MAX_AGE_MS", "-5"),
            ("RATE_LIMIT_PER_SEC", ""),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.max_body_size, defaults.max_body_size);
        assert_eq!(config.auth_max_age_ms, defaults.auth_max_age_ms);
        assert_eq!(config.rate_limit_per_sec, defaults.rate_limit_per_sec);
    }
}
