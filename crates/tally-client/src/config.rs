//! Client configuration from `TALLY_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use tally_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `TALLY_RELAY_URL`
    pub relay_url: String,

    /// Env: `TALLY_REQUEST_TIMEOUT_SECS`, default 30
    pub request_timeout: Duration,

    /// Minimum gap between presence emissions.
    /// Env: `TALLY_PRESENCE_THROTTLE_MS`, default 100
    pub presence_throttle: Duration,

    /// Updates fetched per page while pulling.
    /// Env: `TALLY_PULL_PAGE_SIZE`, default 500
    pub pull_page_size: u32,

    /// Env: `TALLY_REPLICA_ID`, random per process when unset
    pub replica_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            request_timeout: Duration::from_secs(30),
            presence_throttle: Duration::from_millis(100),
            pull_page_size: 500,
            replica_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("TALLY_RELAY_URL").filter(|u| !u.trim().is_empty()) {
            config.relay_url = url.trim().trim_end_matches('/').to_string();
        }

        let mut timeout_secs = config.request_timeout.as_secs();
        parse_into(&lookup, "TALLY_REQUEST_TIMEOUT_SECS", &mut timeout_secs);
        config.request_timeout = Duration::from_secs(timeout_secs.max(1));

        let mut throttle_ms = config.presence_throttle.as_millis() as u64;
        parse_into(&lookup, "TALLY_PRESENCE_THROTTLE_MS", &mut throttle_ms);
        config.presence_throttle = Duration::from_millis(throttle_ms);

        parse_into(&lookup, "TALLY_PULL_PAGE_SIZE", &mut config.pull_page_size);
        if !(1..=tally_shared::constants::MAX_UPDATE_LIMIT).contains(&config.pull_page_size) {
            tracing::warn!(
                value = config.pull_page_size,
                "TALLY_PULL_PAGE_SIZE out of range, using default"
            );
            config.pull_page_size = Self::default().pull_page_size;
        }

        if let Some(replica) = lookup("TALLY_REPLICA_ID") {
            let replica = replica.trim();
            if replica.is_empty() || replica.contains(char::is_whitespace) {
                tracing::warn!(value = %replica, "Invalid TALLY_REPLICA_ID, using random id");
            } else {
                config.replica_id = replica.to_string();
            }
        }

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

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.relay_url, "http://127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.presence_throttle, Duration::from_millis(100));
        assert_eq!(config.pull_page_size, 500);
        assert_eq!(config.replica_id.len(), 32);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("TALLY_RELAY_URL", "https://relay.example.org/"),
            ("TALLY_REQUEST_TIMEOUT_SECS", "5"),
            ("TALLY_PRESENCE_THROTTLE_MS", "250"),
            ("TALLY_PULL_PAGE_SIZE", "50"),
            ("TALLY_REPLICA_ID", "laptop-1"),
        ]);
        assert_eq!(config.relay_url, "https://relay.example.org");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.presence_throttle, Duration::from_millis(250));
        assert_eq!(config.pull_page_size, 50);
        assert_eq!(config.replica_id, "laptop-1");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = from_pairs(&[
            ("TALLY_REQUEST_TIMEOUT_SECS", "soon"),
            ("TALLY_PULL_PAGE_SIZE", "5000"),
            ("TALLY_REPLICA_ID", "has space"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.pull_page_size, 500);
        assert_ne!(config.replica_id, "has space");
    }
}
