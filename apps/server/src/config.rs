//! Server configuration from `TILLSYNC_*` environment variables.

use std::time::Duration;

use tillsync_core::idempotency::DEFAULT_IDEMPOTENCY_TTL_HOURS;
use tracing::warn;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8088";
const DEFAULT_DB_PATH: &str = "./tillsync.db";
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub db_path: String,
    pub idempotency_ttl_hours: i64,
    pub purge_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            idempotency_ttl_hours: DEFAULT_IDEMPOTENCY_TTL_HOURS,
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            warn!("Ignoring invalid {}='{}', using {}", name, raw, default);
            default
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_string)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: lookup("TILLSYNC_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            db_path: lookup("TILLSYNC_DB_PATH").unwrap_or(defaults.db_path),
            idempotency_ttl_hours: parse_positive(
                "TILLSYNC_IDEMPOTENCY_TTL_HOURS",
                lookup("TILLSYNC_IDEMPOTENCY_TTL_HOURS"),
                defaults.idempotency_ttl_hours,
            ),
            purge_interval: Duration::from_secs(parse_positive(
                "TILLSYNC_PURGE_INTERVAL_SECS",
                lookup("TILLSYNC_PURGE_INTERVAL_SECS"),
                DEFAULT_PURGE_INTERVAL_SECS,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.listen_addr, "127.0.0.1:8088");
        assert_eq!(config.idempotency_ttl_hours, 72);
        assert_eq!(config.purge_interval, Duration::from_secs(900));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TILLSYNC_IDEMPOTENCY_TTL_HOURS", "soon"),
            ("TILLSYNC_PURGE_INTERVAL_SECS", "0"),
            ("TILLSYNC_DB_PATH", " /var/lib/till.db "),
        ]));
        assert_eq!(config.idempotency_ttl_hours, 72);
        assert_eq!(config.purge_interval, Duration::from_secs(900));
        assert_eq!(config.db_path, "/var/lib/till.db");
    }

    #[test]
    fn valid_values_override() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("TILLSYNC_IDEMPOTENCY_TTL_HOURS", "24"),
            ("TILLSYNC_LISTEN_ADDR", "0.0.0.0:9000"),
        ]));
        assert_eq!(config.idempotency_ttl_hours, 24);
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
    }
}
