//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{RetryPolicy, SagaConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8080`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON logs, anything else for plain text
/// - `DATABASE_URL`: PostgreSQL checkpoint store; in-memory when unset
/// - `SAGA_DECISION_TIMEOUT_SECS`: decision window (default: `86400`)
/// - `ACTIVITY_TIMEOUT_SECS`: per-attempt activity timeout (default: `60`)
/// - `ACTIVITY_MAX_ATTEMPTS`: attempts per activity (default: `3`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub decision_timeout_secs: u64,
    pub activity_timeout_secs: u64,
    pub activity_max_attempts: u32,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Plain
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            decision_timeout_secs: parse_or(
                lookup("SAGA_DECISION_TIMEOUT_SECS"),
                defaults.decision_timeout_secs,
            ),
            activity_timeout_secs: parse_or(
                lookup("ACTIVITY_TIMEOUT_SECS"),
                defaults.activity_timeout_secs,
            ),
            activity_max_attempts: parse_or(
                lookup("ACTIVITY_MAX_ATTEMPTS"),
                defaults.activity_max_attempts,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the saga tunables.
    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            decision_timeout: Duration::from_secs(self.decision_timeout_secs),
            retry_policy: RetryPolicy::default()
                .with_max_attempts(self.activity_max_attempts)
                .with_attempt_timeout(Duration::from_secs(self.activity_timeout_secs)),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            database_url: None,
            decision_timeout_secs: 86_400,
            activity_timeout_secs: 60,
            activity_max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_reads_variables() {
        let config = from_pairs(&[
            ("PORT", "9090"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("SAGA_DECISION_TIMEOUT_SECS", "120"),
            ("ACTIVITY_MAX_ATTEMPTS", "5"),
        ]);
        assert_eq!(config.port, 9090);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sagas"));
        assert_eq!(config.decision_timeout_secs, 120);
        assert_eq!(config.activity_max_attempts, 5);
        assert_eq!(config.activity_timeout_secs, 60);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_pairs(&[("PORT", "http"), ("ACTIVITY_TIMEOUT_SECS", "-1")]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.activity_timeout_secs, 60);
    }

    #[test]
    fn test_saga_config_mapping() {
        let config = from_pairs(&[
            ("SAGA_DECISION_TIMEOUT_SECS", "30"),
            ("ACTIVITY_TIMEOUT_SECS", "5"),
            ("ACTIVITY_MAX_ATTEMPTS", "4"),
        ]);
        let saga = config.saga_config();
        assert_eq!(saga.decision_timeout, Duration::from_secs(30));
        assert_eq!(saga.retry_policy.max_attempts, 4);
        assert_eq!(saga.retry_policy.attempt_timeout, Duration::from_secs(5));
        assert_eq!(saga.retry_policy.initial_backoff, Duration::from_secs(1));
    }
}
