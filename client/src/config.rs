//! Configuration management for the sync daemon.

use std::env;
use std::time::Duration;
use worthy_engine::{Backoff, Strategy};

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL of the Local Store
    pub database_url: String,
    /// Origin of the remote API
    pub api_base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Periodic sync interval while online
    pub sync_interval: Duration,
    /// How often connectivity is probed
    pub probe_interval: Duration,
    /// HTTP request timeout (client default when unset)
    pub request_timeout: Option<Duration>,
    /// Strategy for the bulk reconciliation pass
    pub conflict_strategy: Strategy,
    /// Retry backoff for failed deliveries
    pub backoff: Backoff,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://worthy.db".to_string());

        let api_base_url = lookup("API_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingApiBaseUrl)?;
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidApiBaseUrl(api_base_url));
        }

        let api_token = lookup("API_TOKEN").filter(|v| !v.is_empty());

        let sync_interval = Duration::from_secs(parse_or(&lookup, "SYNC_INTERVAL_SECS", 300)?);
        let probe_interval = Duration::from_secs(parse_or(&lookup, "PROBE_INTERVAL_SECS", 30)?);
        if sync_interval.is_zero() {
            return Err(ConfigError::Invalid("SYNC_INTERVAL_SECS"));
        }
        if probe_interval.is_zero() {
            return Err(ConfigError::Invalid("PROBE_INTERVAL_SECS"));
        }

        let request_timeout = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("REQUEST_TIMEOUT_SECS"))?,
            )),
            None => None,
        };

        let conflict_strategy = match lookup("CONFLICT_STRATEGY") {
            Some(raw) => raw.parse().map_err(ConfigError::InvalidStrategy)?,
            None => Strategy::default(),
        };

        let base = parse_or(&lookup, "RETRY_BASE_MS", 1_000)?;
        let max = parse_or(&lookup, "RETRY_MAX_MS", 300_000)?;
        if base > max {
            return Err(ConfigError::Invalid("RETRY_BASE_MS"));
        }
        let backoff = Backoff::new(Duration::from_millis(base), Duration::from_millis(max));

        Ok(Self {
            database_url,
            api_base_url,
            api_token,
            sync_interval,
            probe_interval,
            request_timeout,
            conflict_strategy,
            backoff,
        })
    }
}

fn parse_or<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("API_BASE_URL environment variable is required")]
    MissingApiBaseUrl,

    #[error("API_BASE_URL must be an http(s) URL, got '{0}'")]
    InvalidApiBaseUrl(String),

    #[error("Invalid {0} value")]
    Invalid(&'static str),

    #[error("{0}")]
    InvalidStrategy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("API_BASE_URL", "https://worthy.example")]).unwrap();
        assert_eq!(config.database_url, "sqlite://worthy.db");
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.conflict_strategy, Strategy::Timestamp);
        assert_eq!(config.backoff, Backoff::default());
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn api_base_url_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::MissingApiBaseUrl);
        assert!(matches!(
            load(&[("API_BASE_URL", "worthy.example")]),
            Err(ConfigError::InvalidApiBaseUrl(_))
        ));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("API_BASE_URL", "http://localhost:3000"),
            ("API_TOKEN", "secret"),
            ("SYNC_INTERVAL_SECS", "60"),
            ("REQUEST_TIMEOUT_SECS", "15"),
            ("CONFLICT_STRATEGY", "merge"),
            ("RETRY_BASE_MS", "500"),
            ("RETRY_MAX_MS", "8000"),
        ])
        .unwrap();
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.conflict_strategy, Strategy::Merge);
        assert_eq!(config.backoff.max, Duration::from_millis(8_000));
    }

    #[test]
    fn invalid_values() {
        let base = ("API_BASE_URL", "http://localhost:3000");
        assert_eq!(
            load(&[base, ("SYNC_INTERVAL_SECS", "soon")]).unwrap_err(),
            ConfigError::Invalid("SYNC_INTERVAL_SECS")
        );
        assert_eq!(
            load(&[base, ("PROBE_INTERVAL_SECS", "0")]).unwrap_err(),
            ConfigError::Invalid("PROBE_INTERVAL_SECS")
        );
        assert!(matches!(
            load(&[base, ("CONFLICT_STRATEGY", "newest")]),
            Err(ConfigError::InvalidStrategy(_))
        ));
        assert_eq!(
            load(&[base, ("RETRY_BASE_MS", "10"), ("RETRY_MAX_MS", "5")]).unwrap_err(),
            ConfigError::Invalid("RETRY_BASE_MS")
        );
    }
}
