//! Engine configuration from `SONANCE_*` environment variables.
//!
//! | Variable                       | Default                  |
//! |--------------------------------|--------------------------|
//! | `SONANCE_API_URL`              | `http://127.0.0.1:5005`  |
//! | `SONANCE_POLL_INTERVAL_MS`     | `2000`                   |
//! | `SONANCE_REQUEST_TIMEOUT_MS`   | `5000`                   |
//! | `SONANCE_PENDING_TIMEOUT_SECS` | `0` (pending moves never expire) |

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5005";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a whole number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the device-control service.
    pub api_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Roll back moves not confirmed within this long. `None` = keep forever.
    pub pending_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            pending_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                    var,
                    value: raw.clone(),
                }),
            }
        };

        let poll_ms = number("SONANCE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_ms == 0 {
            return Err(ConfigError::Zero("SONANCE_POLL_INTERVAL_MS"));
        }
        let timeout_ms = number("SONANCE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Zero("SONANCE_REQUEST_TIMEOUT_MS"));
        }
        let pending_secs = number("SONANCE_PENDING_TIMEOUT_SECS", 0)?;

        Ok(Self {
            api_url: lookup("SONANCE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            poll_interval: Duration::from_millis(poll_ms),
            request_timeout: Duration::from_millis(timeout_ms),
            pending_timeout: (pending_secs > 0).then(|| Duration::from_secs(pending_secs)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.pending_timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SONANCE_API_URL", "http://10.0.0.5:5005"),
            ("SONANCE_POLL_INTERVAL_MS", "750"),
            ("SONANCE_PENDING_TIMEOUT_SECS", " 45 "),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://10.0.0.5:5005");
        assert_eq!(config.poll_interval, Duration::from_millis(750));
        assert_eq!(config.pending_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_invalid_numbers() {
        assert_eq!(
            EngineConfig::from_lookup(lookup(&[("SONANCE_POLL_INTERVAL_MS", "fast")])),
            Err(ConfigError::InvalidNumber {
                var: "SONANCE_POLL_INTERVAL_MS",
                value: "fast".into()
            })
        );
        assert_eq!(
            EngineConfig::from_lookup(lookup(&[("SONANCE_POLL_INTERVAL_MS", "0")])),
            Err(ConfigError::Zero("SONANCE_POLL_INTERVAL_MS"))
        );
    }
}
