use crate::{ConfigError, FromEnv, env_parse, env_required};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Redis configuration for the queue broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub uri: String,
    /// Budget for establishing each queue's connection at start-up
    pub connect_timeout: Duration,
}

impl RedisConfig {
    pub fn new(uri: String) -> Self {
        Self {
            uri,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl FromEnv for RedisConfig {
    /// Requires REDIS_HOST to be set (no default)
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_parse("REDIS_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?;
        Ok(Self::new(env_required("REDIS_HOST")?).with_connect_timeout(Duration::from_millis(timeout_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_from_env_success() {
        temp_env::with_vars(
            [
                ("REDIS_HOST", Some("redis://localhost:6379")),
                ("REDIS_CONNECT_TIMEOUT_MS", None),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.uri, "redis://localhost:6379");
                assert_eq!(config.connect_timeout, Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn test_redis_config_custom_timeout() {
        temp_env::with_vars(
            [
                ("REDIS_HOST", Some("redis://queue:6379")),
                ("REDIS_CONNECT_TIMEOUT_MS", Some("500")),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.connect_timeout, Duration::from_millis(500));
            },
        );
    }

    #[test]
    fn test_redis_config_from_env_missing() {
        temp_env::with_var_unset("REDIS_HOST", || {
            let config = RedisConfig::from_env();
            assert!(config.is_err());
            let err = config.unwrap_err();
            assert!(err.to_string().contains("REDIS_HOST"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_redis_config_bad_timeout() {
        temp_env::with_vars(
            [
                ("REDIS_HOST", Some("redis://queue:6379")),
                ("REDIS_CONNECT_TIMEOUT_MS", Some("soon")),
            ],
            || {
                let err = RedisConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("REDIS_CONNECT_TIMEOUT_MS"));
            },
        );
    }
}
