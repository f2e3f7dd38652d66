//! Configuration structures.
//!
//! Configuration is loaded from JSON (string or file) and validated before
//! use. Durations are human-readable strings (`"30s"`, `"24h"`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::credentials::CredentialConfig;
use crate::dispatch::DispatcherConfig;
use crate::kernel::circuit_breaker::CircuitBreakerConfig;
use crate::kernel::cleanup::MaintenanceConfig;
use crate::kernel::rate_limiter::SlidingWindowConfig;
use crate::kernel::token_bucket::TokenBucketConfig;
use crate::types::Result;
use crate::validation::{validate_non_zero, validate_one_of, validate_positive, validate_rate};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Global kernel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Observability configuration.
    pub observability: ObservabilityConfig,

    /// Message dispatch.
    pub dispatcher: DispatcherConfig,

    /// Defaults for circuit breakers handed out by the kernel.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Sliding-window request limiter.
    pub rate_limiter: SlidingWindowConfig,

    /// Token bucket limiter.
    pub token_bucket: TokenBucketConfig,

    /// Signing secrets and session credentials.
    pub credentials: CredentialConfig,

    /// Background sweep.
    pub maintenance: MaintenanceConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Parse and validate a JSON document. Missing sections take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("config_loaded: path={}", path.as_ref().display());
        Self::from_json_str(&contents)
    }

    /// Reject values the kernel cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_one_of(
            &self.observability.log_level,
            LOG_LEVELS,
            "observability.log_level",
        )?;

        let breaker = &self.circuit_breaker;
        validate_positive(
            u64::from(breaker.failure_threshold),
            "circuit_breaker.failure_threshold",
        )?;
        validate_non_zero(breaker.timeout, "circuit_breaker.timeout")?;
        validate_non_zero(breaker.reset_timeout, "circuit_breaker.reset_timeout")?;

        let window = &self.rate_limiter;
        validate_non_zero(window.window, "rate_limiter.window")?;
        validate_positive(u64::from(window.max_requests), "rate_limiter.max_requests")?;
        validate_positive(window.max_keys as u64, "rate_limiter.max_keys")?;

        let bucket = &self.token_bucket;
        validate_positive(u64::from(bucket.capacity), "token_bucket.capacity")?;
        validate_rate(bucket.refill_rate, "token_bucket.refill_rate")?;
        validate_positive(bucket.max_keys as u64, "token_bucket.max_keys")?;

        self.credentials.validate()?;

        validate_non_zero(self.maintenance.interval, "maintenance.interval")?;
        Ok(())
    }

    /// JSON Schema describing this configuration.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SigningAlgorithm;
    use crate::envelope::MessageCategory;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.rate_limiter.max_requests, 100);
        assert_eq!(config.token_bucket.capacity, 10);
        assert_eq!(
            config.credentials.rotation_interval,
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(config.dispatcher.history_capacity, 1000);
        assert_eq!(config.maintenance.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = Config::from_json_str(
            r#"{
                "circuit_breaker": {"failure_threshold": 3, "reset_timeout": "5s"},
                "credentials": {"rotation_interval": "1h", "secret_lifetime": "2h", "algorithm": "HS512"},
                "dispatcher": {"default_category": "notification"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(5));
        assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(10));
        assert_eq!(config.credentials.algorithm, SigningAlgorithm::Hs512);
        assert_eq!(
            config.dispatcher.default_category,
            MessageCategory::Notification
        );
        assert!(config.dispatcher.validate_payloads);
    }

    #[test]
    fn test_secret_lifetime_shorter_than_rotation_is_rejected() {
        let err = Config::from_json_str(
            r#"{"credentials": {"rotation_interval": "2h", "secret_lifetime": "1h"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("secret_lifetime"));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for json in [
            r#"{"circuit_breaker": {"failure_threshold": 0}}"#,
            r#"{"rate_limiter": {"window": "0s"}}"#,
            r#"{"token_bucket": {"refill_rate": 0.0}}"#,
            r#"{"maintenance": {"interval": "0s"}}"#,
            r#"{"observability": {"log_level": "chatty"}}"#,
        ] {
            let err = Config::from_json_str(json).unwrap_err();
            assert_eq!(err.code(), "INVALID_CONFIG", "{}", json);
        }
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        let err = Config::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"token_bucket": {{"capacity": 42}}}}"#).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.token_bucket.capacity, 42);

        let missing = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert_eq!(missing.code(), "IO");
    }

    #[test]
    fn test_json_schema_lists_sections() {
        let schema = serde_json::to_value(Config::json_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for section in [
            "observability",
            "dispatcher",
            "circuit_breaker",
            "rate_limiter",
            "token_bucket",
            "credentials",
            "maintenance",
        ] {
            assert!(properties.contains_key(section), "{}", section);
        }
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = Config::from_json_str(&json).unwrap();
        assert_eq!(back.rate_limiter.window, config.rate_limiter.window);
        assert_eq!(back.credentials.secret_lifetime, config.credentials.secret_lifetime);
    }
}
