//! Federation configuration with sensible defaults.
//!
//! [`FederationConfig`] controls cache lifetimes, per-source rate budgets,
//! the circuit breaker, and fan-out concurrency. It deserializes from TOML:
//!
//! ```toml
//! max_concurrent_sources = 8
//!
//! [cache]
//! search_ttl_secs = 300
//! skill_ttl_secs = 900
//!
//! [rate_limits.github]
//! requests_per_minute = 30
//! burst_size = 5
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! cooldown_secs = 60
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};
use crate::health::CircuitBreakerConfig;
use crate::rate_limit::RateLimit;
use crate::types::SourceType;

/// Top-level federation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Cache lifetimes and sizing.
    pub cache: CacheConfig,
    /// Rate policy per source. Sources without an entry are unlimited.
    pub rate_limits: HashMap<SourceType, RateLimit>,
    /// Per-source circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Maximum fan-out units running at once across all searches.
    pub max_concurrent_sources: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limits: HashMap::from([
                (SourceType::GITHUB, RateLimit::new(30, 5)),
                (SourceType::GITLAB, RateLimit::new(60, 0)),
            ]),
            circuit_breaker: CircuitBreakerConfig::default(),
            max_concurrent_sources: 8,
        }
    }
}

/// Cache settings shared by the search and skill caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached search page, in seconds.
    pub search_ttl_secs: u64,
    /// Lifetime of a cached skill, in seconds.
    pub skill_ttl_secs: u64,
    /// Interval between background sweeps of expired entries, in seconds.
    pub sweep_interval_secs: u64,
    /// Upper bound on entries per cache.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: 300,
            skill_ttl_secs: 900,
            sweep_interval_secs: 60,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    /// Search cache TTL.
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    /// Skill cache TTL.
    pub fn skill_ttl(&self) -> Duration {
        Duration::from_secs(self.skill_ttl_secs)
    }

    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl FederationConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| FederationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Io`] if the file cannot be read, or
    /// [`FederationError::Config`] if it is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - cache TTLs, sweep interval, and `max_entries` must be greater than 0
    /// - `max_concurrent_sources` must be greater than 0
    /// - a rate limit with `requests_per_minute = 0` must not set `burst_size`
    pub fn validate(&self) -> Result<()> {
        if self.cache.search_ttl_secs == 0 || self.cache.skill_ttl_secs == 0 {
            return Err(FederationError::Config(
                "cache ttl must be greater than 0".into(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(FederationError::Config(
                "cache sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(FederationError::Config(
                "cache max_entries must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_sources == 0 {
            return Err(FederationError::Config(
                "max_concurrent_sources must be greater than 0".into(),
            ));
        }
        for (source, limit) in &self.rate_limits {
            if limit.is_unlimited() && limit.burst_size > 0 {
                return Err(FederationError::Config(format!(
                    "rate limit for {source} sets burst_size without requests_per_minute"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = FederationConfig::default();
        assert_eq!(config.cache.search_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.skill_ttl(), Duration::from_secs(900));
        assert_eq!(config.max_concurrent_sources, 8);
        assert_eq!(
            config.rate_limits.get(&SourceType::GITHUB),
            Some(&RateLimit::new(30, 5))
        );
        assert!(!config.rate_limits.contains_key(&SourceType::LOCAL));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_toml_with_partial_overrides() {
        let raw = r#"
            max_concurrent_sources = 2

            [cache]
            search_ttl_secs = 30

            [rate_limits.codeberg]
            requests_per_minute = 120
        "#;
        let config = FederationConfig::from_toml_str(raw).expect("valid toml");
        assert_eq!(config.max_concurrent_sources, 2);
        assert_eq!(config.cache.search_ttl_secs, 30);
        assert_eq!(config.cache.skill_ttl_secs, 900);
        let codeberg = config.rate_limits[&SourceType::new("codeberg")];
        assert_eq!(codeberg.requests_per_minute, 120);
        assert_eq!(codeberg.effective_burst(), 20);
        // An explicit table replaces the default map.
        assert!(!config.rate_limits.contains_key(&SourceType::GITHUB));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = FederationConfig::from_toml_str("cache = 5").unwrap_err();
        assert!(matches!(err, FederationError::Config(_)));
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = FederationConfig::default();
        config.cache.search_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = FederationConfig {
            max_concurrent_sources: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_sources"));
    }

    #[test]
    fn burst_without_rate_rejected() {
        let mut config = FederationConfig::default();
        config
            .rate_limits
            .insert(SourceType::GITLAB, RateLimit::new(0, 4));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gitlab"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("federation.toml");
        std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 0\n").expect("write");
        let config = FederationConfig::load(&path).expect("load");
        assert_eq!(config.circuit_breaker.failure_threshold, 0);
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = FederationConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, FederationError::Io(_)));
    }
}
