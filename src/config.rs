//! Engine and pool configuration.
//!
//! This module provides configuration for the analysis engine: per-pool
//! tuning (batch size, analysis budget, timeouts, scheduling interval) and
//! engine-wide settings (health checks, recovery behavior, dedup paging,
//! persistence chunking).

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Immutable per-pool tuning.
///
/// Two named instances exist by convention: the high-throughput/shallow
/// `volume` pool and the low-throughput/deep `deep` pool. They never share a
/// scheduling loop but do share the single evaluator resource.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name of the pool, used in events, logs and persisted records.
    pub name: String,
    /// Number of results one batch aims to produce.
    pub target_batch_size: usize,
    /// Search depth requested from the evaluator.
    pub depth: u32,
    /// Node budget requested from the evaluator.
    pub node_budget: u64,
    /// Hard per-job analysis budget.
    pub analysis_timeout: Duration,
    /// Hard budget for one whole batch invocation.
    pub batch_timeout: Duration,
    /// Throttle between consecutive jobs within a batch.
    pub delay_between_jobs: Duration,
    /// Interval between scheduled batch runs.
    pub poll_interval: Duration,
}

impl PoolConfig {
    /// The high-throughput, shallow-analysis pool.
    pub fn volume() -> Self {
        Self {
            name: "volume".to_string(),
            target_batch_size: 10,
            depth: 10,
            node_budget: 200_000,
            analysis_timeout: Duration::from_secs(15),
            batch_timeout: Duration::from_secs(300),
            delay_between_jobs: Duration::from_millis(500),
            poll_interval: Duration::from_secs(120),
        }
    }

    /// The low-throughput, deep-analysis pool.
    pub fn deep() -> Self {
        Self {
            name: "deep".to_string(),
            target_batch_size: 3,
            depth: 22,
            node_budget: 5_000_000,
            analysis_timeout: Duration::from_secs(120),
            batch_timeout: Duration::from_secs(900),
            delay_between_jobs: Duration::from_secs(1),
            poll_interval: Duration::from_secs(900),
        }
    }

    /// Sets the target batch size.
    pub fn with_target_batch_size(mut self, size: usize) -> Self {
        self.target_batch_size = size;
        self
    }

    /// Sets the evaluator search depth.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the evaluator node budget.
    pub fn with_node_budget(mut self, nodes: u64) -> Self {
        self.node_budget = nodes;
        self
    }

    /// Sets the per-job analysis timeout.
    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    /// Sets the whole-batch timeout.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Sets the inter-job delay.
    pub fn with_delay_between_jobs(mut self, delay: Duration) -> Self {
        self.delay_between_jobs = delay;
        self
    }

    /// Sets the scheduling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validates the pool configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pool name cannot be empty".to_string(),
            ));
        }
        if self.target_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "pool '{}': target_batch_size must be greater than 0",
                self.name
            )));
        }
        if self.depth == 0 && self.node_budget == 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "pool '{}': depth and node_budget cannot both be 0",
                self.name
            )));
        }
        if self.analysis_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(format!(
                "pool '{}': analysis_timeout must be greater than 0",
                self.name
            )));
        }
        if self.batch_timeout < self.analysis_timeout {
            return Err(ConfigError::ValidationFailed(format!(
                "pool '{}': batch_timeout must be at least analysis_timeout",
                self.name
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(format!(
                "pool '{}': poll_interval must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The high-throughput pool.
    pub volume: PoolConfig,
    /// The deep-analysis pool.
    pub deep: PoolConfig,

    // Health and recovery
    /// Interval between health checks.
    pub health_interval: Duration,
    /// Budget for a single health probe (oracle or store).
    pub health_probe_timeout: Duration,
    /// Consecutive batch failures on one pool that trigger recovery.
    pub max_consecutive_errors: u32,
    /// Backoff before recovery resets the evaluator, letting in-flight
    /// network operations drain.
    pub recovery_backoff: Duration,
    /// Grace period before loops resume after a recovery cycle.
    pub recovery_grace: Duration,
    /// Budget for warming up (or resetting) the evaluator.
    pub warmup_timeout: Duration,

    // Job selection
    /// Candidates are overfetched by this factor to compensate for jobs that
    /// fail content validation before analysis.
    pub overfetch_factor: usize,
    /// Minimum plies that must remain after truncation.
    pub min_cut_plies: usize,
    /// Seed for the cut-point RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,

    // Persistence
    /// Page size used when acquiring the known-id set.
    pub known_ids_page_size: usize,
    /// Detail records per write chunk.
    pub persist_chunk_size: usize,
    /// PostgreSQL connection URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: PoolConfig::volume(),
            deep: PoolConfig::deep(),
            health_interval: Duration::from_secs(60),
            health_probe_timeout: Duration::from_secs(5),
            max_consecutive_errors: 3,
            recovery_backoff: Duration::from_secs(10),
            recovery_grace: Duration::from_secs(2),
            warmup_timeout: Duration::from_secs(10),
            overfetch_factor: 3,
            min_cut_plies: 16,
            rng_seed: None,
            known_ids_page_size: 500,
            persist_chunk_size: 50,
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AUTOBENCH_VOLUME_BATCH_SIZE` / `AUTOBENCH_DEEP_BATCH_SIZE`
    /// - `AUTOBENCH_VOLUME_DEPTH` / `AUTOBENCH_DEEP_DEPTH`
    /// - `AUTOBENCH_VOLUME_INTERVAL_SECS` / `AUTOBENCH_DEEP_INTERVAL_SECS`
    /// - `AUTOBENCH_VOLUME_TIMEOUT_SECS` / `AUTOBENCH_DEEP_TIMEOUT_SECS`
    /// - `AUTOBENCH_HEALTH_INTERVAL_SECS`
    /// - `AUTOBENCH_MAX_CONSECUTIVE_ERRORS`
    /// - `AUTOBENCH_RECOVERY_BACKOFF_SECS`
    /// - `AUTOBENCH_OVERFETCH_FACTOR`
    /// - `AUTOBENCH_MIN_CUT_PLIES`
    /// - `AUTOBENCH_RNG_SEED`
    /// - `DATABASE_URL` (optional; in-memory store when absent)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("AUTOBENCH_VOLUME_BATCH_SIZE") {
            config.volume.target_batch_size = parse_env_value(&val, "AUTOBENCH_VOLUME_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_DEEP_BATCH_SIZE") {
            config.deep.target_batch_size = parse_env_value(&val, "AUTOBENCH_DEEP_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_VOLUME_DEPTH") {
            config.volume.depth = parse_env_value(&val, "AUTOBENCH_VOLUME_DEPTH")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_DEEP_DEPTH") {
            config.deep.depth = parse_env_value(&val, "AUTOBENCH_DEEP_DEPTH")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_VOLUME_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_VOLUME_INTERVAL_SECS")?;
            config.volume.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_DEEP_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_DEEP_INTERVAL_SECS")?;
            config.deep.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_VOLUME_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_VOLUME_TIMEOUT_SECS")?;
            config.volume.analysis_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_DEEP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_DEEP_TIMEOUT_SECS")?;
            config.deep.analysis_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_HEALTH_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_HEALTH_INTERVAL_SECS")?;
            config.health_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_MAX_CONSECUTIVE_ERRORS") {
            config.max_consecutive_errors =
                parse_env_value(&val, "AUTOBENCH_MAX_CONSECUTIVE_ERRORS")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_RECOVERY_BACKOFF_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTOBENCH_RECOVERY_BACKOFF_SECS")?;
            config.recovery_backoff = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("AUTOBENCH_OVERFETCH_FACTOR") {
            config.overfetch_factor = parse_env_value(&val, "AUTOBENCH_OVERFETCH_FACTOR")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_MIN_CUT_PLIES") {
            config.min_cut_plies = parse_env_value(&val, "AUTOBENCH_MIN_CUT_PLIES")?;
        }
        if let Ok(val) = std::env::var("AUTOBENCH_RNG_SEED") {
            config.rng_seed = Some(parse_env_value(&val, "AUTOBENCH_RNG_SEED")?);
        }
        if let Ok(val) = std::env::var("DATABASE_URL") {
            if !val.is_empty() {
                config.database_url = Some(val);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.volume.validate()?;
        self.deep.validate()?;

        if self.volume.name == self.deep.name {
            return Err(ConfigError::ValidationFailed(
                "pool names must be distinct".to_string(),
            ));
        }
        if self.health_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "health_interval must be greater than 0".to_string(),
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        if self.overfetch_factor == 0 {
            return Err(ConfigError::ValidationFailed(
                "overfetch_factor must be greater than 0".to_string(),
            ));
        }
        if self.min_cut_plies < 2 {
            return Err(ConfigError::ValidationFailed(
                "min_cut_plies must be at least 2".to_string(),
            ));
        }
        if self.known_ids_page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "known_ids_page_size must be greater than 0".to_string(),
            ));
        }
        if self.persist_chunk_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "persist_chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to replace the volume pool config.
    pub fn with_volume(mut self, pool: PoolConfig) -> Self {
        self.volume = pool;
        self
    }

    /// Builder method to replace the deep pool config.
    pub fn with_deep(mut self, pool: PoolConfig) -> Self {
        self.deep = pool;
        self
    }

    /// Builder method to set the health check interval.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Builder method to set the recovery error threshold.
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    /// Builder method to set the recovery backoff.
    pub fn with_recovery_backoff(mut self, backoff: Duration) -> Self {
        self.recovery_backoff = backoff;
        self
    }

    /// Builder method to set the recovery grace period.
    pub fn with_recovery_grace(mut self, grace: Duration) -> Self {
        self.recovery_grace = grace;
        self
    }

    /// Builder method to set the overfetch factor.
    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor;
        self
    }

    /// Builder method to set the RNG seed.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Returns the configured pools in scheduling order.
    pub fn pools(&self) -> [&PoolConfig; 2] {
        [&self.volume, &self.deep]
    }

    /// Looks up a pool config by name.
    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools().into_iter().find(|p| p.name == name)
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.volume.name, "volume");
        assert_eq!(config.deep.name, "deep");
        assert_eq!(config.volume.target_batch_size, 10);
        assert_eq!(config.deep.target_batch_size, 3);
        assert!(config.volume.depth < config.deep.depth);
        assert!(config.volume.poll_interval < config.deep.poll_interval);
        assert_eq!(config.max_consecutive_errors, 3);
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_builder() {
        let pool = PoolConfig::volume()
            .with_target_batch_size(25)
            .with_depth(14)
            .with_node_budget(1_000_000)
            .with_analysis_timeout(Duration::from_secs(30))
            .with_batch_timeout(Duration::from_secs(600))
            .with_delay_between_jobs(Duration::from_millis(100))
            .with_poll_interval(Duration::from_secs(60));

        assert_eq!(pool.target_batch_size, 25);
        assert_eq!(pool.depth, 14);
        assert_eq!(pool.node_budget, 1_000_000);
        assert_eq!(pool.analysis_timeout, Duration::from_secs(30));
        assert_eq!(pool.batch_timeout, Duration::from_secs(600));
        assert_eq!(pool.delay_between_jobs, Duration::from_millis(100));
        assert_eq!(pool.poll_interval, Duration::from_secs(60));
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_engine_builder() {
        let config = EngineConfig::new()
            .with_health_interval(Duration::from_secs(30))
            .with_max_consecutive_errors(5)
            .with_recovery_backoff(Duration::from_secs(20))
            .with_overfetch_factor(4)
            .with_rng_seed(42)
            .with_database_url("postgres://test/db");

        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(config.recovery_backoff, Duration::from_secs(20));
        assert_eq!(config.overfetch_factor, 4);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.database_url.as_deref(), Some("postgres://test/db"));
    }

    #[test]
    fn test_validation_zero_batch_size() {
        let config = EngineConfig::default().with_volume(PoolConfig::volume().with_target_batch_size(0));
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("target_batch_size"));
    }

    #[test]
    fn test_validation_zero_budgets() {
        let pool = PoolConfig::deep().with_depth(0).with_node_budget(0);
        let result = pool.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("node_budget"));
    }

    #[test]
    fn test_validation_batch_timeout_below_analysis_timeout() {
        let pool = PoolConfig::volume()
            .with_analysis_timeout(Duration::from_secs(60))
            .with_batch_timeout(Duration::from_secs(10));
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_pool_names() {
        let mut config = EngineConfig::default();
        config.deep.name = "volume".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("distinct"));
    }

    #[test]
    fn test_validation_zero_error_threshold() {
        let config = EngineConfig::default().with_max_consecutive_errors(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_min_cut_plies() {
        let mut config = EngineConfig::default();
        config.min_cut_plies = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_lookup() {
        let config = EngineConfig::default();
        assert!(config.pool("volume").is_some());
        assert!(config.pool("deep").is_some());
        assert!(config.pool("midnight").is_none());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));

        let err = ConfigError::ValidationFailed("test failure".to_string());
        assert!(err.to_string().contains("test failure"));
    }
}
