//! Configuration management for the Graphite query layer
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults. The retention rule
//! table lives here so it can be swapped per deployment.

use crate::error::{Error, Result, ValidationError};
use crate::retention::ConsolidationApproach;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query execution settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retention rule table
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Timeout applied to every storage fetch, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Only fetch from the local node
    #[serde(default)]
    pub local_only: bool,

    /// Allow storage to answer from its cache
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Allow storage to read from the durable tier
    #[serde(default = "default_true")]
    pub use_durable_tier: bool,

    /// Queries slower than this are logged at warn, in milliseconds
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
}

/// Retention policy as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionPolicyConfig {
    /// Retention in seconds
    pub ttl_secs: u64,

    /// Step width in seconds
    pub unit_per_step_secs: u64,

    /// Aggregation used when downsampling
    #[serde(default = "default_consolidation")]
    pub consolidation: ConsolidationApproach,

    /// Truncate query bounds to step multiples
    #[serde(default)]
    pub round_to_unit: bool,
}

/// Identifier pattern and its policies
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionRuleConfig {
    /// Regular expression matched against metric identifiers
    pub pattern: String,

    /// Policies ordered by strictly increasing TTL
    pub policies: Vec<RetentionPolicyConfig>,
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Identifiers starting with this prefix use `system_policy` directly
    #[serde(default = "default_system_prefix")]
    pub system_prefix: String,

    /// Policy for system metrics
    #[serde(default = "default_server_policy")]
    pub system_policy: RetentionPolicyConfig,

    /// Fallback when no rule matches
    #[serde(default = "default_server_policy")]
    pub default_policy: RetentionPolicyConfig,

    /// Rules, most specific first
    #[serde(default = "default_rules")]
    pub rules: Vec<RetentionRuleConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace) or an `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_timeout_ms() -> u64 { 30_000 }
fn default_slow_query_ms() -> u64 { 1_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_system_prefix() -> String { "m3+".to_string() }
fn default_consolidation() -> ConsolidationApproach { ConsolidationApproach::Avg }
fn default_true() -> bool { true }

const DAY_SECS: u64 = 24 * 3600;

fn policy(days: u64, step_secs: u64, consolidation: ConsolidationApproach) -> RetentionPolicyConfig {
    RetentionPolicyConfig {
        ttl_secs: days * DAY_SECS,
        unit_per_step_secs: step_secs,
        consolidation,
        round_to_unit: false,
    }
}

fn default_server_policy() -> RetentionPolicyConfig {
    RetentionPolicyConfig {
        ttl_secs: 129_600,
        unit_per_step_secs: 60,
        consolidation: ConsolidationApproach::Avg,
        round_to_unit: true,
    }
}

fn default_rules() -> Vec<RetentionRuleConfig> {
    use ConsolidationApproach::{Avg, Sum};

    let rule = |pattern: &str, policies: Vec<RetentionPolicyConfig>| RetentionRuleConfig {
        pattern: pattern.to_string(),
        policies,
    };

    // Keep in sync with retention::classify
    vec![
        rule(
            r"^stats(\.[^\.]+)?\.counts\..*",
            vec![policy(2, 10, Sum), policy(90, 60, Sum), policy(365, 600, Sum)],
        ),
        rule(
            r"^stats(\.[^\.]+)?\.timers\..*\.count$",
            vec![policy(2, 10, Sum), policy(90, 60, Sum)],
        ),
        rule(
            r"^stats\..*",
            vec![policy(2, 10, Avg), policy(90, 60, Avg), policy(365, 600, Avg)],
        ),
        rule(
            r"^statsdex(\.[^\.]+)?\..*",
            vec![policy(2, 10, Avg), policy(90, 60, Avg), policy(365, 600, Avg)],
        ),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            local_only: false,
            use_cache: true,
            use_durable_tier: true,
            slow_query_ms: default_slow_query_ms(),
        }
    }
}

impl EngineConfig {
    /// Fetch timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Slow-query threshold as a duration
    pub fn slow_query(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            system_prefix: default_system_prefix(),
            system_policy: default_server_policy(),
            default_policy: default_server_policy(),
            rules: default_rules(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file {}: {}", path, e)))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("KUBA_QUERY_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.engine.timeout_ms = t;
            }
        }
        if let Ok(local_only) = std::env::var("KUBA_QUERY_LOCAL_ONLY") {
            if let Ok(l) = local_only.parse() {
                self.engine.local_only = l;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "engine.timeout_ms".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: u64::MAX.to_string(),
            }
            .into());
        }

        self.retention.validate()
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl RetentionConfig {
    /// Validate policies and patterns
    pub fn validate(&self) -> Result<()> {
        validate_policy("retention.default_policy", &self.default_policy)?;
        validate_policy("retention.system_policy", &self.system_policy)?;

        // System identifiers never reach the rule table, so the classifier
        // reports Avg for them
        if self.system_policy.consolidation != ConsolidationApproach::Avg {
            return Err(ValidationError::Failed(
                "retention.system_policy must consolidate with avg".to_string(),
            )
            .into());
        }

        for (i, rule) in self.rules.iter().enumerate() {
            let field = format!("retention.rules[{}]", i);
            Regex::new(&rule.pattern).map_err(|e| ValidationError::InvalidFormat {
                field: format!("{}.pattern", field),
                message: e.to_string(),
            })?;

            if rule.policies.is_empty() {
                return Err(ValidationError::MissingField(format!("{}.policies", field)).into());
            }
            for (j, p) in rule.policies.iter().enumerate() {
                validate_policy(&format!("{}.policies[{}]", field, j), p)?;
            }
            if rule.policies.windows(2).any(|w| w[0].ttl_secs >= w[1].ttl_secs) {
                return Err(ValidationError::Failed(format!(
                    "{}.policies must have strictly increasing ttl_secs",
                    field
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn validate_policy(field: &str, policy: &RetentionPolicyConfig) -> Result<()> {
    if policy.ttl_secs == 0 {
        return Err(ValidationError::MissingField(format!("{}.ttl_secs", field)).into());
    }
    if policy.unit_per_step_secs == 0 {
        return Err(ValidationError::MissingField(format!("{}.unit_per_step_secs", field)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.timeout_ms, 30_000);
        assert!(config.engine.use_cache);
        assert_eq!(config.retention.rules.len(), 4);
        assert_eq!(config.retention.default_policy.ttl_secs, 129_600);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.engine.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_policies_rejected() {
        let mut config = Config::default();
        config.retention.rules[0].policies.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut config = Config::default();
        config.retention.rules[0].pattern = "(".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            timeout_ms = 500

            [[retention.rules]]
            pattern = "^servers\\."
            policies = [{ ttl_secs = 3600, unit_per_step_secs = 10 }]
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.timeout_ms, 500);
        assert!(config.engine.use_durable_tier);
        assert_eq!(config.retention.rules.len(), 1);
        assert_eq!(
            config.retention.rules[0].policies[0].consolidation,
            ConsolidationApproach::Avg
        );
        assert_eq!(config.retention.system_prefix, "m3+");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.logging.json = true;
        config.save_to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert!(loaded.logging.json);
        assert_eq!(loaded.retention.rules, config.retention.rules);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("KUBA_QUERY_TIMEOUT_MS", "1234");
        let config = Config::from_env();
        assert_eq!(config.engine.timeout_ms, 1234);
        std::env::remove_var("KUBA_QUERY_TIMEOUT_MS");
    }
}
