//! Retention policy resolution
//!
//! Decides how a metric is downsampled for a query of a given age. Rules are
//! an ordered, most-specific-first list of identifier patterns, each holding
//! policies ordered by increasing TTL. The table is supplied through
//! [`RetentionConfig`](crate::config::RetentionConfig) rather than compiled
//! in.
//!
//! # Resolution
//!
//! 1. Identifiers with the reserved system prefix get the system policy
//!    without touching any regex.
//! 2. Otherwise every rule whose pattern matches is tried in order; the first
//!    policy whose TTL exceeds the query age wins.
//! 3. The default policy is the terminal fallback, so resolution never fails.
//!
//! [`RetentionResolver::find_consolidation_approach`] answers only the
//! aggregation question using the shape classifier in [`classify`].

pub mod classify;

pub use classify::{classify, MetricClass};

use crate::config::{RetentionConfig, RetentionPolicyConfig};
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How raw samples are combined when several fall into one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationApproach {
    /// Arithmetic mean
    Avg,
    /// Sum of samples
    Sum,
    /// Smallest sample
    Min,
    /// Largest sample
    Max,
    /// Most recent sample
    Last,
}

impl ConsolidationApproach {
    /// Combine `values`, ignoring NaN. Returns NaN when nothing is left.
    pub fn consolidate(self, values: &[f64]) -> f64 {
        let mut present = values.iter().copied().filter(|v| !v.is_nan()).peekable();
        if present.peek().is_none() {
            return f64::NAN;
        }
        match self {
            ConsolidationApproach::Avg => {
                let (sum, count) = present.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            ConsolidationApproach::Sum => present.sum(),
            ConsolidationApproach::Min => present.fold(f64::INFINITY, f64::min),
            ConsolidationApproach::Max => present.fold(f64::NEG_INFINITY, f64::max),
            ConsolidationApproach::Last => present.last().unwrap_or(f64::NAN),
        }
    }
}

impl fmt::Display for ConsolidationApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsolidationApproach::Avg => "avg",
            ConsolidationApproach::Sum => "sum",
            ConsolidationApproach::Min => "min",
            ConsolidationApproach::Max => "max",
            ConsolidationApproach::Last => "last",
        };
        f.write_str(name)
    }
}

impl FromStr for ConsolidationApproach {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "avg" | "average" => Ok(ConsolidationApproach::Avg),
            "sum" | "total" => Ok(ConsolidationApproach::Sum),
            "min" => Ok(ConsolidationApproach::Min),
            "max" => Ok(ConsolidationApproach::Max),
            "last" => Ok(ConsolidationApproach::Last),
            other => Err(format!("unknown consolidation function '{}'", other)),
        }
    }
}

/// Retention and resolution of a class of metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// How long data is kept at this resolution
    pub ttl: Duration,
    /// Step width at this resolution
    pub unit_per_step: Duration,
    /// Aggregation used when downsampling
    pub consolidation: ConsolidationApproach,
    /// Whether query bounds are truncated to step multiples
    pub round_to_unit: bool,
}

impl From<&RetentionPolicyConfig> for RetentionPolicy {
    fn from(config: &RetentionPolicyConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            unit_per_step: Duration::from_secs(config.unit_per_step_secs),
            consolidation: config.consolidation,
            round_to_unit: config.round_to_unit,
        }
    }
}

/// Pattern plus its policies, ordered by increasing TTL
#[derive(Debug, Clone)]
pub struct RetentionRule {
    pattern: Regex,
    policies: Vec<RetentionPolicy>,
}

impl RetentionRule {
    /// Create a rule
    pub fn new(pattern: Regex, policies: Vec<RetentionPolicy>) -> Self {
        Self { pattern, policies }
    }

    /// Identifier pattern
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Policies, shortest TTL first
    pub fn policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }
}

/// Resolves the retention policy and consolidation approach of a metric
///
/// Immutable after construction; share it behind an `Arc` across queries.
#[derive(Debug, Clone)]
pub struct RetentionResolver {
    rules: Vec<RetentionRule>,
    default_policy: RetentionPolicy,
    system_prefix: String,
    system_policy: RetentionPolicy,
}

impl RetentionResolver {
    /// Create a resolver with no system fast path
    pub fn new(rules: Vec<RetentionRule>, default_policy: RetentionPolicy) -> Self {
        Self {
            rules,
            default_policy,
            system_prefix: String::new(),
            system_policy: default_policy,
        }
    }

    /// Route identifiers starting with `prefix` straight to `policy`
    pub fn with_system_policy(mut self, prefix: impl Into<String>, policy: RetentionPolicy) -> Self {
        self.system_prefix = prefix.into();
        self.system_policy = policy;
        self
    }

    /// Build a resolver from configuration, compiling every rule pattern
    ///
    /// `.` in a pattern also matches `\n`, the same way the shape classifier
    /// only treats `.` as a separator.
    pub fn from_config(config: &RetentionConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let pattern = RegexBuilder::new(&rule.pattern)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|e| {
                        Error::Configuration(format!(
                            "invalid retention pattern '{}': {}",
                            rule.pattern, e
                        ))
                    })?;
                let policies = rule.policies.iter().map(RetentionPolicy::from).collect();
                Ok(RetentionRule::new(pattern, policies))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(rules, RetentionPolicy::from(&config.default_policy))
            .with_system_policy(
                config.system_prefix.clone(),
                RetentionPolicy::from(&config.system_policy),
            ))
    }

    /// Configured rules in match order
    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    /// Terminal fallback policy
    pub fn default_policy(&self) -> &RetentionPolicy {
        &self.default_policy
    }

    /// Policy for `id` when queried `age` into the past. Never fails.
    pub fn find_retention_policy(&self, id: &str, age: Duration) -> &RetentionPolicy {
        if classify::is_system(id, &self.system_prefix) {
            return &self.system_policy;
        }

        for rule in self.rules.iter().filter(|r| r.pattern.is_match(id)) {
            if let Some(policy) = rule.policies.iter().find(|p| age < p.ttl) {
                return policy;
            }
            debug!(
                id,
                pattern = rule.pattern.as_str(),
                age_secs = age.as_secs(),
                "Query age exceeds every policy of matching rule"
            );
        }

        &self.default_policy
    }

    /// Aggregation approach for `id`, without regex matching. Never fails.
    pub fn find_consolidation_approach(&self, id: &str) -> ConsolidationApproach {
        classify(id, &self.system_prefix).consolidation()
    }
}

impl Default for RetentionResolver {
    fn default() -> Self {
        // The default table is validated by `RetentionConfig` tests
        Self::from_config(&RetentionConfig::default()).unwrap_or_else(|_| {
            let fallback = RetentionPolicy::from(&RetentionConfig::default().default_policy);
            Self::new(Vec::new(), fallback)
        })
    }
}

/// Age of a query starting at `start_ms`, observed at `now_ms`
pub fn query_age(now_ms: i64, start_ms: i64) -> Duration {
    Duration::from_millis(now_ms.saturating_sub(start_ms).max(0) as u64)
}
