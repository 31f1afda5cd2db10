//! Kuba Graphite - query execution layer for Graphite-style metrics
//!
//! This library evaluates compiled Graphite expression trees against a
//! time-series store:
//! - Typed function registry with bind-time argument checking
//! - Retention-aware fetches that pick step size and aggregation per metric
//! - Consolidation of per-namespace raw iterators onto a fixed step grid
//! - Cooperative cancellation and per-fetch timeouts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Retention policy and consolidation approach resolution
pub mod retention;

/// Alignment of raw namespace iterators onto a step grid
pub mod consolidation;

/// Expression evaluation, function dispatch and storage contract
pub mod query;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use query::{execute_query, Expression, FunctionRegistry, QueryContext, QueryError};
pub use retention::{ConsolidationApproach, RetentionPolicy, RetentionResolver};
pub use types::{Bounds, Datapoint, Series, SeriesList};
