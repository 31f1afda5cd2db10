//! Storage collaborator contract and the consolidating adapter
//!
//! Fetch expressions talk to storage only through [`SeriesStorage`].
//! [`ConsolidatingStorage`] implements it on top of a [`BlockSource`] that
//! yields raw per-namespace iterators: it resolves each series' retention
//! policy, builds the matching step grid and consolidates the namespaces
//! onto it.
//!
//! ```text
//! fetch(path) ──► SeriesStorage::fetch_by_query
//!                     │
//!                     ├─► BlockSource::resolve(path)        ids
//!                     ├─► RetentionResolver::find_retention_policy(id, age)
//!                     ├─► BlockSource::fetch_block(id, bounds)
//!                     └─► NamespaceBlock::into_series()     aligned values
//! ```

use super::context::FetchOptions;
use super::error::{QueryError, QueryResult};
use crate::consolidation::{NamespaceBlock, RawSeriesIterator, VecSeriesIterator};
use crate::retention::{query_age, RetentionResolver};
use crate::types::{Bounds, Datapoint, SeriesList};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Parameters of one storage fetch
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Graphite path pattern, e.g. `servers.*.cpu.{user,system}`
    pub path: &'a str,
    /// Window start, Unix milliseconds
    pub start: i64,
    /// Window end, Unix milliseconds
    pub end: i64,
    /// Wall-clock reference of the query
    pub now: i64,
    /// Forwarded fetch options
    pub options: FetchOptions,
}

/// Storage collaborator used by fetch expressions
///
/// Implementations must be safe for concurrent use, must preserve their
/// result ordering and must not mutate the request.
#[async_trait]
pub trait SeriesStorage: Send + Sync + 'static {
    /// Fetch every series matching `request.path` over the request window
    async fn fetch_by_query(&self, request: &FetchRequest<'_>) -> QueryResult<SeriesList>;
}

/// Source of raw per-namespace series data
#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    /// Identifiers matching `matcher`, in a stable order
    async fn resolve(&self, matcher: &PathMatcher, options: &FetchOptions)
        -> QueryResult<Vec<String>>;

    /// Raw iterators for `id` covering `bounds`, one per namespace
    async fn fetch_block(
        &self,
        id: &str,
        bounds: Bounds,
        options: &FetchOptions,
    ) -> QueryResult<NamespaceBlock>;
}

/// [`SeriesStorage`] that consolidates raw namespace blocks
pub struct ConsolidatingStorage<B> {
    source: B,
    resolver: Arc<RetentionResolver>,
}

impl<B: BlockSource> ConsolidatingStorage<B> {
    /// Create with the default retention table
    pub fn new(source: B) -> Self {
        Self::with_resolver(source, Arc::new(RetentionResolver::default()))
    }

    /// Create with an explicit resolver
    pub fn with_resolver(source: B, resolver: Arc<RetentionResolver>) -> Self {
        Self { source, resolver }
    }

    /// Underlying block source
    pub fn source(&self) -> &B {
        &self.source
    }
}

#[async_trait]
impl<B: BlockSource> SeriesStorage for ConsolidatingStorage<B> {
    async fn fetch_by_query(&self, request: &FetchRequest<'_>) -> QueryResult<SeriesList> {
        let matcher = PathMatcher::new(request.path)?;
        let ids = self.source.resolve(&matcher, &request.options).await?;
        let age = query_age(request.now, request.start);

        let mut values = Vec::with_capacity(ids.len());
        for id in ids {
            let policy = self.resolver.find_retention_policy(&id, age);
            let bounds = Bounds::aligned(
                request.start,
                request.end,
                policy.unit_per_step,
                policy.round_to_unit,
            )?;
            let block = self
                .source
                .fetch_block(&id, bounds, &request.options)
                .await?;
            debug!(
                id = %id,
                namespace = %block.namespace,
                step_secs = policy.unit_per_step.as_secs(),
                iterators = block.iterator_count(),
                "Consolidating block"
            );
            values.push(block.into_series());
        }

        Ok(SeriesList::from(values))
    }
}

/// Compiled Graphite path glob
///
/// Supports `*`, `?`, `{a,b}` alternation and `[...]` character classes.
/// Wildcards never match across a `.` separator.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
}

impl PathMatcher {
    /// Compile `pattern`
    pub fn new(pattern: &str) -> QueryResult<Self> {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');

        let mut in_alternation = false;
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push_str("[^.]*"),
                '?' => out.push_str("[^.]"),
                '{' if !in_alternation => {
                    in_alternation = true;
                    out.push_str("(?:");
                }
                '}' if in_alternation => {
                    in_alternation = false;
                    out.push(')');
                }
                ',' if in_alternation => out.push('|'),
                '{' | '}' => {
                    return Err(QueryError::validation(format!(
                        "unbalanced braces in path '{}'",
                        pattern
                    )))
                }
                '[' => {
                    out.push('[');
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        if c == '\\' || c == '[' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    if !closed {
                        return Err(QueryError::validation(format!(
                            "unterminated character class in path '{}'",
                            pattern
                        )));
                    }
                    out.push(']');
                }
                other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        if in_alternation {
            return Err(QueryError::validation(format!(
                "unbalanced braces in path '{}'",
                pattern
            )));
        }
        out.push('$');

        let regex = Regex::new(&out).map_err(|e| {
            QueryError::validation(format!("invalid path '{}'", pattern)).with_source(e)
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether `id` matches the glob
    pub fn is_match(&self, id: &str) -> bool {
        self.regex.is_match(id)
    }

    /// Original glob
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// In-memory [`BlockSource`] with ordered namespaces
///
/// Namespaces are consulted in insertion order, so register the one holding
/// the oldest data first.
#[derive(Debug, Default)]
pub struct MemoryBlockSource {
    namespaces: RwLock<Vec<(String, std::collections::BTreeMap<String, Vec<Datapoint>>)>>,
}

impl MemoryBlockSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Append datapoints for `id` in `namespace`, creating the namespace on
    /// first use
    pub fn insert(&self, namespace: &str, id: &str, points: impl IntoIterator<Item = Datapoint>) {
        let mut namespaces = self.namespaces.write();
        let index = match namespaces.iter().position(|(name, _)| name == namespace) {
            Some(index) => index,
            None => {
                namespaces.push((namespace.to_string(), Default::default()));
                namespaces.len() - 1
            }
        };
        let series = namespaces[index].1.entry(id.to_string()).or_default();
        series.extend(points);
        series.sort_by_key(|dp| dp.timestamp);
    }

    /// Registered namespace names in consultation order
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn resolve(
        &self,
        matcher: &PathMatcher,
        _options: &FetchOptions,
    ) -> QueryResult<Vec<String>> {
        let namespaces = self.namespaces.read();
        let ids: BTreeSet<&String> = namespaces
            .iter()
            .flat_map(|(_, series)| series.keys())
            .filter(|id| matcher.is_match(id))
            .collect();
        Ok(ids.into_iter().cloned().collect())
    }

    async fn fetch_block(
        &self,
        id: &str,
        bounds: Bounds,
        _options: &FetchOptions,
    ) -> QueryResult<NamespaceBlock> {
        let namespaces = self.namespaces.read();
        let window_end = bounds.end.saturating_add(bounds.step_ms());

        let mut names = Vec::new();
        let mut iterators: Vec<Box<dyn RawSeriesIterator>> = Vec::new();
        for (name, series) in namespaces.iter() {
            let Some(points) = series.get(id) else {
                continue;
            };
            let points: Vec<Datapoint> = points
                .iter()
                .filter(|dp| dp.timestamp >= bounds.start && dp.timestamp < window_end)
                .copied()
                .collect();
            names.push(name.as_str());
            iterators.push(Box::new(VecSeriesIterator::new(points)));
        }

        Ok(NamespaceBlock::new(id, names.join("+"), bounds, iterators))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_path_matcher_wildcards() {
        let matcher = PathMatcher::new("servers.*.cpu").unwrap();
        assert!(matcher.is_match("servers.web01.cpu"));
        assert!(!matcher.is_match("servers.web01.eu.cpu"));
        assert!(!matcher.is_match("servers.web01.cpu.user"));

        let matcher = PathMatcher::new("servers.web0?.{cpu,mem}").unwrap();
        assert!(matcher.is_match("servers.web01.cpu"));
        assert!(matcher.is_match("servers.web02.mem"));
        assert!(!matcher.is_match("servers.web10.cpu"));

        let matcher = PathMatcher::new("servers.web[12].cpu").unwrap();
        assert!(matcher.is_match("servers.web1.cpu"));
        assert!(!matcher.is_match("servers.web3.cpu"));
    }

    #[test]
    fn test_path_matcher_escapes_literals() {
        let matcher = PathMatcher::new("a+b.c").unwrap();
        assert!(matcher.is_match("a+b.c"));
        assert!(!matcher.is_match("aab.c"));
        assert!(!matcher.is_match("a+bxc"));
    }

    #[test]
    fn test_path_matcher_rejects_malformed() {
        assert!(PathMatcher::new("a.{b,c").is_err());
        assert!(PathMatcher::new("a.b}").is_err());
        assert!(PathMatcher::new("a.[bc").is_err());
    }

    #[tokio::test]
    async fn test_memory_source_concatenates_namespaces() {
        let source = MemoryBlockSource::new();
        source.insert("raw", "a.b", vec![Datapoint::new(0, 1.0)]);
        source.insert("agg", "a.b", vec![Datapoint::new(120_000, 3.0)]);
        source.insert("agg", "a.c", vec![Datapoint::new(0, 9.0)]);
        assert_eq!(source.namespaces(), vec!["raw", "agg"]);

        let options = FetchOptions::default();
        let ids = source
            .resolve(&PathMatcher::new("a.*").unwrap(), &options)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a.b", "a.c"]);

        let bounds = Bounds::new(0, 120_000, Duration::from_secs(60)).unwrap();
        let block = source.fetch_block("a.b", bounds, &options).await.unwrap();
        assert_eq!(block.namespace, "raw+agg");
        assert_eq!(block.iterator_count(), 2);

        let values: Vec<f64> = block.into_series().values().collect();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 3.0);
    }

    #[tokio::test]
    async fn test_consolidating_storage_uses_policy_step() {
        let source = MemoryBlockSource::new();
        // Counters resolve to a 10s step for recent queries
        source.insert(
            "default",
            "stats.counts.api.requests",
            (0..6).map(|i| Datapoint::new(i * 10_000, i as f64)),
        );
        let storage = ConsolidatingStorage::new(source);

        let request = FetchRequest {
            path: "stats.counts.api.*",
            start: 0,
            end: 50_000,
            now: 60_000,
            options: FetchOptions::default(),
        };
        let list = storage.fetch_by_query(&request).await.unwrap();
        assert_eq!(list.len(), 1);
        let series = &list.values[0];
        assert_eq!(series.id, "stats.counts.api.requests");
        assert_eq!(series.values().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_consolidating_storage_rounds_default_policy() {
        let source = MemoryBlockSource::new();
        source.insert("default", "servers.web01.cpu", vec![Datapoint::new(90_000, 5.0)]);
        let storage = ConsolidatingStorage::new(source);

        let request = FetchRequest {
            path: "servers.web01.cpu",
            start: 30_000,
            end: 150_000,
            now: 200_000,
            options: FetchOptions::default(),
        };
        let list = storage.fetch_by_query(&request).await.unwrap();
        let series = &list.values[0];
        // 60s default step, bounds truncated to [0, 120s]
        assert_eq!(series.datapoints.first().map(|dp| dp.timestamp), Some(0));
        assert_eq!(series.len(), 3);
        assert_eq!(series.datapoints[1], Datapoint::new(60_000, 5.0));
    }

    #[tokio::test]
    async fn test_invalid_path_is_validation_error() {
        let storage = ConsolidatingStorage::new(MemoryBlockSource::new());
        let request = FetchRequest {
            path: "a.{b",
            start: 0,
            end: 1,
            now: 1,
            options: FetchOptions::default(),
        };
        let err = storage.fetch_by_query(&request).await.unwrap_err();
        assert_eq!(err.kind, crate::query::error::QueryErrorKind::ValidationError);
    }
}
