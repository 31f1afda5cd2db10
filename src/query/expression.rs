//! Expression tree evaluation
//!
//! An [`Expression`] is built once (by a parser outside this crate) and can
//! be executed any number of times, concurrently, against different
//! [`QueryContext`]s. Evaluation is strict: every argument is fully
//! evaluated, left to right, before the enclosing function runs.

use super::context::QueryContext;
use super::error::{QueryError, QueryResult};
use super::functions::{ArgKind, ArgValue, FunctionCall};
use super::storage::FetchRequest;
use crate::metrics;
use crate::types::SeriesList;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Node of a compiled query
#[derive(Debug, Clone)]
pub enum Expression {
    /// Storage fetch of a path pattern
    Fetch(FetchExpression),
    /// Bound function call
    Func(FuncExpression),
    /// Empty query
    Noop,
}

impl Expression {
    /// Fetch expression for `path`
    pub fn fetch(path: impl Into<String>) -> Self {
        Expression::Fetch(FetchExpression { path: path.into() })
    }

    /// Wrap a bound call
    ///
    /// Fails with a bind error unless the call returns series data or is a
    /// context shifter.
    pub fn func(call: FunctionCall) -> QueryResult<Self> {
        match call.returns() {
            ArgKind::SeriesList | ArgKind::ContextShifter => {
                Ok(Expression::Func(FuncExpression { call }))
            }
            other => {
                metrics::record_bind_error("return_type");
                Err(QueryError::invalid_return_type(call.name(), other))
            }
        }
    }

    /// Expression that yields no series
    pub fn noop() -> Self {
        Expression::Noop
    }

    /// `fetch`, the function name, or `noop`
    pub fn name(&self) -> &str {
        match self {
            Expression::Fetch(_) => "fetch",
            Expression::Func(func) => func.call.name(),
            Expression::Noop => "noop",
        }
    }

    /// Rendered arguments
    pub fn arguments(&self) -> Vec<String> {
        match self {
            Expression::Fetch(fetch) => vec![fetch.path.clone()],
            Expression::Func(func) => func.call.arguments().iter().map(|a| a.to_string()).collect(),
            Expression::Noop => Vec::new(),
        }
    }

    /// Evaluate the tree under `ctx`
    pub fn execute<'a>(&'a self, ctx: &'a QueryContext) -> BoxFuture<'a, QueryResult<SeriesList>> {
        async move {
            match self {
                Expression::Fetch(fetch) => fetch.execute(ctx).await,
                Expression::Func(func) => func.execute(ctx).await,
                Expression::Noop => Ok(SeriesList::new()),
            }
        }
        .boxed()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Fetch(fetch) => write!(f, "fetch({})", fetch.path),
            Expression::Func(func) => write!(f, "{}", func.call),
            Expression::Noop => f.write_str("noop()"),
        }
    }
}

/// Leaf fetching a path pattern from storage
#[derive(Debug, Clone)]
pub struct FetchExpression {
    path: String,
}

impl FetchExpression {
    /// Path pattern
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn execute(&self, ctx: &QueryContext) -> QueryResult<SeriesList> {
        ctx.check_cancelled()?;

        let request = FetchRequest {
            path: &self.path,
            start: ctx.start,
            end: ctx.end,
            now: ctx.now,
            options: ctx.options,
        };
        let timeout = ctx.options.timeout;
        let started = Instant::now();

        let result = tokio::select! {
            fetched = tokio::time::timeout(timeout, ctx.storage().fetch_by_query(&request)) => {
                match fetched {
                    Ok(result) => result,
                    Err(_) => Err(QueryError::timeout(format!(
                        "fetch of '{}' exceeded {:?}",
                        self.path, timeout
                    ))),
                }
            }
            _ = ctx.cancel_handle().cancelled() => {
                Err(QueryError::cancelled(format!("fetch of '{}' cancelled", self.path)))
            }
        };

        let elapsed = started.elapsed();
        metrics::record_fetch(elapsed.as_secs_f64(), result.is_ok());
        let list = result?;

        debug!(
            path = %self.path,
            series = list.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Fetched series"
        );
        Ok(list.map(|s| s.with_specification(self.path.as_str())))
    }
}

/// Bound function call node
#[derive(Debug, Clone)]
pub struct FuncExpression {
    call: FunctionCall,
}

impl FuncExpression {
    /// The bound call
    pub fn call(&self) -> &FunctionCall {
        &self.call
    }

    async fn execute(&self, ctx: &QueryContext) -> QueryResult<SeriesList> {
        match self.call.evaluate(ctx).await? {
            ArgValue::SeriesList(list) => Ok(list),
            other => {
                error!(
                    function = self.call.name(),
                    actual = %other.kind(),
                    "Function expression produced non-series output"
                );
                Err(QueryError::internal(format!(
                    "{} produced {} where series were expected",
                    self.call.name(),
                    other.kind()
                )))
            }
        }
    }
}

/// Execute a whole query, recording its outcome
pub async fn execute_query(expr: &Expression, ctx: &QueryContext) -> QueryResult<SeriesList> {
    let started = Instant::now();
    let result = expr.execute(ctx).await;
    let elapsed = started.elapsed();
    metrics::record_query(result.is_ok());

    match &result {
        Ok(list) if elapsed >= ctx.slow_query => warn!(
            query = %expr,
            series = list.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Slow query"
        ),
        Ok(list) => debug!(
            query = %expr,
            series = list.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Query complete"
        ),
        Err(e) => debug!(query = %expr, error = %e, "Query failed"),
    }
    result
}
