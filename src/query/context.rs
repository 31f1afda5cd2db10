//! Per-execution query context
//!
//! A [`QueryContext`] carries the time window, fetch options, storage handle
//! and cancellation state through one evaluation of an expression tree.
//! Context shifters derive new contexts from it; the storage handle and the
//! cancellation state are shared with every derived context.

use super::error::{QueryError, QueryResult};
use super::storage::SeriesStorage;
use crate::config::EngineConfig;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Options forwarded to every storage fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only fetch from the local node
    pub local_only: bool,
    /// Allow answers from storage caches
    pub use_cache: bool,
    /// Allow reads from the durable tier
    pub use_durable_tier: bool,
    /// Upper bound for one fetch
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for FetchOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            local_only: config.local_only,
            use_cache: config.use_cache,
            use_durable_tier: config.use_durable_tier,
            timeout: config.timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag shared by a query and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    /// Create a handle that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every query holding this handle
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether `cancel()` has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the handle is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Evaluation context of one query execution
#[derive(Clone)]
pub struct QueryContext {
    /// Window start, Unix milliseconds
    pub start: i64,
    /// Window end, Unix milliseconds
    pub end: i64,
    /// Wall-clock time the query was issued, used to compute query age
    pub now: i64,
    /// Options forwarded to storage
    pub options: FetchOptions,
    /// Queries slower than this are logged at warn
    pub slow_query: Duration,
    storage: Arc<dyn SeriesStorage>,
    cancel: CancelHandle,
}

impl QueryContext {
    /// Create a context for `[start, end]` with default options
    pub fn new(storage: Arc<dyn SeriesStorage>, start: i64, end: i64) -> Self {
        let defaults = EngineConfig::default();
        Self {
            start,
            end,
            now: chrono::Utc::now().timestamp_millis(),
            options: FetchOptions::from(&defaults),
            slow_query: defaults.slow_query(),
            storage,
            cancel: CancelHandle::new(),
        }
    }

    /// Create a context using engine configuration
    pub fn from_config(
        storage: Arc<dyn SeriesStorage>,
        start: i64,
        end: i64,
        config: &EngineConfig,
    ) -> Self {
        Self {
            options: FetchOptions::from(config),
            slow_query: config.slow_query(),
            ..Self::new(storage, start, end)
        }
    }

    /// Override fetch options
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the wall-clock reference
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Share an existing cancellation handle
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Storage collaborator
    pub fn storage(&self) -> &dyn SeriesStorage {
        self.storage.as_ref()
    }

    /// Cancellation handle of this query
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Fail with `Cancelled` once the caller has cancelled the query
    pub fn check_cancelled(&self) -> QueryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::cancelled("query cancelled by caller"));
        }
        Ok(())
    }

    /// Context with the window moved by `offset_ms`
    ///
    /// Fails when either end of the moved window leaves the timestamp range.
    pub fn shifted(&self, offset_ms: i64) -> QueryResult<Self> {
        match (self.start.checked_add(offset_ms), self.end.checked_add(offset_ms)) {
            (Some(start), Some(end)) => self.with_range(start, end),
            _ => Err(QueryError::validation(format!(
                "shifting [{}, {}] by {}ms overflows the timestamp range",
                self.start, self.end, offset_ms
            ))),
        }
    }

    /// Context with a different window
    pub fn with_range(&self, start: i64, end: i64) -> QueryResult<Self> {
        if start > end {
            return Err(QueryError::validation(format!(
                "invalid window: start {} > end {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            ..self.clone()
        })
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("now", &self.now)
            .field("options", &self.options)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;
    use crate::query::storage::MemoryBlockSource;
    use crate::query::storage::ConsolidatingStorage;

    fn context() -> QueryContext {
        let storage = Arc::new(ConsolidatingStorage::new(MemoryBlockSource::new()));
        QueryContext::new(storage, 1_000, 2_000)
    }

    #[test]
    fn test_shifted_context_shares_cancellation() {
        let ctx = context();
        let shifted = ctx.shifted(-500).unwrap();
        assert_eq!((shifted.start, shifted.end), (500, 1_500));

        ctx.cancel_handle().cancel();
        assert!(shifted.check_cancelled().is_err());
    }

    #[test]
    fn test_shift_past_timestamp_range_is_rejected() {
        let ctx = context();
        let err = ctx.shifted(i64::MAX).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let err = ctx.shifted(i64::MIN).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let err = ctx.with_range(2_000, 1_000).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }

    #[test]
    fn test_fetch_options_from_config() {
        let config = EngineConfig {
            local_only: true,
            timeout_ms: 250,
            ..EngineConfig::default()
        };
        let options = FetchOptions::from(&config);
        assert!(options.local_only);
        assert_eq!(options.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        tokio::task::yield_now().await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation not observed")
            .unwrap();
    }
}
