//! Query error types
//!
//! Provides structured error handling for every phase of a Graphite query:
//! binding function calls, validating literals, fetching from storage and
//! evaluating functions.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a bind error (unknown function, argument mismatch)
    pub fn bind(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::BindError, message)
    }

    /// Error raised when a top-level function does not produce series data
    pub fn invalid_return_type(function: &str, returns: impl fmt::Display) -> Self {
        Self::new(
            QueryErrorKind::BindError,
            format!(
                "top-level functions must return timeseries data: {} returns {}",
                function, returns
            ),
        )
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::StorageError, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create an internal error (broken invariant)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Function call could not be bound (unknown name, wrong argument kinds,
    /// invalid top-level return type). Raised before any execution.
    BindError,
    /// Invalid input (bounds, interval strings, regular expressions)
    ValidationError,
    /// Reported by the storage collaborator, passed through unchanged
    StorageError,
    /// Function evaluation failed
    ExecutionError,
    /// Query exceeded time limit
    Timeout,
    /// Query was cancelled by the caller
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::BindError => write!(f, "BindError"),
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::StorageError => write!(f, "StorageError"),
            QueryErrorKind::ExecutionError => write!(f, "ExecutionError"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;
