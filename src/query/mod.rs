//! Graphite query evaluation
//!
//! This module evaluates compiled Graphite expression trees:
//! - Fetch leaves pull series from a [`SeriesStorage`] collaborator
//! - Function nodes dispatch through a typed [`FunctionRegistry`]
//! - Context shifters such as `timeShift` re-evaluate a subtree over a
//!   different window
//!
//! # Architecture
//!
//! ```text
//! Expression tree (built by an external parser)
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Bind     │  name → FunctionDef, argument kinds checked once
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Evaluate   │  strict, left-to-right, cancellation checked per argument
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  storage → retention policy → consolidated series
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_graphite::query::{
//!     execute_query, ConsolidatingStorage, Expression, FunctionRegistry, MemoryBlockSource,
//!     QueryContext,
//! };
//! use kuba_graphite::types::Datapoint;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = MemoryBlockSource::new();
//! source.insert("default", "servers.web01.cpu", vec![Datapoint::new(60_000, 0.5)]);
//! let storage = Arc::new(ConsolidatingStorage::new(source));
//!
//! let registry = FunctionRegistry::with_builtins();
//! let call = registry
//!     .bind("aliasByNode", vec![Expression::fetch("servers.*.cpu").into(), 1i64.into()])
//!     .unwrap();
//! let expr = Expression::func(call).unwrap();
//!
//! let ctx = QueryContext::new(storage, 0, 120_000).with_now(180_000);
//! let result = execute_query(&expr, &ctx).await.unwrap();
//! assert_eq!(result.values[0].specification, "web01");
//! # }
//! ```

pub mod context;
pub mod error;
pub mod expression;
pub mod functions;
pub mod storage;

// Re-export main types
pub use context::{CancelHandle, FetchOptions, QueryContext};
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use expression::{execute_query, Expression, FetchExpression, FuncExpression};
pub use functions::{
    ArgKind, ArgValue, Argument, CallArgs, ContextShift, FunctionCall, FunctionDef,
    FunctionRegistry, Param, Signature,
};
pub use storage::{
    BlockSource, ConsolidatingStorage, FetchRequest, MemoryBlockSource, PathMatcher,
    SeriesStorage,
};
