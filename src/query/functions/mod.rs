//! Function registry and call dispatcher
//!
//! Functions are registered once with a typed [`Signature`]. Binding a call
//! resolves the name, checks argument count and kinds, fills defaults and
//! stores a reference to the resolved [`FunctionDef`]; evaluation dispatches
//! through that reference without any further lookup or type inspection.
//!
//! # Context shifters
//!
//! A function declared as returning [`ArgKind::ContextShifter`] does not
//! transform data directly. Its handler returns a [`ContextShift`] that says
//! how to derive a new evaluation context and how to combine the series
//! evaluated under it. The dispatcher then evaluates the single series
//! argument under the derived context (unary) or under both the original
//! and the derived context (binary) and applies the transform.

pub mod alias;
pub mod transform;

use super::context::QueryContext;
use super::error::{QueryError, QueryResult};
use super::expression::Expression;
use crate::metrics;
use crate::types::SeriesList;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

// ============================================================================
// Argument kinds and values
// ============================================================================

/// Kind of a parameter, argument or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Ordered list of series
    SeriesList,
    /// Floating point number
    Scalar,
    /// String literal
    String,
    /// Integer literal
    Integer,
    /// One or more path node indexes
    NodeIndexList,
    /// Evaluation-context transformer
    ///
    /// Only valid as a return kind. A shifter call passed as an argument is
    /// run by the dispatcher and arrives as a series list.
    ContextShifter,
}

impl ArgKind {
    /// Whether an argument of kind `actual` may be passed for a parameter of
    /// this kind
    pub fn accepts(self, actual: ArgKind) -> bool {
        match self {
            ArgKind::SeriesList => {
                matches!(actual, ArgKind::SeriesList | ArgKind::ContextShifter)
            }
            ArgKind::Scalar => matches!(actual, ArgKind::Scalar | ArgKind::Integer),
            ArgKind::NodeIndexList => {
                matches!(actual, ArgKind::NodeIndexList | ArgKind::Integer)
            }
            other => other == actual,
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgKind::SeriesList => "seriesList",
            ArgKind::Scalar => "scalar",
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::NodeIndexList => "nodeIndexList",
            ArgKind::ContextShifter => "contextShifter",
        };
        f.write_str(name)
    }
}

/// Evaluated argument or function output
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// Series data
    SeriesList(SeriesList),
    /// Floating point number
    Scalar(f64),
    /// String
    String(String),
    /// Integer
    Integer(i64),
    /// Path node indexes
    NodeIndexList(Vec<i64>),
    /// Context transformer produced by a shifter function
    ContextShifter(ContextShift),
}

impl ArgValue {
    /// Kind of this value
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::SeriesList(_) => ArgKind::SeriesList,
            ArgValue::Scalar(_) => ArgKind::Scalar,
            ArgValue::String(_) => ArgKind::String,
            ArgValue::Integer(_) => ArgKind::Integer,
            ArgValue::NodeIndexList(_) => ArgKind::NodeIndexList,
            ArgValue::ContextShifter(_) => ArgKind::ContextShifter,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Scalar(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Integer(value)
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::SeriesList(list) => write!(f, "<seriesList:{}>", list.len()),
            ArgValue::Scalar(v) => write!(f, "{}", v),
            ArgValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            ArgValue::Integer(v) => write!(f, "{}", v),
            ArgValue::NodeIndexList(nodes) => {
                for (i, n) in nodes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", n)?;
                }
                Ok(())
            }
            ArgValue::ContextShifter(_) => f.write_str("<contextShifter>"),
        }
    }
}

// ============================================================================
// Context shifters
// ============================================================================

/// Derives a new context from the current one
pub type ShiftFn = Arc<dyn Fn(&QueryContext) -> QueryResult<QueryContext> + Send + Sync>;

/// Transform applied to the series evaluated under a shifted context
pub type UnaryTransformFn = Arc<dyn Fn(SeriesList) -> QueryResult<SeriesList> + Send + Sync>;

/// Transform combining the original and shifted evaluations
pub type BinaryTransformFn =
    Arc<dyn Fn(SeriesList, SeriesList) -> QueryResult<SeriesList> + Send + Sync>;

/// Output of a context-shifting function
#[derive(Clone)]
pub enum ContextShift {
    /// Evaluate once under the shifted context
    Unary {
        /// Context derivation
        shift: ShiftFn,
        /// Applied to the shifted result
        transform: UnaryTransformFn,
    },
    /// Evaluate under the original and the shifted context
    Binary {
        /// Context derivation
        shift: ShiftFn,
        /// Receives `(original, shifted)`
        transform: BinaryTransformFn,
    },
}

impl ContextShift {
    /// Build a unary shifter
    pub fn unary<S, T>(shift: S, transform: T) -> Self
    where
        S: Fn(&QueryContext) -> QueryResult<QueryContext> + Send + Sync + 'static,
        T: Fn(SeriesList) -> QueryResult<SeriesList> + Send + Sync + 'static,
    {
        ContextShift::Unary {
            shift: Arc::new(shift),
            transform: Arc::new(transform),
        }
    }

    /// Build a binary shifter
    pub fn binary<S, T>(shift: S, transform: T) -> Self
    where
        S: Fn(&QueryContext) -> QueryResult<QueryContext> + Send + Sync + 'static,
        T: Fn(SeriesList, SeriesList) -> QueryResult<SeriesList> + Send + Sync + 'static,
    {
        ContextShift::Binary {
            shift: Arc::new(shift),
            transform: Arc::new(transform),
        }
    }
}

impl fmt::Debug for ContextShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextShift::Unary { .. } => f.write_str("ContextShift::Unary"),
            ContextShift::Binary { .. } => f.write_str("ContextShift::Binary"),
        }
    }
}

// ============================================================================
// Signatures
// ============================================================================

/// One declared parameter
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name, used in messages
    pub name: String,
    /// Accepted kind
    pub kind: ArgKind,
    /// Absorbs every remaining argument; only valid on the last parameter
    pub variadic: bool,
    /// Value used when the argument is omitted
    pub default: Option<ArgValue>,
}

/// Typed signature of a registered function
#[derive(Debug, Clone)]
pub struct Signature {
    /// Function name
    pub name: String,
    /// Ordered parameters
    pub params: Vec<Param>,
    /// Declared return kind
    pub returns: ArgKind,
}

impl Signature {
    /// Start a signature with no parameters
    pub fn new(name: impl Into<String>, returns: ArgKind) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns,
        }
    }

    /// Append a required parameter
    pub fn param(mut self, name: &str, kind: ArgKind) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            kind,
            variadic: false,
            default: None,
        });
        self
    }

    /// Append an optional parameter
    pub fn optional(mut self, name: &str, kind: ArgKind, default: ArgValue) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            kind,
            variadic: false,
            default: Some(default),
        });
        self
    }

    /// Append a variadic parameter taking one or more arguments
    pub fn variadic(mut self, name: &str, kind: ArgKind) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            kind,
            variadic: true,
            default: None,
        });
        self
    }

    fn validate(&self) -> QueryResult<()> {
        if let Some(pos) = self.params.iter().position(|p| p.variadic) {
            if pos + 1 != self.params.len() {
                return Err(QueryError::bind(format!(
                    "{}: variadic parameter '{}' must be last",
                    self.name, self.params[pos].name
                )));
            }
        }
        for param in &self.params {
            if param.kind == ArgKind::ContextShifter {
                return Err(QueryError::bind(format!(
                    "{}: parameter '{}' cannot be a {}; declare it as {}",
                    self.name,
                    param.name,
                    ArgKind::ContextShifter,
                    ArgKind::SeriesList
                )));
            }
            if let Some(default) = &param.default {
                if !param.kind.accepts(default.kind()) {
                    return Err(QueryError::bind(format!(
                        "{}: default for '{}' is {}, expected {}",
                        self.name,
                        param.name,
                        default.kind(),
                        param.kind
                    )));
                }
            }
        }
        if self.returns == ArgKind::ContextShifter {
            let series: Vec<&Param> = self
                .params
                .iter()
                .filter(|p| p.kind == ArgKind::SeriesList)
                .collect();
            if series.len() != 1 || series[0].variadic {
                return Err(QueryError::bind(format!(
                    "{}: context shifters take exactly one non-variadic series parameter",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", p.name, p.kind)?;
            if p.variadic {
                f.write_str("...")?;
            }
            if let Some(default) = &p.default {
                write!(f, " = {}", default)?;
            }
        }
        write!(f, ") -> {}", self.returns)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Function implementation
pub type Handler = Arc<dyn Fn(&QueryContext, CallArgs) -> QueryResult<ArgValue> + Send + Sync>;

/// Signature plus handler
pub struct FunctionDef {
    signature: Signature,
    handler: Handler,
}

impl FunctionDef {
    /// Create a definition
    pub fn new<F>(signature: Signature, handler: F) -> Self
    where
        F: Fn(&QueryContext, CallArgs) -> QueryResult<ArgValue> + Send + Sync + 'static,
    {
        Self {
            signature,
            handler: Arc::new(handler),
        }
    }

    /// Declared signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of function definitions
///
/// Immutable once queries start binding against it; share behind an `Arc`.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDef>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in function
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        alias::register(&mut registry);
        transform::register(&mut registry);
        registry
    }

    /// Register a function, rejecting duplicate names and malformed
    /// signatures
    pub fn register(&mut self, def: FunctionDef) -> QueryResult<()> {
        if self.functions.contains_key(&def.signature.name) {
            return Err(QueryError::bind(format!(
                "function '{}' is already registered",
                def.signature.name
            )));
        }
        def.signature.validate()?;
        self.insert(def);
        Ok(())
    }

    // Built-in signatures are covered by `test_builtin_signatures_are_valid`
    fn insert(&mut self, def: FunctionDef) {
        self.functions
            .insert(def.signature.name.clone(), Arc::new(def));
    }

    /// Resolve `name`
    pub fn lookup(&self, name: &str) -> QueryResult<Arc<FunctionDef>> {
        self.functions.get(name).cloned().ok_or_else(|| {
            metrics::record_bind_error("unknown_function");
            QueryError::bind(format!("unknown function '{}'", name))
        })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name` and type-check `args` against its signature
    pub fn bind(&self, name: &str, args: Vec<Argument>) -> QueryResult<FunctionCall> {
        let function = self.lookup(name)?;
        let signature = &function.signature;
        let supplied = args.len();

        let mut bound = Vec::with_capacity(signature.params.len().max(supplied));
        let mut args = args.into_iter();
        for param in &signature.params {
            if param.variadic {
                let rest: Vec<Argument> = args.by_ref().collect();
                if rest.is_empty() {
                    return Err(arity_error(signature, supplied));
                }
                for arg in rest {
                    check_kind(signature, param, &arg)?;
                    bound.push(arg);
                }
                continue;
            }
            match args.next() {
                Some(arg) => {
                    check_kind(signature, param, &arg)?;
                    bound.push(arg);
                }
                None => match &param.default {
                    Some(default) => bound.push(Argument::Literal(default.clone())),
                    None => return Err(arity_error(signature, supplied)),
                },
            }
        }
        if args.next().is_some() {
            return Err(arity_error(signature, supplied));
        }

        let series_arg = match signature.returns {
            ArgKind::ContextShifter => signature
                .params
                .iter()
                .position(|p| p.kind == ArgKind::SeriesList),
            _ => None,
        };

        debug!(function = name, args = bound.len(), "Bound function call");
        Ok(FunctionCall {
            function,
            args: bound,
            supplied,
            series_arg,
        })
    }
}

fn arity_error(signature: &Signature, supplied: usize) -> QueryError {
    metrics::record_bind_error("arity");
    QueryError::bind(format!(
        "{} called with {} argument(s), expected {}",
        signature.name, supplied, signature
    ))
}

fn check_kind(signature: &Signature, param: &Param, arg: &Argument) -> QueryResult<()> {
    let actual = arg.kind();
    if param.kind.accepts(actual) {
        return Ok(());
    }
    metrics::record_bind_error("kind");
    Err(QueryError::bind(format!(
        "{}: argument '{}' must be {}, got {}",
        signature.name, param.name, param.kind, actual
    )))
}

// ============================================================================
// Bound calls
// ============================================================================

/// Unevaluated call argument
#[derive(Debug, Clone)]
pub enum Argument {
    /// Sub-expression producing series
    Series(Expression),
    /// Literal value
    Literal(ArgValue),
}

impl Argument {
    /// Kind this argument produces when evaluated
    pub fn kind(&self) -> ArgKind {
        match self {
            Argument::Series(Expression::Func(func)) => func.call().returns(),
            Argument::Series(_) => ArgKind::SeriesList,
            Argument::Literal(value) => value.kind(),
        }
    }

    async fn evaluate(&self, ctx: &QueryContext) -> QueryResult<ArgValue> {
        match self {
            Argument::Series(expr) => Ok(ArgValue::SeriesList(expr.execute(ctx).await?)),
            Argument::Literal(value) => Ok(value.clone()),
        }
    }

    async fn evaluate_series(&self, ctx: &QueryContext) -> QueryResult<SeriesList> {
        match self {
            Argument::Series(expr) => expr.execute(ctx).await,
            Argument::Literal(ArgValue::SeriesList(list)) => Ok(list.clone()),
            Argument::Literal(other) => Err(QueryError::internal(format!(
                "expected series argument, got {}",
                other.kind()
            ))),
        }
    }
}

impl From<Expression> for Argument {
    fn from(expr: Expression) -> Self {
        Argument::Series(expr)
    }
}

impl From<ArgValue> for Argument {
    fn from(value: ArgValue) -> Self {
        Argument::Literal(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Literal(value.into())
    }
}

impl From<f64> for Argument {
    fn from(value: f64) -> Self {
        Argument::Literal(value.into())
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Argument::Literal(value.into())
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Series(expr) => write!(f, "{}", expr),
            Argument::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// Function call bound to a resolved definition
#[derive(Debug, Clone)]
pub struct FunctionCall {
    function: Arc<FunctionDef>,
    args: Vec<Argument>,
    supplied: usize,
    series_arg: Option<usize>,
}

impl FunctionCall {
    /// Function name
    pub fn name(&self) -> &str {
        &self.function.signature.name
    }

    /// Bound arguments, defaults included
    pub fn arguments(&self) -> &[Argument] {
        &self.args
    }

    /// Declared return kind
    pub fn returns(&self) -> ArgKind {
        self.function.signature.returns
    }

    /// Resolved definition
    pub fn definition(&self) -> &FunctionDef {
        &self.function
    }

    /// Evaluate arguments left to right, then invoke the handler
    ///
    /// Cancellation is checked before every argument. For context shifters
    /// the literal arguments are evaluated first, then the series argument is
    /// evaluated under the derived context.
    pub fn evaluate<'a>(&'a self, ctx: &'a QueryContext) -> BoxFuture<'a, QueryResult<ArgValue>> {
        async move {
            if let Some(index) = self.series_arg {
                return self.evaluate_shifter(ctx, index).await;
            }

            let mut values = Vec::with_capacity(self.args.len());
            for arg in &self.args {
                ctx.check_cancelled()?;
                values.push(arg.evaluate(ctx).await?);
            }

            debug!(function = self.name(), args = values.len(), "Invoking function");
            let output = (self.function.handler)(ctx, CallArgs::new(values))?;
            if output.kind() != self.returns() {
                return Err(self.broken_contract(output.kind()));
            }
            Ok(output)
        }
        .boxed()
    }

    async fn evaluate_shifter(&self, ctx: &QueryContext, index: usize) -> QueryResult<ArgValue> {
        let mut values = Vec::with_capacity(self.args.len());
        for (i, arg) in self.args.iter().enumerate() {
            if i == index {
                values.push(ArgValue::SeriesList(SeriesList::new()));
                continue;
            }
            ctx.check_cancelled()?;
            values.push(arg.evaluate(ctx).await?);
        }

        let shift = match (self.function.handler)(ctx, CallArgs::new(values))? {
            ArgValue::ContextShifter(shift) => shift,
            other => return Err(self.broken_contract(other.kind())),
        };

        let series_arg = &self.args[index];
        let output = match shift {
            ContextShift::Unary { shift, transform } => {
                let shifted = shift(ctx)?;
                debug!(
                    function = self.name(),
                    start = shifted.start,
                    end = shifted.end,
                    "Evaluating under shifted context"
                );
                ctx.check_cancelled()?;
                let list = series_arg.evaluate_series(&shifted).await?;
                transform(list)?
            }
            ContextShift::Binary { shift, transform } => {
                ctx.check_cancelled()?;
                let original = series_arg.evaluate_series(ctx).await?;
                let shifted = shift(ctx)?;
                debug!(
                    function = self.name(),
                    start = shifted.start,
                    end = shifted.end,
                    "Evaluating under shifted context"
                );
                ctx.check_cancelled()?;
                let other = series_arg.evaluate_series(&shifted).await?;
                transform(original, other)?
            }
        };
        Ok(ArgValue::SeriesList(output))
    }

    fn broken_contract(&self, actual: ArgKind) -> QueryError {
        error!(
            function = self.name(),
            declared = %self.returns(),
            actual = %actual,
            "Function output does not match its declared return kind"
        );
        QueryError::internal(format!(
            "{} declared {} but produced {}",
            self.name(),
            self.returns(),
            actual
        ))
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, arg) in self.args.iter().take(self.supplied).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

// ============================================================================
// Handler arguments
// ============================================================================

/// Evaluated arguments handed to a handler
///
/// Kinds were checked at bind time, so an accessor mismatch is a broken
/// invariant and reported as [`QueryErrorKind::Internal`](super::error::QueryErrorKind::Internal).
#[derive(Debug)]
pub struct CallArgs {
    values: Vec<ArgValue>,
}

impl CallArgs {
    /// Wrap evaluated values
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self { values }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the series list at `index`
    pub fn series(&mut self, index: usize) -> QueryResult<SeriesList> {
        match self.values.get_mut(index) {
            Some(ArgValue::SeriesList(list)) => Ok(std::mem::take(list)),
            other => Err(mismatch(index, ArgKind::SeriesList, other.map(|v| v.kind()))),
        }
    }

    /// String at `index`
    pub fn string(&self, index: usize) -> QueryResult<&str> {
        match self.values.get(index) {
            Some(ArgValue::String(s)) => Ok(s),
            other => Err(mismatch(index, ArgKind::String, other.map(ArgValue::kind))),
        }
    }

    /// Number at `index`; integers are widened
    pub fn scalar(&self, index: usize) -> QueryResult<f64> {
        match self.values.get(index) {
            Some(ArgValue::Scalar(v)) => Ok(*v),
            Some(ArgValue::Integer(v)) => Ok(*v as f64),
            other => Err(mismatch(index, ArgKind::Scalar, other.map(ArgValue::kind))),
        }
    }

    /// Integer at `index`
    pub fn integer(&self, index: usize) -> QueryResult<i64> {
        match self.values.get(index) {
            Some(ArgValue::Integer(v)) => Ok(*v),
            other => Err(mismatch(index, ArgKind::Integer, other.map(ArgValue::kind))),
        }
    }

    /// Node indexes from `from` to the end, flattened
    pub fn node_indexes(&self, from: usize) -> QueryResult<Vec<i64>> {
        let mut nodes = Vec::new();
        for (offset, value) in self.values.iter().skip(from).enumerate() {
            match value {
                ArgValue::Integer(n) => nodes.push(*n),
                ArgValue::NodeIndexList(list) => nodes.extend_from_slice(list),
                other => {
                    return Err(mismatch(from + offset, ArgKind::NodeIndexList, Some(other.kind())))
                }
            }
        }
        Ok(nodes)
    }
}

fn mismatch(index: usize, expected: ArgKind, actual: Option<ArgKind>) -> QueryError {
    let actual = actual.map_or_else(|| "nothing".to_string(), |k| k.to_string());
    QueryError::internal(format!(
        "argument {} should be {}, found {}",
        index, expected, actual
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    fn identity() -> FunctionDef {
        FunctionDef::new(
            Signature::new("identity", ArgKind::SeriesList).param("series", ArgKind::SeriesList),
            |_, mut args| Ok(ArgValue::SeriesList(args.series(0)?)),
        )
    }

    #[test]
    fn test_kind_compatibility() {
        assert!(ArgKind::SeriesList.accepts(ArgKind::ContextShifter));
        assert!(ArgKind::Scalar.accepts(ArgKind::Integer));
        assert!(ArgKind::NodeIndexList.accepts(ArgKind::Integer));
        assert!(!ArgKind::Integer.accepts(ArgKind::Scalar));
        assert!(!ArgKind::String.accepts(ArgKind::SeriesList));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = FunctionRegistry::new();
        registry.register(identity()).unwrap();
        let err = registry.register(identity()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::BindError);
    }

    #[test]
    fn test_register_rejects_misplaced_variadic() {
        let mut registry = FunctionRegistry::new();
        let def = FunctionDef::new(
            Signature::new("bad", ArgKind::SeriesList)
                .variadic("nodes", ArgKind::NodeIndexList)
                .param("series", ArgKind::SeriesList),
            |_, mut args| Ok(ArgValue::SeriesList(args.series(1)?)),
        );
        assert!(registry.register(def).is_err());
    }

    #[test]
    fn test_register_rejects_shifter_without_series() {
        let mut registry = FunctionRegistry::new();
        let def = FunctionDef::new(
            Signature::new("shift", ArgKind::ContextShifter).param("offset", ArgKind::String),
            |_, _| Ok(ArgValue::Integer(0)),
        );
        assert!(registry.register(def).is_err());
    }

    #[test]
    fn test_register_rejects_shifter_parameter() {
        let mut registry = FunctionRegistry::with_builtins();
        let def = FunctionDef::new(
            Signature::new("wrap", ArgKind::SeriesList).param("shifted", ArgKind::ContextShifter),
            |_, mut args| Ok(ArgValue::SeriesList(args.series(0)?)),
        );
        let err = registry.register(def).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::BindError);
        assert!(err.message.contains("shifted"));

        // Shifter calls are passed through series parameters instead
        let shifted = registry
            .bind("timeShift", vec![Expression::fetch("a.b").into(), "1h".into()])
            .unwrap();
        let call = registry
            .bind("alias", vec![Expression::func(shifted).unwrap().into(), "x".into()])
            .unwrap();
        assert_eq!(call.arguments()[0].kind(), ArgKind::ContextShifter);
    }

    #[test]
    fn test_builtin_signatures_are_valid() {
        let registry = FunctionRegistry::with_builtins();
        for name in registry.names() {
            let def = registry.lookup(name).unwrap();
            assert!(def.signature().validate().is_ok(), "{}", def.signature());
        }
        assert!(registry.names().contains(&"aliasByNode"));
        assert!(registry.names().contains(&"timeShift"));
    }

    #[test]
    fn test_unknown_function() {
        let registry = FunctionRegistry::new();
        let err = registry.bind("nope", vec![]).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::BindError);
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn test_bind_checks_arity_and_kinds() {
        let registry = FunctionRegistry::with_builtins();
        let fetch = || Argument::Series(Expression::fetch("a.b"));

        assert!(registry.bind("alias", vec![fetch()]).is_err());
        assert!(registry
            .bind("alias", vec![fetch(), ArgValue::Integer(3).into()])
            .is_err());
        assert!(registry
            .bind("alias", vec![fetch(), "x".into(), "y".into()])
            .is_err());
        assert!(registry.bind("alias", vec![fetch(), "x".into()]).is_ok());

        // Variadic node indexes need at least one
        assert!(registry.bind("aliasByNode", vec![fetch()]).is_err());
        assert!(registry
            .bind("aliasByNode", vec![fetch(), 0i64.into(), 1i64.into()])
            .is_ok());
    }

    #[test]
    fn test_bind_fills_defaults() {
        let registry = FunctionRegistry::with_builtins();
        let call = registry
            .bind(
                "summarize",
                vec![Expression::fetch("a.b").into(), "1h".into()],
            )
            .unwrap();
        assert_eq!(call.arguments().len(), 3);
        assert_eq!(call.to_string(), "summarize(fetch(a.b),\"1h\")");
    }

    #[test]
    fn test_call_args_accessors() {
        let mut args = CallArgs::new(vec![
            ArgValue::SeriesList(SeriesList::new()),
            ArgValue::Integer(2),
            ArgValue::NodeIndexList(vec![3, -1]),
        ]);
        assert_eq!(args.len(), 3);
        assert!(args.series(0).is_ok());
        assert_eq!(args.scalar(1).unwrap(), 2.0);
        assert_eq!(args.node_indexes(1).unwrap(), vec![2, 3, -1]);
        assert_eq!(args.string(1).unwrap_err().kind, QueryErrorKind::Internal);
        assert_eq!(args.integer(7).unwrap_err().kind, QueryErrorKind::Internal);
    }

    #[test]
    fn test_signature_display() {
        let registry = FunctionRegistry::with_builtins();
        let def = registry.lookup("aliasByNode").unwrap();
        assert_eq!(
            def.signature().to_string(),
            "aliasByNode(series: seriesList, nodes: nodeIndexList...) -> seriesList"
        );
    }
}
