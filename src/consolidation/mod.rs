//! Namespace series consolidation
//!
//! Raw samples for one logical series may live in several namespaces (for
//! example a short-retention unaggregated namespace and a long-retention
//! downsampled one). Storage hands each namespace back as a
//! [`RawSeriesIterator`]; a [`NamespaceBlock`] concatenates them in order and
//! places every datapoint on the fixed step grid described by its
//! [`Bounds`](crate::types::Bounds).
//!
//! Two access modes are provided with identical semantics:
//!
//! - [`StepIter`]: one grid step per `advance()`
//! - [`SeriesIter`]: the whole aligned sequence in one call
//!
//! A value lands in the step whose half-open interval `[t, t + step)`
//! contains its timestamp. Steps without a sample are NaN. The first sample
//! in a step wins; samples that land behind the cursor are discarded, never
//! reordered.

pub mod block;

pub use block::{NamespaceBlock, SeriesIter, StepIter};

use crate::types::Datapoint;

/// Single-owner cursor over the raw datapoints of one series in one namespace
///
/// Implementations must yield datapoints in non-decreasing timestamp order.
/// A cursor is driven by exactly one consumer and must be closed exactly once.
pub trait RawSeriesIterator: Send {
    /// Move to the next datapoint; `false` once the cursor is exhausted
    fn advance(&mut self) -> bool;

    /// Datapoint under the cursor, `None` before the first `advance()` or
    /// after exhaustion
    fn current(&self) -> Option<Datapoint>;

    /// Release underlying resources
    fn close(&mut self);
}

/// In-memory [`RawSeriesIterator`] over a vector of datapoints
#[derive(Debug, Default)]
pub struct VecSeriesIterator {
    points: Vec<Datapoint>,
    /// Position of the next datapoint to yield
    next: usize,
    current: Option<Datapoint>,
    closed: bool,
}

impl VecSeriesIterator {
    /// Create a cursor over `points`, which must already be time-ordered
    pub fn new(points: Vec<Datapoint>) -> Self {
        Self {
            points,
            next: 0,
            current: None,
            closed: false,
        }
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RawSeriesIterator for VecSeriesIterator {
    fn advance(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.current = self.points.get(self.next).copied();
        if self.current.is_some() {
            self.next += 1;
            true
        } else {
            false
        }
    }

    fn current(&self) -> Option<Datapoint> {
        self.current
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.points = Vec::new();
    }
}
