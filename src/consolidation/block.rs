//! Namespace blocks and the step/series consolidation cursors

use super::RawSeriesIterator;
use crate::metrics;
use crate::types::{Bounds, Datapoint, Series};
use tracing::{debug, warn};

/// Raw iterators for one series across namespaces, bound to a grid
///
/// Created per fetch and consumed once by either [`NamespaceBlock::step_iter`]
/// or [`NamespaceBlock::series_iter`]. Dropping an unconsumed block releases
/// its iterators.
pub struct NamespaceBlock {
    /// Series identifier
    pub id: String,
    /// Namespace the block was resolved from; `+`-joined when several
    /// namespaces contributed iterators
    pub namespace: String,
    /// Consolidation grid
    pub bounds: Bounds,
    sources: Sources,
}

impl NamespaceBlock {
    /// Create a block; `iterators` are consumed in the given order
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        bounds: Bounds,
        iterators: Vec<Box<dyn RawSeriesIterator>>,
    ) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            bounds,
            sources: Sources::new(iterators),
        }
    }

    /// Number of underlying iterators
    pub fn iterator_count(&self) -> usize {
        self.sources.iters.len()
    }

    /// Consolidate one step at a time
    pub fn step_iter(self) -> StepIter {
        StepIter {
            sources: self.sources,
            bounds: self.bounds,
            index: None,
            last: None,
            discarded: 0,
        }
    }

    /// Consolidate the whole series in one call
    pub fn series_iter(self) -> SeriesIter {
        SeriesIter {
            sources: self.sources,
            bounds: self.bounds,
            values: None,
            discarded: 0,
        }
    }

    /// Consolidate into a [`Series`] whose datapoints sit on the grid
    pub fn into_series(self) -> Series {
        let id = self.id.clone();
        let bounds = self.bounds;
        let values = self.series_iter().into_values();
        Series::from_values(id, &bounds, values)
    }
}

/// Ordered concatenation of raw iterators, released exactly once
struct Sources {
    iters: Vec<Box<dyn RawSeriesIterator>>,
    index: usize,
    closed: bool,
}

impl Sources {
    fn new(iters: Vec<Box<dyn RawSeriesIterator>>) -> Self {
        Self {
            iters,
            index: 0,
            closed: false,
        }
    }

    /// Pull the next datapoint, moving on to the next iterator when the
    /// current one is exhausted
    fn next_datapoint(&mut self) -> Option<Datapoint> {
        if self.closed {
            return None;
        }
        while let Some(iter) = self.iters.get_mut(self.index) {
            if iter.advance() {
                if let Some(dp) = iter.current() {
                    return Some(dp);
                }
                continue;
            }
            self.index += 1;
        }
        None
    }

    /// Abandon the rest of the current iterator
    fn skip_iterator(&mut self) {
        if self.index < self.iters.len() {
            self.index += 1;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for iter in self.iters.iter_mut() {
            iter.close();
        }
    }
}

impl Drop for Sources {
    fn drop(&mut self) {
        self.close();
    }
}

/// Step-mode cursor: one grid step per [`StepIter::advance`]
///
/// Also an [`Iterator`] over the step values.
pub struct StepIter {
    sources: Sources,
    bounds: Bounds,
    /// Current step; `None` before the first advance
    index: Option<usize>,
    /// Last datapoint pulled from the sources
    last: Option<Datapoint>,
    discarded: usize,
}

impl StepIter {
    /// Move to the next step; `false` once past the last step of the bounds
    pub fn advance(&mut self) -> bool {
        let index = self.index.map_or(0, |i| i + 1);
        let Some(step_time) = self.bounds.time_for_index(index) else {
            // Park one past the end so repeated calls stay terminal
            self.index = Some(self.bounds.num_steps());
            return false;
        };
        self.index = Some(index);

        while self.last.map_or(true, |dp| step_time > dp.timestamp) {
            let Some(dp) = self.sources.next_datapoint() else {
                break;
            };
            if dp.timestamp >= self.bounds.start && dp.timestamp < step_time {
                self.discarded += 1;
            }
            self.last = Some(dp);
        }

        true
    }

    /// Value of the current step, NaN when no datapoint landed in it
    ///
    /// Repeated calls without an intervening `advance()` return the same value.
    pub fn current(&self) -> f64 {
        let Some(step_time) = self.index.and_then(|i| self.bounds.time_for_index(i)) else {
            return f64::NAN;
        };
        match self.last {
            Some(dp) if dp.timestamp >= step_time && dp.timestamp < step_time + self.bounds.step_ms() => {
                dp.value
            }
            _ => f64::NAN,
        }
    }

    /// Timestamp of the current step
    pub fn current_time(&self) -> Option<i64> {
        self.index.and_then(|i| self.bounds.time_for_index(i))
    }

    /// Grid this cursor walks
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Datapoints dropped because they landed behind the cursor
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Release every underlying iterator; idempotent
    pub fn close(&mut self) {
        if !self.sources.closed {
            report_discarded("step", self.discarded);
        }
        self.sources.close();
    }
}

impl Iterator for StepIter {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        self.advance().then(|| self.current())
    }
}

impl Drop for StepIter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Series-mode cursor: the whole aligned sequence in one call
pub struct SeriesIter {
    sources: Sources,
    bounds: Bounds,
    values: Option<Vec<f64>>,
    discarded: usize,
}

impl SeriesIter {
    /// `true` until the series has been consolidated by [`SeriesIter::current`]
    pub fn advance(&mut self) -> bool {
        self.values.is_none()
    }

    /// Consolidated values, exactly `bounds.num_steps()` long
    ///
    /// The first call drains the sources; later calls return the same values.
    pub fn current(&mut self) -> Vec<f64> {
        if self.values.is_none() {
            self.values = Some(self.consolidate());
        }
        self.values.clone().unwrap_or_default()
    }

    /// Consolidate and release in one step
    pub fn into_values(mut self) -> Vec<f64> {
        let values = self.current();
        self.close();
        values
    }

    /// Datapoints dropped because they landed behind the cursor
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Release every underlying iterator; idempotent
    pub fn close(&mut self) {
        if !self.sources.closed {
            report_discarded("series", self.discarded);
        }
        self.sources.close();
    }

    fn consolidate(&mut self) -> Vec<f64> {
        let num_steps = self.bounds.num_steps();
        let mut values = Vec::with_capacity(num_steps);

        while values.len() < num_steps {
            let Some(dp) = self.sources.next_datapoint() else {
                break;
            };
            if dp.timestamp < self.bounds.start {
                continue;
            }
            let Some(index) = self.bounds.index_for_time(dp.timestamp) else {
                // Past the last step; later datapoints of this iterator are too
                self.sources.skip_iterator();
                continue;
            };
            if index < values.len() {
                self.discarded += 1;
                continue;
            }
            values.resize(index, f64::NAN);
            values.push(dp.value);
        }

        values.resize(num_steps, f64::NAN);
        debug!(
            steps = num_steps,
            discarded = self.discarded,
            "Consolidated series"
        );
        values
    }
}

impl Drop for SeriesIter {
    fn drop(&mut self) {
        self.close();
    }
}

fn report_discarded(mode: &str, count: usize) {
    if count > 0 {
        warn!(
            mode,
            discarded = count,
            "Discarded datapoints behind the consolidation cursor; namespace ranges overlap"
        );
        metrics::record_discarded(mode, count);
    }
}
