//! Core data types used throughout the query layer
//!
//! # Key Types
//!
//! - **`Datapoint`**: A single raw measurement (timestamp + value)
//! - **`Bounds`**: Query window plus fixed step, defines the consolidation grid
//! - **`Series`**: A named sequence of datapoints with query provenance
//! - **`SeriesList`**: Ordered collection of series produced by an expression
//!
//! All timestamps are Unix milliseconds (`i64`).
//!
//! # Example
//!
//! ```rust
//! use kuba_graphite::types::Bounds;
//! use std::time::Duration;
//!
//! let bounds = Bounds::new(0, 300_000, Duration::from_secs(60)).unwrap();
//! assert_eq!(bounds.num_steps(), 6);
//! assert_eq!(bounds.time_for_index(5), Some(300_000));
//! assert_eq!(bounds.time_for_index(6), None);
//! ```

use crate::query::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single raw sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,

    /// Sample value; NaN marks a step without data
    pub value: f64,
}

impl Datapoint {
    /// Create a new datapoint
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Time window and step size of a query
///
/// Both `start` and `end` are inclusive; the grid has one step at
/// `start + i * step` for every `i` in `0..num_steps()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// First step timestamp in milliseconds
    pub start: i64,

    /// Last step timestamp in milliseconds (inclusive)
    pub end: i64,

    /// Width of every step
    pub step: Duration,
}

impl Bounds {
    /// Create bounds, validating `start <= end` and a step of at least 1ms
    ///
    /// The grid must be addressable: the span `end - start`, the step count
    /// and the exclusive end `end + step` all have to fit their integer types.
    pub fn new(start: i64, end: i64, step: Duration) -> QueryResult<Self> {
        if start > end {
            return Err(QueryError::validation(format!(
                "invalid bounds: start {} > end {}",
                start, end
            )));
        }
        let step_ms = match i64::try_from(step.as_millis()) {
            Ok(0) => {
                return Err(QueryError::validation(format!(
                    "invalid bounds: step {:?} must be at least 1ms",
                    step
                )))
            }
            Ok(ms) => ms,
            Err(_) => {
                return Err(QueryError::validation(format!(
                    "invalid bounds: step {:?} is too large",
                    step
                )))
            }
        };
        let addressable = end
            .checked_sub(start)
            .and_then(|span| usize::try_from(span / step_ms).ok())
            .and_then(|steps| steps.checked_add(1))
            .is_some()
            && end.checked_add(step_ms).is_some();
        if !addressable {
            return Err(QueryError::validation(format!(
                "invalid bounds: [{}, {}] with step {:?} exceeds the timestamp range",
                start, end, step
            )));
        }
        Ok(Self { start, end, step })
    }

    /// Create bounds for a resolution, optionally truncating both ends to a
    /// multiple of the step
    pub fn aligned(start: i64, end: i64, step: Duration, round_to_unit: bool) -> QueryResult<Self> {
        if !round_to_unit {
            return Self::new(start, end, step);
        }
        let step_ms = match i64::try_from(step.as_millis()) {
            Ok(ms) if ms > 0 => ms,
            _ => return Self::new(start, end, step),
        };
        match (
            start.checked_sub(start.rem_euclid(step_ms)),
            end.checked_sub(end.rem_euclid(step_ms)),
        ) {
            (Some(start), Some(end)) => Self::new(start, end, step),
            _ => Err(QueryError::validation(format!(
                "invalid bounds: [{}, {}] cannot be aligned to {:?}",
                start, end, step
            ))),
        }
    }

    /// Step width in milliseconds
    #[inline]
    pub fn step_ms(&self) -> i64 {
        self.step.as_millis() as i64
    }

    /// Number of steps on the grid, inclusive of `end`
    pub fn num_steps(&self) -> usize {
        ((self.end - self.start) / self.step_ms()) as usize + 1
    }

    /// Timestamp of the step at `index`, or `None` past the last step
    pub fn time_for_index(&self, index: usize) -> Option<i64> {
        if index >= self.num_steps() {
            return None;
        }
        Some(self.start + index as i64 * self.step_ms())
    }

    /// Index of the step whose half-open interval `[t, t + step)` contains
    /// `timestamp`
    pub fn index_for_time(&self, timestamp: i64) -> Option<usize> {
        if timestamp < self.start {
            return None;
        }
        let index = usize::try_from(timestamp.checked_sub(self.start)? / self.step_ms()).ok()?;
        (index < self.num_steps()).then_some(index)
    }

    /// Iterate over every step timestamp
    pub fn steps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.num_steps()).map(move |i| self.start + i as i64 * self.step_ms())
    }
}

/// A single result series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Storage identifier, e.g. `servers.web01.cpu.user`
    pub id: String,

    /// Human-readable provenance; the fetch pattern or an alias
    pub specification: String,

    /// Datapoints in timestamp order
    pub datapoints: Vec<Datapoint>,
}

impl Series {
    /// Create a series whose specification starts out as its id
    pub fn new(id: impl Into<String>, datapoints: Vec<Datapoint>) -> Self {
        let id = id.into();
        Self {
            specification: id.clone(),
            id,
            datapoints,
        }
    }

    /// Build a series from values placed on the steps of `bounds`
    pub fn from_values(id: impl Into<String>, bounds: &Bounds, values: Vec<f64>) -> Self {
        let datapoints = bounds
            .steps()
            .zip(values)
            .map(|(t, v)| Datapoint::new(t, v))
            .collect();
        Self::new(id, datapoints)
    }

    /// Replace the specification
    pub fn with_specification(mut self, specification: impl Into<String>) -> Self {
        self.specification = specification.into();
        self
    }

    /// Iterate over the values only
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.datapoints.iter().map(|dp| dp.value)
    }

    /// Number of datapoints
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Whether the series has no datapoints
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }
}

/// Ordered collection of series; order reflects evaluation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesList {
    /// The series, in evaluation order
    pub values: Vec<Series>,
}

impl SeriesList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the list holds no series
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the series
    pub fn iter(&self) -> std::slice::Iter<'_, Series> {
        self.values.iter()
    }

    /// Apply `f` to every series, keeping order and cardinality
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnMut(Series) -> Series,
    {
        Self {
            values: self.values.into_iter().map(f).collect(),
        }
    }

    /// Fallible variant of [`SeriesList::map`]
    pub fn try_map<F>(self, f: F) -> QueryResult<Self>
    where
        F: FnMut(Series) -> QueryResult<Series>,
    {
        Ok(Self {
            values: self.values.into_iter().map(f).collect::<QueryResult<_>>()?,
        })
    }
}

impl From<Vec<Series>> for SeriesList {
    fn from(values: Vec<Series>) -> Self {
        Self { values }
    }
}

impl IntoIterator for SeriesList {
    type Item = Series;
    type IntoIter = std::vec::IntoIter<Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
