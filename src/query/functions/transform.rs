//! Value transforms and context-shifting functions
//!
//! `timeShift` and `movingAverage` are context shifters: they never fetch
//! themselves but tell the dispatcher which window to evaluate their series
//! argument in.

use super::{ArgKind, ArgValue, ContextShift, FunctionDef, FunctionRegistry, Signature};
use crate::query::error::{QueryError, QueryResult};
use crate::retention::ConsolidationApproach;
use crate::types::{Datapoint, Series, SeriesList};
use std::collections::HashMap;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.insert(FunctionDef::new(
        Signature::new("scale", ArgKind::SeriesList)
            .param("series", ArgKind::SeriesList)
            .param("factor", ArgKind::Scalar),
        |_, mut args| {
            let factor = args.scalar(1)?;
            Ok(ArgValue::SeriesList(scale(args.series(0)?, factor)))
        },
    ));
    registry.insert(FunctionDef::new(
        Signature::new("summarize", ArgKind::SeriesList)
            .param("series", ArgKind::SeriesList)
            .param("interval", ArgKind::String)
            .optional("func", ArgKind::String, ArgValue::from("sum")),
        |_, mut args| {
            let interval = args.string(1)?.to_string();
            let func = args.string(2)?.to_string();
            summarize(args.series(0)?, &interval, &func).map(ArgValue::SeriesList)
        },
    ));
    registry.insert(FunctionDef::new(
        Signature::new("timeShift", ArgKind::ContextShifter)
            .param("series", ArgKind::SeriesList)
            .param("shift", ArgKind::String),
        |_, args| time_shift(args.string(1)?).map(ArgValue::ContextShifter),
    ));
    registry.insert(FunctionDef::new(
        Signature::new("movingAverage", ArgKind::ContextShifter)
            .param("series", ArgKind::SeriesList)
            .param("window", ArgKind::String),
        |_, args| moving_average(args.string(1)?).map(ArgValue::ContextShifter),
    ));
}

/// Parse a Graphite interval such as `30s`, `5min`, `-1h` or `2w` into
/// signed milliseconds
///
/// `m` means minutes. Months are 30 days and years 365 days.
pub fn parse_interval(interval: &str) -> QueryResult<i64> {
    let invalid = || QueryError::validation(format!("invalid interval '{}'", interval));

    let trimmed = interval.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let split = body
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = body.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;

    let unit_ms = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND_MS,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "week" | "weeks" => 7 * DAY_MS,
        "mon" | "month" | "months" => 30 * DAY_MS,
        "y" | "year" | "years" => 365 * DAY_MS,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(unit_ms)
        .map(|ms| sign * ms)
        .ok_or_else(invalid)
}

/// Multiply every value by `factor`
pub fn scale(list: SeriesList, factor: f64) -> SeriesList {
    list.map(|mut s| {
        for dp in &mut s.datapoints {
            dp.value *= factor;
        }
        s.specification = format!("scale({},{})", s.specification, factor);
        s
    })
}

/// Consolidate every series into epoch-aligned buckets of `interval`
pub fn summarize(list: SeriesList, interval: &str, func: &str) -> QueryResult<SeriesList> {
    let bucket_ms = parse_interval(interval)?;
    if bucket_ms <= 0 {
        return Err(QueryError::validation(format!(
            "summarize: interval '{}' must be positive",
            interval
        )));
    }
    let approach: ConsolidationApproach = func
        .parse()
        .map_err(|e: String| QueryError::validation(format!("summarize: {}", e)))?;

    Ok(list.map(|s| {
        let mut datapoints: Vec<Datapoint> = Vec::new();
        let mut bucket: Vec<f64> = Vec::new();
        let mut current: Option<i64> = None;
        for dp in &s.datapoints {
            let start = dp.timestamp.saturating_sub(dp.timestamp.rem_euclid(bucket_ms));
            if let Some(c) = current.filter(|&c| c != start) {
                datapoints.push(Datapoint::new(c, approach.consolidate(&bucket)));
                bucket.clear();
            }
            current = Some(start);
            bucket.push(dp.value);
        }
        if let Some(c) = current {
            datapoints.push(Datapoint::new(c, approach.consolidate(&bucket)));
        }

        Series {
            specification: format!("summarize({},\"{}\",\"{}\")", s.specification, interval, func),
            id: s.id,
            datapoints,
        }
    }))
}

/// Evaluate the series `shift` earlier and move the result back onto the
/// query window
///
/// An unsigned shift moves back in time, `+1h` moves forward.
pub fn time_shift(shift: &str) -> QueryResult<ContextShift> {
    let amount = parse_interval(shift)?;
    let offset = if shift.trim_start().starts_with('+') {
        amount
    } else {
        -amount.abs()
    };
    let label = shift.to_string();

    Ok(ContextShift::unary(
        move |ctx| ctx.shifted(offset),
        move |list| {
            list.try_map(|mut s| {
                for dp in &mut s.datapoints {
                    dp.timestamp = dp.timestamp.checked_sub(offset).ok_or_else(|| {
                        QueryError::execution(format!(
                            "timeShift: datapoint at {} cannot be moved by {}ms",
                            dp.timestamp, offset
                        ))
                    })?;
                }
                s.specification = format!("timeShift({},\"{}\")", s.specification, label);
                Ok(s)
            })
        },
    ))
}

/// Average over the trailing `window` at every datapoint
///
/// The series is evaluated once over the query window and once over a
/// window extended back by `window`, so the first points have full history.
pub fn moving_average(window: &str) -> QueryResult<ContextShift> {
    let window_ms = parse_interval(window)?.abs();
    if window_ms == 0 {
        return Err(QueryError::validation(format!(
            "movingAverage: window '{}' must be non-zero",
            window
        )));
    }
    let label = window.to_string();
    let label_for_errors = label.clone();

    Ok(ContextShift::binary(
        move |ctx| {
            let start = ctx.start.checked_sub(window_ms).ok_or_else(|| {
                QueryError::validation(format!(
                    "movingAverage: window '{}' reaches before the timestamp range",
                    label_for_errors
                ))
            })?;
            ctx.with_range(start, ctx.end)
        },
        move |original, extended| {
            let history: HashMap<String, Series> =
                extended.into_iter().map(|s| (s.id.clone(), s)).collect();
            Ok(original.map(|s| {
                let datapoints = match history.get(&s.id) {
                    Some(h) => trailing_average(&s.datapoints, &h.datapoints, window_ms),
                    None => trailing_average(&s.datapoints, &s.datapoints, window_ms),
                };
                Series {
                    specification: format!("movingAverage({},\"{}\")", s.specification, label),
                    id: s.id,
                    datapoints,
                }
            }))
        },
    ))
}

/// For every point at `t`, the mean of non-NaN `history` values in
/// `(t - window, t]`. Both inputs must be time-ordered.
fn trailing_average(points: &[Datapoint], history: &[Datapoint], window: i64) -> Vec<Datapoint> {
    let mut out = Vec::with_capacity(points.len());
    let (mut lo, mut hi) = (0, 0);
    let (mut sum, mut count) = (0.0, 0usize);

    for p in points {
        while hi < history.len() && history[hi].timestamp <= p.timestamp {
            if !history[hi].value.is_nan() {
                sum += history[hi].value;
                count += 1;
            }
            hi += 1;
        }
        while lo < hi && history[lo].timestamp <= p.timestamp.saturating_sub(window) {
            if !history[lo].value.is_nan() {
                sum -= history[lo].value;
                count -= 1;
            }
            lo += 1;
        }
        let value = if count == 0 { f64::NAN } else { sum / count as f64 };
        out.push(Datapoint::new(p.timestamp, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    fn series(id: &str, points: &[(i64, f64)]) -> Series {
        Series::new(id, points.iter().map(|&(t, v)| Datapoint::new(t, v)).collect())
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s").unwrap(), 30_000);
        assert_eq!(parse_interval("5min").unwrap(), 300_000);
        assert_eq!(parse_interval("5m").unwrap(), 300_000);
        assert_eq!(parse_interval("-1h").unwrap(), -HOUR_MS);
        assert_eq!(parse_interval("+2d").unwrap(), 2 * DAY_MS);
        assert_eq!(parse_interval("1w").unwrap(), 7 * DAY_MS);
        assert_eq!(parse_interval("1mon").unwrap(), 30 * DAY_MS);

        for bad in ["", "h", "10", "1fortnight", "--1h", "1.5h"] {
            let err = parse_interval(bad).unwrap_err();
            assert_eq!(err.kind, QueryErrorKind::ValidationError, "{}", bad);
        }
    }

    #[test]
    fn test_scale() {
        let out = scale(vec![series("a", &[(0, 1.0), (1, f64::NAN)])].into(), 2.5);
        let s = &out.values[0];
        assert_eq!(s.datapoints[0].value, 2.5);
        assert!(s.datapoints[1].value.is_nan());
        assert_eq!(s.specification, "scale(a,2.5)");
    }

    #[test]
    fn test_summarize_buckets() {
        let input = series(
            "a",
            &[(0, 1.0), (30_000, 2.0), (60_000, f64::NAN), (90_000, 4.0), (150_000, 5.0)],
        );
        let out = summarize(vec![input.clone()].into(), "1min", "sum").unwrap();
        let values: Vec<(i64, f64)> = out.values[0]
            .datapoints
            .iter()
            .map(|dp| (dp.timestamp, dp.value))
            .collect();
        assert_eq!(values, vec![(0, 3.0), (60_000, 4.0), (120_000, 5.0)]);

        let out = summarize(vec![input].into(), "1min", "max").unwrap();
        assert_eq!(out.values[0].datapoints[0].value, 2.0);
        assert_eq!(out.values[0].specification, "summarize(a,\"1min\",\"max\")");
    }

    #[test]
    fn test_summarize_rejects_bad_arguments() {
        let list = || SeriesList::from(vec![series("a", &[(0, 1.0)])]);
        assert!(summarize(list(), "0s", "sum").is_err());
        assert!(summarize(list(), "-1h", "sum").is_err());
        assert!(summarize(list(), "1h", "median").is_err());
    }

    #[test]
    fn test_time_shift_moves_timestamps_forward() {
        let shift = time_shift("1h").unwrap();
        let ContextShift::Unary { transform, .. } = shift else {
            panic!("timeShift must be unary");
        };
        let out = transform(vec![series("a", &[(0, 1.0)])].into()).unwrap();
        assert_eq!(out.values[0].datapoints[0].timestamp, HOUR_MS);
        assert_eq!(out.values[0].specification, "timeShift(a,\"1h\")");
    }

    #[test]
    fn test_trailing_average() {
        let history = [
            Datapoint::new(0, 1.0),
            Datapoint::new(10, 2.0),
            Datapoint::new(20, f64::NAN),
            Datapoint::new(30, 6.0),
        ];
        let out = trailing_average(&history[1..], &history, 20);
        let values: Vec<f64> = out.iter().map(|dp| dp.value).collect();
        // (-10, 10] = {1, 2}; (0, 20] = {2}; (10, 30] = {6}
        assert_eq!(values, vec![1.5, 2.0, 6.0]);
    }

    #[test]
    fn test_moving_average_combines_history() {
        let err = moving_average("20ms").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let ContextShift::Binary { transform, .. } = moving_average("2min").unwrap() else {
            panic!("movingAverage must be binary");
        };
        let original = series("a", &[(120_000, 3.0), (180_000, 5.0)]);
        let extended = series("a", &[(60_000, 1.0), (120_000, 3.0), (180_000, 5.0)]);
        let out = transform(vec![original].into(), vec![extended].into()).unwrap();
        let values: Vec<f64> = out.values[0].values().collect();
        assert_eq!(values, vec![2.0, 4.0]);
        assert_eq!(out.values[0].specification, "movingAverage(a,\"2min\")");
    }

    #[test]
    fn test_shifters_reject_windows_outside_timestamp_range() {
        use crate::query::context::QueryContext;
        use crate::query::storage::{ConsolidatingStorage, MemoryBlockSource};
        use std::sync::Arc;

        let storage = Arc::new(ConsolidatingStorage::new(MemoryBlockSource::new()));
        let ctx = QueryContext::new(storage, i64::MIN + MINUTE_MS, i64::MIN + 2 * MINUTE_MS);

        let ContextShift::Binary { shift, .. } = moving_average("1h").unwrap() else {
            panic!("movingAverage must be binary");
        };
        let err = shift(&ctx).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        let ContextShift::Unary { shift, transform } = time_shift("-1h").unwrap() else {
            panic!("timeShift must be unary");
        };
        let err = shift(&ctx).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);

        // Datapoints that cannot be moved back onto the window fail the call
        let err = transform(vec![series("a", &[(i64::MAX - 1, 1.0)])].into()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ExecutionError);
    }
}
