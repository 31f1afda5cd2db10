//! Fast identifier-shape classification
//!
//! Aggregated metrics follow the `stats[.<dc>].<type>.<rest>` convention,
//! where `<type>` is for example `counts` or `timers`. Recognising the shape by
//! splitting on `.` avoids running the retention regexes for the common case.
//!
//! Every class here must agree with the default rule table in
//! [`RetentionConfig`](crate::config::RetentionConfig): a new shape added on
//! one side has to be mirrored on the other.

use super::ConsolidationApproach;

/// Root segment of aggregated metrics
const AGGREGATED_ROOT: &str = "stats";
const COUNTS: &str = "counts";
const TIMERS: &str = "timers";
const TIMER_COUNT_LEAF: &str = "count";

/// Class of a metric identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricClass {
    /// Internal server metric carrying the reserved system prefix
    System,
    /// Aggregated counter, summed on consolidation
    Counts,
    /// Count leaf of an aggregated timer, summed on consolidation
    TimerCount,
    /// Anything else
    Other,
}

impl MetricClass {
    /// Consolidation approach implied by the class
    pub fn consolidation(self) -> ConsolidationApproach {
        match self {
            MetricClass::Counts | MetricClass::TimerCount => ConsolidationApproach::Sum,
            MetricClass::System | MetricClass::Other => ConsolidationApproach::Avg,
        }
    }
}

/// Whether `id` carries the reserved system prefix
#[inline]
pub fn is_system(id: &str, system_prefix: &str) -> bool {
    !system_prefix.is_empty() && id.starts_with(system_prefix)
}

/// Classify `id` without regular expressions
pub fn classify(id: &str, system_prefix: &str) -> MetricClass {
    if is_system(id, system_prefix) {
        return MetricClass::System;
    }

    let mut segments = id.split('.');
    if segments.next() != Some(AGGREGATED_ROOT) {
        return MetricClass::Other;
    }
    let rest: Vec<&str> = segments.collect();

    // The type segment sits right after the root, or after an optional
    // non-empty datacenter segment
    let type_at = |pos: usize| -> bool { pos == 0 || !rest[0].is_empty() };

    for (pos, segment) in rest.iter().enumerate().take(2) {
        // counts needs at least one segment after it
        if *segment == COUNTS && type_at(pos) && rest.len() > pos + 1 {
            return MetricClass::Counts;
        }
    }
    for (pos, segment) in rest.iter().enumerate().take(2) {
        // timers needs a metric segment and the count leaf after it
        if *segment == TIMERS
            && type_at(pos)
            && rest.len() > pos + 2
            && rest.last() == Some(&TIMER_COUNT_LEAF)
        {
            return MetricClass::TimerCount;
        }
    }

    MetricClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "m3+";

    #[test]
    fn test_system_prefix() {
        assert_eq!(classify("m3+db.commitlog.writes", PREFIX), MetricClass::System);
        assert_eq!(classify("m3+db.commitlog.writes", ""), MetricClass::Other);
    }

    #[test]
    fn test_counts() {
        assert_eq!(classify("stats.counts.api.requests", PREFIX), MetricClass::Counts);
        assert_eq!(classify("stats.dca1.counts.api.requests", PREFIX), MetricClass::Counts);
        assert_eq!(classify("stats.counts", PREFIX), MetricClass::Other);
        assert_eq!(classify("stats.a.b.counts.x", PREFIX), MetricClass::Other);
    }

    #[test]
    fn test_timer_count() {
        assert_eq!(classify("stats.timers.api.latency.count", PREFIX), MetricClass::TimerCount);
        assert_eq!(classify("stats.dca1.timers.api.count", PREFIX), MetricClass::TimerCount);
        assert_eq!(classify("stats.timers.api.latency.p99", PREFIX), MetricClass::Other);
        assert_eq!(classify("stats.timers.count", PREFIX), MetricClass::Other);
    }

    #[test]
    fn test_other_shapes() {
        assert_eq!(classify("servers.web01.cpu", PREFIX), MetricClass::Other);
        assert_eq!(classify("statsdex.counts.x", PREFIX), MetricClass::Other);
        assert_eq!(classify("", PREFIX), MetricClass::Other);
    }

    #[test]
    fn test_class_consolidation() {
        assert_eq!(MetricClass::Counts.consolidation(), ConsolidationApproach::Sum);
        assert_eq!(MetricClass::TimerCount.consolidation(), ConsolidationApproach::Sum);
        assert_eq!(MetricClass::Other.consolidation(), ConsolidationApproach::Avg);
    }
}
