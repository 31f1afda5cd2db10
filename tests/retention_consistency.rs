//! Retention resolver properties
//!
//! The fast shape classifier behind `find_consolidation_approach` and the
//! regex rule table behind `find_retention_policy` are maintained
//! separately; these tests keep them in agreement over identifiers built
//! from the segments that matter to either side.

use kuba_graphite::config::RetentionConfig;
use kuba_graphite::retention::{classify, ConsolidationApproach, MetricClass, RetentionResolver};
use proptest::prelude::*;
use std::time::Duration;

const DAY_SECS: u64 = 24 * 3600;

fn segment() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("stats"),
        Just("statsdex"),
        Just("counts"),
        Just("timers"),
        Just("count"),
        Just("dca1"),
        Just("m3+db"),
        Just("x"),
        Just("a\nb"),
        Just(""),
    ]
}

fn identifier() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..7).prop_map(|segments| segments.join("."))
}

fn resolver() -> RetentionResolver {
    RetentionResolver::from_config(&RetentionConfig::default()).unwrap()
}

#[test]
fn test_known_shapes_agree() {
    let resolver = resolver();
    let hour = Duration::from_secs(3600);
    for (id, approach) in [
        ("stats.counts.api.requests", ConsolidationApproach::Sum),
        ("stats.dca1.counts.api.requests", ConsolidationApproach::Sum),
        ("stats.timers.api.latency.count", ConsolidationApproach::Sum),
        ("stats.timers.api.latency.p99", ConsolidationApproach::Avg),
        ("stats.gauges.queue.depth", ConsolidationApproach::Avg),
        ("statsdex.counts.api", ConsolidationApproach::Avg),
        ("servers.web01.cpu", ConsolidationApproach::Avg),
        ("m3+db.commitlog.writes", ConsolidationApproach::Avg),
        ("stats.timers.api\nlatency.count", ConsolidationApproach::Sum),
    ] {
        assert_eq!(resolver.find_consolidation_approach(id), approach, "{}", id);
        assert_eq!(resolver.find_retention_policy(id, hour).consolidation, approach, "{}", id);
    }
}

#[test]
fn test_step_widens_with_age() {
    let resolver = resolver();
    let id = "stats.counts.api.requests";
    let steps: Vec<u64> = [1, 30, 200]
        .iter()
        .map(|days| {
            resolver
                .find_retention_policy(id, Duration::from_secs(days * DAY_SECS))
                .unit_per_step
                .as_secs()
        })
        .collect();
    assert_eq!(steps, vec![10, 60, 600]);
}

proptest! {
    // Every default rule has a policy beyond 89 days, so within that horizon
    // resolution never falls through to a rule of another class
    #[test]
    fn classifier_agrees_with_rule_table(id in identifier(), age_secs in 0u64..(89 * DAY_SECS)) {
        let resolver = resolver();
        let policy = resolver.find_retention_policy(&id, Duration::from_secs(age_secs));
        prop_assert_eq!(
            policy.consolidation,
            resolver.find_consolidation_approach(&id),
            "id {:?}",
            id
        );
    }

    #[test]
    fn first_matching_rule_decides_class(id in identifier()) {
        let resolver = resolver();
        let class = classify(&id, "m3+");
        if class == MetricClass::System {
            return Ok(());
        }
        if let Some(rule) = resolver.rules().iter().find(|r| r.pattern().is_match(&id)) {
            for policy in rule.policies() {
                prop_assert_eq!(policy.consolidation, class.consolidation(), "id {:?}", id);
            }
        } else {
            prop_assert_eq!(class, MetricClass::Other);
        }
    }

    #[test]
    fn resolution_prefers_unexpired_policy_of_matched_rule(
        id in identifier(),
        age_secs in 0u64..(400 * DAY_SECS),
    ) {
        let resolver = resolver();
        let age = Duration::from_secs(age_secs);
        let policy = resolver.find_retention_policy(&id, age);

        if classify(&id, "m3+") == MetricClass::System {
            return Ok(());
        }
        let matched = resolver.rules().iter().find(|r| r.pattern().is_match(&id));
        if let Some(expected) = matched.and_then(|r| r.policies().iter().find(|p| age < p.ttl)) {
            prop_assert_eq!(policy, expected);
            prop_assert!(policy.ttl > age);
        }
    }
}
