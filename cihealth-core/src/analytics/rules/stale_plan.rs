//! Stale plans
//!
//! A plan with no new result for `max_idle_days` (default 90) that still
//! retains at least `min_retained_bytes` (default 100 MiB) of artifacts is
//! dead weight. Plans without results are never stale.

use super::{Breach, FindingKind, HealthRule, ResolvedRule, ThresholdSpec};
use crate::analytics::aggregate::PlanMetrics;
use crate::format::{format_age, format_bytes};

pub const MAX_IDLE_DAYS: &str = "max_idle_days";
pub const MIN_RETAINED_BYTES: &str = "min_retained_bytes";

const THRESHOLDS: &[ThresholdSpec] = &[
    ThresholdSpec {
        name: MAX_IDLE_DAYS,
        default: 90.0,
        summary: "Days without a new result before a plan counts as idle.",
    },
    ThresholdSpec {
        name: MIN_RETAINED_BYTES,
        default: 104_857_600.0,
        summary: "Artifact bytes an idle plan must retain to be flagged.",
    },
];

pub struct StalePlan;

impl HealthRule for StalePlan {
    fn kind(&self) -> FindingKind {
        FindingKind::StalePlan
    }

    fn thresholds(&self) -> &'static [ThresholdSpec] {
        THRESHOLDS
    }

    fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach> {
        let Some(idle_days) = metrics.idle_days() else {
            return vec![];
        };
        let max_idle_days = rule.threshold(MAX_IDLE_DAYS);
        let min_retained = rule.threshold(MIN_RETAINED_BYTES);

        if idle_days <= max_idle_days || (metrics.total_artifact_bytes as f64) < min_retained {
            return vec![];
        }

        vec![Breach {
            metric: "newest_result_age_secs",
            observed: idle_days,
            threshold: max_idle_days,
            rationale: format!(
                "no new result for {} while retaining {}",
                format_age(metrics.newest_result_age_secs.unwrap_or(0)),
                format_bytes(metrics.total_artifact_bytes)
            ),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::aggregate::RetentionState;
    use crate::analytics::rules::RuleSet;

    fn rule() -> ResolvedRule {
        RuleSet::with_defaults()
            .get(FindingKind::StalePlan)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_idle_plan_with_large_artifacts_is_stale() {
        let mut metrics = PlanMetrics::empty("p1", RetentionState::NoPolicy);
        metrics.result_count = 3;
        metrics.newest_result_age_secs = Some(180 * 86_400);
        metrics.total_artifact_bytes = 500 * 1024 * 1024;

        let breaches = StalePlan.evaluate(&metrics, &rule());
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].normalized_excess(), 1.0);
    }

    #[test]
    fn test_idle_plan_with_little_data_is_not_stale() {
        let mut metrics = PlanMetrics::empty("p1", RetentionState::NoPolicy);
        metrics.result_count = 3;
        metrics.newest_result_age_secs = Some(180 * 86_400);
        metrics.total_artifact_bytes = 1024;
        assert!(StalePlan.evaluate(&metrics, &rule()).is_empty());
    }

    #[test]
    fn test_plan_without_results_is_not_stale() {
        let metrics = PlanMetrics::empty("p1", RetentionState::NoPolicy);
        assert!(StalePlan.evaluate(&metrics, &rule()).is_empty());
    }
}
