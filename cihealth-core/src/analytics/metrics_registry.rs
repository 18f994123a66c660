//! Metrics registry for discovery and documentation.
//!
//! Describes every supporting metric carried by a report entry so renderers
//! can label values without knowing [`PlanMetrics`](super::PlanMetrics).

/// Unit of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
    Bytes,
    Seconds,
    Milliseconds,
    Ratio,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Count => "count",
            MetricUnit::Bytes => "bytes",
            MetricUnit::Seconds => "seconds",
            MetricUnit::Milliseconds => "milliseconds",
            MetricUnit::Ratio => "ratio",
        }
    }
}

/// Descriptor for a supporting metric.
#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub unit: MetricUnit,
    pub summary: &'static str,
}

const PLAN_METRICS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "result_count",
        unit: MetricUnit::Count,
        summary: "Retained build results.",
    },
    MetricDescriptor {
        name: "success_count",
        unit: MetricUnit::Count,
        summary: "Retained successful results.",
    },
    MetricDescriptor {
        name: "failure_count",
        unit: MetricUnit::Count,
        summary: "Retained failed results.",
    },
    MetricDescriptor {
        name: "oldest_result_age_secs",
        unit: MetricUnit::Seconds,
        summary: "Age of the oldest retained result at the reference time.",
    },
    MetricDescriptor {
        name: "newest_result_age_secs",
        unit: MetricUnit::Seconds,
        summary: "Age of the newest retained result at the reference time.",
    },
    MetricDescriptor {
        name: "total_duration_ms",
        unit: MetricUnit::Milliseconds,
        summary: "Summed build duration of retained results.",
    },
    MetricDescriptor {
        name: "mean_duration_ms",
        unit: MetricUnit::Milliseconds,
        summary: "Mean build duration of retained results.",
    },
    MetricDescriptor {
        name: "artifact_count",
        unit: MetricUnit::Count,
        summary: "Artifacts attached to retained results.",
    },
    MetricDescriptor {
        name: "total_artifact_bytes",
        unit: MetricUnit::Bytes,
        summary: "Sum of known artifact sizes.",
    },
    MetricDescriptor {
        name: "total_artifact_files",
        unit: MetricUnit::Count,
        summary: "Files the sized artifacts expand to.",
    },
    MetricDescriptor {
        name: "unresolved_artifact_count",
        unit: MetricUnit::Count,
        summary: "Artifacts whose size could not be determined.",
    },
    MetricDescriptor {
        name: "largest_artifact_bytes",
        unit: MetricUnit::Bytes,
        summary: "Largest known artifact size.",
    },
    MetricDescriptor {
        name: "oversized_artifact_count",
        unit: MetricUnit::Count,
        summary: "Artifacts individually above the oversized rule's max_bytes.",
    },
    MetricDescriptor {
        name: "retention.excess_results",
        unit: MetricUnit::Count,
        summary: "Results beyond the policy's count limit.",
    },
    MetricDescriptor {
        name: "retention.results_beyond_age",
        unit: MetricUnit::Count,
        summary: "Results older than the policy's age limit.",
    },
    MetricDescriptor {
        name: "retention.overrun_ratio",
        unit: MetricUnit::Ratio,
        summary: "Retained volume relative to the policy; zero for keep-forever plans.",
    },
];

/// Return all supporting metric descriptors.
pub fn all_metrics() -> &'static [MetricDescriptor] {
    PLAN_METRICS
}

/// Find a metric descriptor by name.
pub fn find_metric(name: &str) -> Option<&'static MetricDescriptor> {
    PLAN_METRICS.iter().find(|metric| metric.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::rules::built_in_rules;

    #[test]
    fn test_metric_names_are_unique() {
        let mut names: Vec<_> = all_metrics().iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), all_metrics().len());
    }

    #[test]
    fn test_find_metric() {
        let metric = find_metric("total_artifact_bytes").unwrap();
        assert_eq!(metric.unit, MetricUnit::Bytes);
        assert!(find_metric("tokens_in").is_none());
    }

    #[test]
    fn test_rule_breaches_reference_registered_metrics() {
        use crate::analytics::aggregate::{PlanMetrics, RetentionState};
        use crate::analytics::rules::RuleSet;

        let mut plan = PlanMetrics::empty("p1", RetentionState::NoPolicy);
        plan.result_count = 5000;
        plan.oldest_result_age_secs = Some(1000 * 86_400);
        plan.newest_result_age_secs = Some(900 * 86_400);
        plan.total_artifact_bytes = u64::MAX / 2;
        plan.largest_artifact_bytes = u64::MAX / 2;
        plan.unresolved_artifact_count = 3;
        plan.retention.overrun_ratio = 50.0;

        let rules = RuleSet::with_defaults();
        for (rule, resolved) in rules.iter() {
            for breach in rule.evaluate(&plan, resolved) {
                assert!(
                    find_metric(breach.metric).is_some(),
                    "{} is not registered",
                    breach.metric
                );
            }
        }
        assert_eq!(built_in_rules().len(), rules.len());
    }
}
