//! Excessive retention
//!
//! Flags plans that keep more history than is healthy for the server:
//!
//! | Threshold | Default | Compared with |
//! |-----------|---------|---------------|
//! | `max_results` | 1000 | retained result count (policy-independent ceiling) |
//! | `max_age_days` | 365 | age of the oldest retained result |
//! | `overrun_ratio` | 1.0 | retained volume relative to the plan's own policy |
//!
//! Plans with "keep forever" semantics have an overrun ratio of zero but
//! are still held to the hard ceilings.

use super::{Breach, FindingKind, HealthRule, ResolvedRule, ThresholdSpec};
use crate::analytics::aggregate::PlanMetrics;
use crate::format::format_age;

pub const MAX_RESULTS: &str = "max_results";
pub const MAX_AGE_DAYS: &str = "max_age_days";
pub const OVERRUN_RATIO: &str = "overrun_ratio";

const THRESHOLDS: &[ThresholdSpec] = &[
    ThresholdSpec {
        name: MAX_RESULTS,
        default: 1000.0,
        summary: "Retained results allowed regardless of policy.",
    },
    ThresholdSpec {
        name: MAX_AGE_DAYS,
        default: 365.0,
        summary: "Age in days of the oldest result allowed regardless of policy.",
    },
    ThresholdSpec {
        name: OVERRUN_RATIO,
        default: 1.0,
        summary: "Retained volume allowed relative to the plan's retention policy.",
    },
];

pub struct ExcessiveRetention;

impl HealthRule for ExcessiveRetention {
    fn kind(&self) -> FindingKind {
        FindingKind::ExcessiveRetention
    }

    fn thresholds(&self) -> &'static [ThresholdSpec] {
        THRESHOLDS
    }

    fn default_weight(&self) -> f64 {
        2.0
    }

    fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach> {
        let mut breaches = Vec::new();

        let max_results = rule.threshold(MAX_RESULTS);
        let count = metrics.result_count as f64;
        if count > max_results {
            breaches.push(Breach {
                metric: "result_count",
                observed: count,
                threshold: max_results,
                rationale: format!(
                    "retains {} results, above the ceiling of {}",
                    metrics.result_count, max_results
                ),
            });
        }

        let max_age_days = rule.threshold(MAX_AGE_DAYS);
        let oldest_days = metrics.oldest_age_days();
        if oldest_days > max_age_days {
            breaches.push(Breach {
                metric: "oldest_result_age_secs",
                observed: oldest_days,
                threshold: max_age_days,
                rationale: format!(
                    "oldest retained result is {} old, above the ceiling of {} days",
                    format_age(metrics.oldest_result_age_secs.unwrap_or(0)),
                    max_age_days
                ),
            });
        }

        let max_ratio = rule.threshold(OVERRUN_RATIO);
        let retention = &metrics.retention;
        if retention.overrun_ratio > max_ratio {
            breaches.push(Breach {
                metric: "retention.overrun_ratio",
                observed: retention.overrun_ratio,
                threshold: max_ratio,
                rationale: format!(
                    "retains {:.1}x what its retention policy allows ({} results over the count limit, {} over the age limit)",
                    retention.overrun_ratio, retention.excess_results, retention.results_beyond_age
                ),
            });
        }

        breaches
    }
}
