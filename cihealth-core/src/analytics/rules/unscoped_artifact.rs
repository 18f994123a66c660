//! Unscoped artifact patterns
//!
//! An artifact whose declared copy pattern is too broad to size means the
//! plan does not know what it is archiving. Trips when the plan's
//! unresolved artifact count exceeds `max_unresolved` (default 0).

use super::{Breach, FindingKind, HealthRule, ResolvedRule, ThresholdSpec};
use crate::analytics::aggregate::PlanMetrics;

pub const MAX_UNRESOLVED: &str = "max_unresolved";

const THRESHOLDS: &[ThresholdSpec] = &[ThresholdSpec {
    name: MAX_UNRESOLVED,
    default: 0.0,
    summary: "Artifacts with undeterminable size allowed per plan.",
}];

pub struct UnscopedArtifactPattern;

impl HealthRule for UnscopedArtifactPattern {
    fn kind(&self) -> FindingKind {
        FindingKind::UnscopedArtifactPattern
    }

    fn thresholds(&self) -> &'static [ThresholdSpec] {
        THRESHOLDS
    }

    fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach> {
        let max_unresolved = rule.threshold(MAX_UNRESOLVED);
        let unresolved = metrics.unresolved_artifact_count as f64;
        if unresolved <= max_unresolved {
            return vec![];
        }

        vec![Breach {
            metric: "unresolved_artifact_count",
            observed: unresolved,
            threshold: max_unresolved,
            rationale: format!(
                "{} of {} artifacts have patterns too broad to size",
                metrics.unresolved_artifact_count, metrics.artifact_count
            ),
        }]
    }
}
