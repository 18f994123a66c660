//! Oversized artifacts
//!
//! Compares known artifact bytes against `max_bytes` (default 2 GiB). With
//! the default `plan-total` scope the plan's summed artifact bytes are
//! compared; with `scope = "per-artifact"` the largest single artifact is.
//! Unresolved sizes never contribute, so a plan with only unresolved
//! artifacts is compared with a total of zero.

use super::{Breach, FindingKind, HealthRule, ResolvedRule, SizeScope, ThresholdSpec};
use crate::analytics::aggregate::PlanMetrics;
use crate::format::format_bytes;

pub const MAX_BYTES: &str = "max_bytes";

const THRESHOLDS: &[ThresholdSpec] = &[ThresholdSpec {
    name: MAX_BYTES,
    default: 2_147_483_648.0,
    summary: "Artifact bytes allowed (plan total or per artifact, depending on scope).",
}];

pub struct OversizedArtifactTotal;

impl HealthRule for OversizedArtifactTotal {
    fn kind(&self) -> FindingKind {
        FindingKind::OversizedArtifactTotal
    }

    fn thresholds(&self) -> &'static [ThresholdSpec] {
        THRESHOLDS
    }

    fn default_weight(&self) -> f64 {
        2.0
    }

    fn supports_scope(&self) -> bool {
        true
    }

    fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach> {
        let max_bytes = rule.threshold(MAX_BYTES);

        let breach = match rule.scope {
            SizeScope::PlanTotal => {
                let total = metrics.total_artifact_bytes as f64;
                (total > max_bytes).then(|| Breach {
                    metric: "total_artifact_bytes",
                    observed: total,
                    threshold: max_bytes,
                    rationale: format!(
                        "retains {} of artifacts across {} results, above the ceiling of {}",
                        format_bytes(metrics.total_artifact_bytes),
                        metrics.result_count,
                        format_bytes(max_bytes as u64)
                    ),
                })
            }
            SizeScope::PerArtifact => {
                let largest = metrics.largest_artifact_bytes as f64;
                (largest > max_bytes).then(|| Breach {
                    metric: "largest_artifact_bytes",
                    observed: largest,
                    threshold: max_bytes,
                    rationale: format!(
                        "{} artifacts exceed {} (largest {})",
                        metrics.oversized_artifact_count,
                        format_bytes(max_bytes as u64),
                        format_bytes(metrics.largest_artifact_bytes)
                    ),
                })
            }
        };

        breach.into_iter().collect()
    }
}
