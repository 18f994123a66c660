//! Per-plan aggregation
//!
//! Groups build results and artifacts by owning plan and derives one
//! [`PlanMetrics`] record per plan. Aggregation is a pure function of the
//! snapshot and the injected reference time.
//!
//! ## Metrics Produced
//!
//! | Metric | Description |
//! |--------|-------------|
//! | `result_count` | Retained build results |
//! | `oldest_result_age_secs` / `newest_result_age_secs` | Ages against the reference time |
//! | `total_artifact_bytes` | Sum of known artifact sizes |
//! | `unresolved_artifact_count` | Artifacts whose size could not be determined |
//! | `retention.overrun_ratio` | Retained volume relative to the plan's policy |
//!
//! See [`metrics_registry`](super::metrics_registry) for the full list.

use crate::error::{Error, Result};
use crate::types::{
    ArtifactSize, BuildResult, BuildStatus, RetentionPolicy, RetentionRule, Snapshot,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const SECS_PER_DAY: f64 = 86_400.0;

/// Retention intent a plan declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionState {
    /// The plan references no retention policy
    NoPolicy,
    /// Results never expire
    KeepForever,
    /// Results expire beyond a count and/or an age
    Expire {
        max_results: Option<u64>,
        max_age_days: Option<u64>,
    },
}

/// Retained volume compared with the declared policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionMetrics {
    pub policy: RetentionState,
    /// Results beyond the count limit
    pub excess_results: u64,
    /// Results older than the age limit
    pub results_beyond_age: u64,
    /// Largest of retained/limit over the count and age limits; zero when
    /// nothing is limited or nothing is retained
    pub overrun_ratio: f64,
}

impl RetentionMetrics {
    fn none(policy: RetentionState) -> Self {
        Self {
            policy,
            excess_results: 0,
            results_beyond_age: 0,
            overrun_ratio: 0.0,
        }
    }
}

/// Aggregated statistics for one build plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanMetrics {
    pub plan_id: String,
    pub result_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub oldest_result_age_secs: Option<i64>,
    pub newest_result_age_secs: Option<i64>,
    pub total_duration_ms: u64,
    pub mean_duration_ms: u64,
    pub artifact_count: u64,
    pub total_artifact_bytes: u64,
    pub total_artifact_files: u64,
    pub unresolved_artifact_count: u64,
    pub largest_artifact_bytes: u64,
    pub oversized_artifact_count: u64,
    pub retention: RetentionMetrics,
}

impl PlanMetrics {
    /// Metrics record for a plan with nothing retained.
    pub fn empty(plan_id: &str, policy: RetentionState) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            result_count: 0,
            success_count: 0,
            failure_count: 0,
            oldest_result_age_secs: None,
            newest_result_age_secs: None,
            total_duration_ms: 0,
            mean_duration_ms: 0,
            artifact_count: 0,
            total_artifact_bytes: 0,
            total_artifact_files: 0,
            unresolved_artifact_count: 0,
            largest_artifact_bytes: 0,
            oversized_artifact_count: 0,
            retention: RetentionMetrics::none(policy),
        }
    }

    /// Age of the oldest retained result in (fractional) days.
    pub fn oldest_age_days(&self) -> f64 {
        self.oldest_result_age_secs
            .map(|secs| secs as f64 / SECS_PER_DAY)
            .unwrap_or(0.0)
    }

    /// Days since the newest result, if the plan has any.
    pub fn idle_days(&self) -> Option<f64> {
        self.newest_result_age_secs
            .map(|secs| secs as f64 / SECS_PER_DAY)
    }
}

/// Computes [`PlanMetrics`] for every plan in a snapshot.
pub struct Aggregator {
    now: DateTime<Utc>,
    artifact_ceiling: Option<u64>,
}

impl Aggregator {
    /// Create an aggregator measuring ages against `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            artifact_ceiling: None,
        }
    }

    /// Count artifacts larger than `bytes` in `oversized_artifact_count`.
    /// With `None` the count stays zero.
    pub fn with_artifact_ceiling(mut self, bytes: Option<u64>) -> Self {
        self.artifact_ceiling = bytes;
        self
    }

    /// Aggregate a snapshot into metrics keyed by plan id.
    ///
    /// Every plan gets an entry. Dangling references between records, and
    /// artifact links that results and artifacts disagree on, fail with
    /// [`Error::Integrity`].
    pub fn aggregate(&self, snapshot: &Snapshot) -> Result<BTreeMap<String, PlanMetrics>> {
        let policies: HashMap<&str, &RetentionPolicy> = snapshot
            .policies
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();

        let mut metrics = BTreeMap::new();
        for plan in &snapshot.plans {
            let policy = match plan.retention_policy_id.as_deref() {
                None => RetentionState::NoPolicy,
                Some(policy_id) => {
                    let policy = policies.get(policy_id).ok_or_else(|| {
                        Error::Integrity(format!(
                            "plan {} references missing retention policy {}",
                            plan.id, policy_id
                        ))
                    })?;
                    match policy.rule {
                        RetentionRule::KeepForever => RetentionState::KeepForever,
                        RetentionRule::Expire {
                            max_results,
                            max_age_days,
                        } => RetentionState::Expire {
                            max_results,
                            max_age_days,
                        },
                    }
                }
            };
            metrics.insert(plan.id.clone(), PlanMetrics::empty(&plan.id, policy));
        }

        // Group results by plan, preserving insertion order.
        let mut results_by_plan: HashMap<&str, Vec<&BuildResult>> = HashMap::new();
        let mut result_owner: HashMap<&str, &BuildResult> = HashMap::new();
        for result in &snapshot.results {
            if !metrics.contains_key(&result.plan_id) {
                return Err(Error::Integrity(format!(
                    "result {} references missing plan {}",
                    result.id, result.plan_id
                )));
            }
            results_by_plan
                .entry(result.plan_id.as_str())
                .or_default()
                .push(result);
            result_owner.insert(result.id.as_str(), result);
        }

        // Join artifacts to their plan through the owning result.
        let mut artifact_owner: HashMap<&str, &str> = HashMap::new();
        for artifact in &snapshot.artifacts {
            let result = result_owner.get(artifact.result_id.as_str()).ok_or_else(|| {
                Error::Integrity(format!(
                    "artifact {} references missing result {}",
                    artifact.id, artifact.result_id
                ))
            })?;
            if !result.artifact_ids.contains(&artifact.id) {
                return Err(Error::Integrity(format!(
                    "artifact {} names result {}, which does not list it",
                    artifact.id, artifact.result_id
                )));
            }
            artifact_owner.insert(artifact.id.as_str(), artifact.result_id.as_str());

            let plan = metrics
                .get_mut(&result.plan_id)
                .ok_or_else(|| Error::Integrity(format!("plan {} vanished", result.plan_id)))?;
            plan.artifact_count += 1;
            match artifact.size {
                ArtifactSize::Known { bytes, files } => {
                    plan.total_artifact_bytes = plan.total_artifact_bytes.saturating_add(bytes);
                    plan.total_artifact_files = plan.total_artifact_files.saturating_add(files);
                    plan.largest_artifact_bytes = plan.largest_artifact_bytes.max(bytes);
                    if self.artifact_ceiling.is_some_and(|ceiling| bytes > ceiling) {
                        plan.oversized_artifact_count += 1;
                    }
                }
                ArtifactSize::Unresolved => plan.unresolved_artifact_count += 1,
            }
        }

        for result in &snapshot.results {
            for artifact_id in &result.artifact_ids {
                match artifact_owner.get(artifact_id.as_str()) {
                    Some(owner) if *owner == result.id => {}
                    Some(owner) => {
                        return Err(Error::Integrity(format!(
                            "result {} lists artifact {} owned by result {}",
                            result.id, artifact_id, owner
                        )))
                    }
                    None => {
                        return Err(Error::Integrity(format!(
                            "result {} references missing artifact {}",
                            result.id, artifact_id
                        )))
                    }
                }
            }
        }

        for (plan_id, results) in results_by_plan {
            if let Some(plan) = metrics.get_mut(plan_id) {
                self.apply_results(plan, &results);
            }
        }

        tracing::debug!(plans = metrics.len(), "Aggregated plan metrics");
        Ok(metrics)
    }

    fn apply_results(&self, plan: &mut PlanMetrics, results: &[&BuildResult]) {
        let ages: Vec<i64> = results
            .iter()
            .map(|r| (self.now - r.created_at).num_seconds().max(0))
            .collect();

        plan.result_count = results.len() as u64;
        plan.success_count = results
            .iter()
            .filter(|r| r.status == BuildStatus::Success)
            .count() as u64;
        plan.failure_count = results
            .iter()
            .filter(|r| r.status == BuildStatus::Failure)
            .count() as u64;
        plan.oldest_result_age_secs = ages.iter().copied().max();
        plan.newest_result_age_secs = ages.iter().copied().min();
        plan.total_duration_ms = results
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.duration_ms));
        if plan.result_count > 0 {
            plan.mean_duration_ms = plan.total_duration_ms / plan.result_count;
        }

        plan.retention = retention_overrun(plan.retention.policy, &ages);
    }
}

/// Compare retained results (given as ages in seconds) against a policy.
fn retention_overrun(policy: RetentionState, ages: &[i64]) -> RetentionMetrics {
    let (max_results, max_age_days) = match policy {
        RetentionState::Expire {
            max_results,
            max_age_days,
        } if !ages.is_empty() => (max_results, max_age_days),
        _ => return RetentionMetrics::none(policy),
    };

    let count = ages.len() as u64;
    let mut overrun_ratio: f64 = 0.0;
    let mut excess_results = 0;
    let mut results_beyond_age = 0;

    if let Some(limit) = max_results {
        excess_results = count.saturating_sub(limit);
        overrun_ratio = overrun_ratio.max(count as f64 / limit.max(1) as f64);
    }

    if let Some(days) = max_age_days {
        let limit_secs = days.saturating_mul(SECS_PER_DAY as u64);
        results_beyond_age = ages
            .iter()
            .filter(|age| (**age as u64) > limit_secs)
            .count() as u64;
        let oldest_days = ages.iter().copied().max().unwrap_or(0) as f64 / SECS_PER_DAY;
        overrun_ratio = overrun_ratio.max(oldest_days / days.max(1) as f64);
    }

    RetentionMetrics {
        policy,
        excess_results,
        results_beyond_age,
        overrun_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn plan(id: &str, policy: Option<&str>) -> BuildPlan {
        BuildPlan {
            id: id.to_string(),
            key: format!("PRJ-{}", id.to_uppercase()),
            name: id.to_string(),
            project_key: "PRJ".to_string(),
            kind: PlanKind::Chain,
            retention_policy_id: policy.map(str::to_string),
        }
    }

    fn result(id: &str, plan_id: &str, days_ago: i64, status: BuildStatus) -> BuildResult {
        BuildResult {
            id: id.to_string(),
            plan_id: plan_id.to_string(),
            status,
            created_at: now() - Duration::days(days_ago),
            duration_ms: 60_000,
            artifact_ids: vec![],
        }
    }

    fn artifact(id: &str, result_id: &str, size: ArtifactSize) -> Artifact {
        Artifact {
            id: id.to_string(),
            result_id: result_id.to_string(),
            name: id.to_string(),
            pattern: "target/*.jar".to_string(),
            size,
        }
    }

    fn keep(id: &str, max_results: Option<u64>, max_age_days: Option<u64>) -> RetentionPolicy {
        RetentionPolicy {
            id: id.to_string(),
            rule: RetentionRule::Expire {
                max_results,
                max_age_days,
            },
        }
    }

    #[test]
    fn test_plan_without_results_gets_zero_metrics() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", Some("rp1"))],
            policies: vec![keep("rp1", Some(10), None)],
            ..Default::default()
        };
        let metrics = Aggregator::new(now()).aggregate(&snapshot).unwrap();

        let p1 = &metrics["p1"];
        assert_eq!(p1.result_count, 0);
        assert_eq!(p1.total_artifact_bytes, 0);
        assert_eq!(p1.oldest_result_age_secs, None);
        assert_eq!(p1.retention.overrun_ratio, 0.0);
        assert_eq!(p1.retention.excess_results, 0);
    }

    #[test]
    fn test_counts_ages_and_durations() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![
                result("r1", "p1", 10, BuildStatus::Success),
                result("r2", "p1", 3, BuildStatus::Failure),
                result("r3", "p1", 1, BuildStatus::Other("in_progress".into())),
            ],
            ..Default::default()
        };
        let metrics = Aggregator::new(now()).aggregate(&snapshot).unwrap();

        let p1 = &metrics["p1"];
        assert_eq!(p1.result_count, 3);
        assert_eq!(p1.success_count, 1);
        assert_eq!(p1.failure_count, 1);
        assert_eq!(p1.oldest_result_age_secs, Some(10 * 86_400));
        assert_eq!(p1.newest_result_age_secs, Some(86_400));
        assert_eq!(p1.total_duration_ms, 180_000);
        assert_eq!(p1.mean_duration_ms, 60_000);
        assert_eq!(p1.retention.policy, RetentionState::NoPolicy);
    }

    #[test]
    fn test_unresolved_artifacts_never_count_as_bytes() {
        let mut r1 = result("r1", "p1", 1, BuildStatus::Success);
        r1.artifact_ids = vec!["a1".into(), "a2".into(), "a3".into()];
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![r1],
            artifacts: vec![
                artifact("a1", "r1", ArtifactSize::Known { bytes: 100, files: 2 }),
                artifact("a2", "r1", ArtifactSize::Unresolved),
                artifact("a3", "r1", ArtifactSize::Known { bytes: 400, files: 1 }),
            ],
            ..Default::default()
        };
        let metrics = Aggregator::new(now())
            .with_artifact_ceiling(Some(200))
            .aggregate(&snapshot)
            .unwrap();

        let p1 = &metrics["p1"];
        assert_eq!(p1.artifact_count, 3);
        assert_eq!(p1.total_artifact_bytes, 500);
        assert_eq!(p1.total_artifact_files, 3);
        assert_eq!(p1.unresolved_artifact_count, 1);
        assert_eq!(p1.largest_artifact_bytes, 400);
        assert_eq!(p1.oversized_artifact_count, 1);
    }

    #[test]
    fn test_retention_overrun_against_count_and_age() {
        let results: Vec<_> = (0..20)
            .map(|i| result(&format!("r{i}"), "p1", 40 - i, BuildStatus::Success))
            .collect();
        let snapshot = Snapshot {
            plans: vec![plan("p1", Some("rp1"))],
            results,
            policies: vec![keep("rp1", Some(5), Some(30))],
            ..Default::default()
        };
        let metrics = Aggregator::new(now()).aggregate(&snapshot).unwrap();

        let retention = &metrics["p1"].retention;
        assert_eq!(retention.excess_results, 15);
        // ages 40..=21 days, ten of which exceed 30
        assert_eq!(retention.results_beyond_age, 10);
        assert_eq!(retention.overrun_ratio, 4.0);
    }

    #[test]
    fn test_keep_forever_has_zero_overrun() {
        let results: Vec<_> = (0..50)
            .map(|i| result(&format!("r{i}"), "p1", 500, BuildStatus::Success))
            .collect();
        let snapshot = Snapshot {
            plans: vec![plan("p1", Some("rp1"))],
            results,
            policies: vec![RetentionPolicy {
                id: "rp1".to_string(),
                rule: RetentionRule::KeepForever,
            }],
            ..Default::default()
        };
        let metrics = Aggregator::new(now()).aggregate(&snapshot).unwrap();

        let p1 = &metrics["p1"];
        assert_eq!(p1.result_count, 50);
        assert_eq!(p1.retention.overrun_ratio, 0.0);
        assert_eq!(p1.retention.policy, RetentionState::KeepForever);
    }

    #[test]
    fn test_artifact_with_missing_result_is_integrity_error() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![result("r1", "p1", 1, BuildStatus::Success)],
            artifacts: vec![artifact("a1", "r9", ArtifactSize::Unresolved)],
            ..Default::default()
        };
        let err = Aggregator::new(now()).aggregate(&snapshot).unwrap_err();
        assert!(matches!(err, Error::Integrity(msg) if msg.contains("r9")));
    }

    #[test]
    fn test_result_with_missing_plan_is_integrity_error() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![result("r1", "p2", 1, BuildStatus::Success)],
            ..Default::default()
        };
        let err = Aggregator::new(now()).aggregate(&snapshot).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_missing_policy_and_artifact_refs_are_integrity_errors() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", Some("rp404"))],
            ..Default::default()
        };
        assert!(matches!(
            Aggregator::new(now()).aggregate(&snapshot),
            Err(Error::Integrity(_))
        ));

        let mut r1 = result("r1", "p1", 1, BuildStatus::Success);
        r1.artifact_ids = vec!["a404".into()];
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![r1],
            ..Default::default()
        };
        assert!(matches!(
            Aggregator::new(now()).aggregate(&snapshot),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_artifact_unlisted_by_its_result_is_integrity_error() {
        let mut r1 = result("r1", "p1", 1, BuildStatus::Success);
        r1.artifact_ids = vec!["a1".into()];
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![r1, result("r2", "p1", 2, BuildStatus::Success)],
            artifacts: vec![
                artifact("a1", "r1", ArtifactSize::Unresolved),
                artifact("a2", "r2", ArtifactSize::Known { bytes: 10, files: 1 }),
            ],
            ..Default::default()
        };

        let err = Aggregator::new(now()).aggregate(&snapshot).unwrap_err();
        assert!(matches!(err, Error::Integrity(msg) if msg.contains("a2") && msg.contains("r2")));
    }

    #[test]
    fn test_future_timestamps_clamp_to_zero_age() {
        let snapshot = Snapshot {
            plans: vec![plan("p1", None)],
            results: vec![result("r1", "p1", -2, BuildStatus::Success)],
            ..Default::default()
        };
        let metrics = Aggregator::new(now()).aggregate(&snapshot).unwrap();
        assert_eq!(metrics["p1"].newest_result_age_secs, Some(0));
    }
}
