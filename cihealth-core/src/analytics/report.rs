//! Report assembly
//!
//! Projects evaluator output into the ordered structure handed to renderers.
//! No thresholding happens here. Entries are ordered by severity descending,
//! ties by plan id, and carry the plan identity plus the metrics that
//! justify each finding.

use super::aggregate::PlanMetrics;
use super::evaluate::{rank, HealthFinding, RuleContribution};
use super::rules::FindingKind;
use crate::config::ReportConfig;
use crate::error::{Error, Result};
use crate::root_poisoning::PoisonedWorkspace;
use crate::storage::{OrphanedDirectory, PlanStorage, StorageScan};
use crate::types::{BuildPlan, Snapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Totals over the analyzed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub plans_analyzed: usize,
    pub results_analyzed: usize,
    pub artifacts_analyzed: usize,
    pub plans_flagged: usize,
    pub findings_by_kind: BTreeMap<FindingKind, usize>,
}

/// One flagged plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    /// 1-based position in the report
    pub rank: usize,
    pub plan_id: String,
    pub plan_key: String,
    pub plan_name: String,
    pub project_key: String,
    /// Short build type label (`CHAIN`, `BRANCH`, `JOB`)
    pub plan_type: &'static str,
    /// Plan page on the CI server, when a base URL is configured
    pub url: Option<String>,
    pub severity: f64,
    pub kinds: Vec<FindingKind>,
    pub contributions: Vec<RuleContribution>,
    pub rationale: Vec<String>,
    /// Supporting metric values
    pub metrics: PlanMetrics,
}

/// Ranked health report for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Reference time the run was evaluated against
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub entries: Vec<ReportEntry>,
    /// Plans by on-disk artifact size; empty unless a storage scan was run
    pub plan_storage: Vec<PlanStorage>,
    /// Artifact directories no plan owns; empty unless a storage scan was run
    pub orphaned_storage: Vec<OrphanedDirectory>,
    /// Agent workspaces left with root-owned files; empty unless agent
    /// chown logs were read
    pub root_poisoned_workspaces: Vec<PoisonedWorkspace>,
}

impl HealthReport {
    /// SHA-256 over the serialized entries, identical for identical runs.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.entries)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Attach the result of an artifact storage scan.
    pub fn with_storage(mut self, scan: StorageScan) -> Self {
        self.plan_storage = scan.plans;
        self.orphaned_storage = scan.orphans;
        self
    }

    /// Attach workspaces found in agent chown logs.
    pub fn with_root_poisoning(mut self, workspaces: Vec<PoisonedWorkspace>) -> Self {
        self.root_poisoned_workspaces = workspaces;
        self
    }

    /// Bytes held by orphaned artifact directories.
    pub fn orphaned_bytes(&self) -> u64 {
        self.orphaned_storage.iter().map(|o| o.size_bytes).sum()
    }

    pub fn is_healthy(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a [`HealthReport`] from findings.
pub struct ReportAssembler {
    base_url: Option<String>,
}

impl ReportAssembler {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    /// Assemble findings into a ranked report.
    pub fn assemble(
        &self,
        mut findings: Vec<HealthFinding>,
        metrics: &BTreeMap<String, PlanMetrics>,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<HealthReport> {
        let plans: HashMap<&str, &BuildPlan> =
            snapshot.plans.iter().map(|p| (p.id.as_str(), p)).collect();
        findings.sort_by(rank);

        let mut findings_by_kind = BTreeMap::new();
        let mut entries = Vec::with_capacity(findings.len());

        for (index, finding) in findings.into_iter().enumerate() {
            let plan = plans.get(finding.plan_id.as_str()).ok_or_else(|| {
                Error::Integrity(format!("finding references unknown plan {}", finding.plan_id))
            })?;
            let plan_metrics = metrics.get(&finding.plan_id).ok_or_else(|| {
                Error::Integrity(format!("no metrics for plan {}", finding.plan_id))
            })?;

            for kind in &finding.kinds {
                *findings_by_kind.entry(*kind).or_insert(0) += 1;
            }

            entries.push(ReportEntry {
                rank: index + 1,
                plan_id: finding.plan_id,
                plan_key: plan.key.clone(),
                plan_name: plan.name.clone(),
                project_key: plan.project_key.clone(),
                plan_type: plan.kind.label(),
                url: self
                    .base_url
                    .as_ref()
                    .map(|base| format!("{}{}", base, plan.browse_path())),
                severity: finding.severity,
                kinds: finding.kinds,
                contributions: finding.contributions,
                rationale: finding.rationale,
                metrics: plan_metrics.clone(),
            });
        }

        Ok(HealthReport {
            generated_at: now,
            summary: ReportSummary {
                plans_analyzed: snapshot.plans.len(),
                results_analyzed: snapshot.results.len(),
                artifacts_analyzed: snapshot.artifacts.len(),
                plans_flagged: entries.len(),
                findings_by_kind,
            },
            entries,
            plan_storage: Vec::new(),
            orphaned_storage: Vec::new(),
            root_poisoned_workspaces: Vec::new(),
        })
    }
}
