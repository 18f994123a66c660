//! Health analysis engine
//!
//! Runs one finite analysis pass over a CI snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        HEALTH ENGINE                          │
//! │                                                               │
//! │  BuildStore ──► Extractor ──► Aggregator ──► evaluate() ──►   │
//! │  (injected)     Snapshot      PlanMetrics    HealthFinding    │
//! │                                                  │            │
//! │                                                  ▼            │
//! │                                          ReportAssembler      │
//! │                                          HealthReport         │
//! │                                                  │            │
//! │  artifact root (optional) ──► storage scan ──────┘            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each stage consumes the previous stage's complete output. Any
//! run-aborting error stops the pass and no report is produced. The storage
//! scan matches directories against the plans of the same extracted
//! snapshot the report was built from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cihealth_core::analytics::HealthEngine;
//!
//! let engine = HealthEngine::new(&config)?;
//! let report = engine.run(&db, now)?;
//!
//! for entry in &report.entries {
//!     println!("{} {:.2} {:?}", entry.plan_key, entry.severity, entry.kinds);
//! }
//! ```

use super::aggregate::Aggregator;
use super::evaluate::evaluate;
use super::report::{HealthReport, ReportAssembler};
use super::rules::RuleSet;
use crate::config::{AgentLogConfig, AnalysisConfig, Config, StorageConfig};
use crate::error::Result;
use crate::source::{BuildStore, Extractor};
use crate::root_poisoning::{group_by_workspace, ChownLogParser};
use crate::storage::scan_artifact_storage;
use crate::types::Snapshot;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Instant;

/// Engine that turns CI state into a ranked health report.
///
/// The rule set is validated when the engine is built, so a malformed
/// configuration fails before any record is fetched.
pub struct HealthEngine {
    rules: RuleSet,
    analysis: AnalysisConfig,
    storage: StorageConfig,
    agents: AgentLogConfig,
    assembler: ReportAssembler,
}

impl HealthEngine {
    /// Create an engine from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        config.analysis.validate()?;
        let rules = RuleSet::from_config(&config.rules)?;

        tracing::info!(
            rules = rules.len(),
            consistency = config.analysis.consistency.as_str(),
            "Health engine configured"
        );

        Ok(Self {
            rules,
            analysis: config.analysis.clone(),
            storage: config.storage.clone(),
            agents: config.agents.clone(),
            assembler: ReportAssembler::new(&config.report),
        })
    }

    /// Scan `root` for plan and orphaned artifact directories on each run,
    /// replacing any root from the configuration.
    pub fn with_artifact_root(mut self, root: Option<PathBuf>) -> Self {
        if root.is_some() {
            self.storage.artifact_root = root;
        }
        self
    }

    /// Read agent chown logs from `dir` on each run, replacing any
    /// directory from the configuration.
    pub fn with_chown_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.agents.chown_log_dir = dir;
        }
        self
    }

    /// The validated rule set.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Extract a snapshot from `store` and analyze it against `now`.
    pub fn run(&self, store: &dyn BuildStore, now: DateTime<Utc>) -> Result<HealthReport> {
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(%run_id, store = store.name(), %now, "Starting health analysis");

        let snapshot = Extractor::new(store, &self.analysis).extract()?;
        let report = self
            .analyze_snapshot(&snapshot, now)
            .and_then(|report| self.attach_storage(report, &snapshot))
            .and_then(|report| self.attach_root_poisoning(report));

        match &report {
            Ok(report) => tracing::info!(
                %run_id,
                flagged = report.entries.len(),
                "Health analysis complete"
            ),
            Err(e) => tracing::warn!(%run_id, error = %e, "Health analysis aborted"),
        }

        report
    }

    /// Analyze an already extracted snapshot.
    ///
    /// A pure function of the snapshot, the configuration and `now`.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<HealthReport> {
        let start = Instant::now();

        let metrics = Aggregator::new(now)
            .with_artifact_ceiling(self.rules.artifact_ceiling())
            .aggregate(snapshot)?;
        let findings = evaluate(&metrics, &self.rules);
        let report = self.assembler.assemble(findings, &metrics, snapshot, now)?;

        tracing::debug!(
            plans = report.summary.plans_analyzed,
            flagged = report.summary.plans_flagged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Analyzed snapshot"
        );

        Ok(report)
    }

    fn attach_storage(&self, report: HealthReport, snapshot: &Snapshot) -> Result<HealthReport> {
        match &self.storage.artifact_root {
            Some(root) => {
                let scan = scan_artifact_storage(root, &snapshot.plans, &self.storage)?;
                Ok(report.with_storage(scan))
            }
            None => Ok(report),
        }
    }

    fn attach_root_poisoning(&self, report: HealthReport) -> Result<HealthReport> {
        match &self.agents.chown_log_dir {
            Some(dir) => {
                let log = ChownLogParser::new(&self.agents.agent_home).parse_dir(dir)?;
                Ok(report.with_root_poisoning(group_by_workspace(&log)))
            }
            None => Ok(report),
        }
    }
}
