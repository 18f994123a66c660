//! Health analytics for cihealth
//!
//! Turns a CI [`Snapshot`](crate::types::Snapshot) into a ranked
//! [`HealthReport`]:
//! - [`aggregate`]: per-plan statistics ([`PlanMetrics`])
//! - [`rules`]: the health rules and their validated configuration
//! - [`evaluate`]: weighted, capped severity scoring and ranking
//! - [`report`]: projection into the report structure
//!
//! See [`engine`] for the pass that runs them in order.

pub mod aggregate;
pub mod engine;
pub mod evaluate;
pub mod metrics_registry;
pub mod report;
pub mod rules;

pub use aggregate::{Aggregator, PlanMetrics, RetentionMetrics, RetentionState};
pub use engine::HealthEngine;
pub use evaluate::{evaluate, HealthFinding, RuleContribution};
pub use metrics_registry::{all_metrics, find_metric, MetricDescriptor, MetricUnit};
pub use report::{HealthReport, ReportAssembler, ReportEntry, ReportSummary};
pub use rules::{
    built_in_rules, Breach, FindingKind, HealthRule, ResolvedRule, RuleSet, SizeScope,
    ThresholdSpec,
};
