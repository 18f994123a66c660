//! Health evaluation
//!
//! Applies a [`RuleSet`] to aggregated metrics. Each tripped rule contributes
//! `weight × min(normalized_excess, cap)` to the plan's severity, where the
//! normalized excess is the largest among the rule's breaches. Contributions
//! of several rules on one plan are summed. Findings are ordered by severity
//! descending, ties broken by ascending plan id.

use super::aggregate::PlanMetrics;
use super::rules::{Breach, FindingKind, RuleSet};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Score one tripped rule added to a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleContribution {
    pub kind: FindingKind,
    pub weight: f64,
    /// Normalized excess after applying the rule's cap
    pub normalized_excess: f64,
    pub contribution: f64,
    pub breaches: Vec<Breach>,
}

/// A plan that tripped at least one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthFinding {
    pub plan_id: String,
    pub kinds: Vec<FindingKind>,
    pub severity: f64,
    pub contributions: Vec<RuleContribution>,
    pub rationale: Vec<String>,
}

/// Evaluate every plan against the rule set.
///
/// Plans without retained results are never evaluated: absence of data is
/// not a health violation.
pub fn evaluate(metrics: &BTreeMap<String, PlanMetrics>, rules: &RuleSet) -> Vec<HealthFinding> {
    let mut findings: Vec<HealthFinding> = metrics
        .values()
        .filter(|plan| plan.result_count > 0)
        .filter_map(|plan| evaluate_plan(plan, rules))
        .collect();

    findings.sort_by(rank);

    tracing::debug!(
        plans = metrics.len(),
        findings = findings.len(),
        "Evaluated health rules"
    );

    findings
}

/// Report ordering: severity descending, then plan id ascending.
pub fn rank(a: &HealthFinding, b: &HealthFinding) -> Ordering {
    b.severity
        .total_cmp(&a.severity)
        .then_with(|| a.plan_id.cmp(&b.plan_id))
}

fn evaluate_plan(plan: &PlanMetrics, rules: &RuleSet) -> Option<HealthFinding> {
    let mut contributions = Vec::new();

    for (rule, resolved) in rules.iter() {
        let breaches = rule.evaluate(plan, resolved);
        if breaches.is_empty() {
            continue;
        }
        let excess = breaches
            .iter()
            .map(Breach::normalized_excess)
            .fold(0.0, f64::max)
            .min(resolved.cap);
        contributions.push(RuleContribution {
            kind: resolved.kind,
            weight: resolved.weight,
            normalized_excess: excess,
            contribution: resolved.weight * excess,
            breaches,
        });
    }

    if contributions.is_empty() {
        return None;
    }

    Some(HealthFinding {
        plan_id: plan.plan_id.clone(),
        kinds: contributions.iter().map(|c| c.kind).collect(),
        severity: contributions.iter().map(|c| c.contribution).sum(),
        rationale: contributions
            .iter()
            .flat_map(|c| c.breaches.iter().map(|b| b.rationale.clone()))
            .collect(),
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::aggregate::RetentionState;

    fn metrics(plans: Vec<PlanMetrics>) -> BTreeMap<String, PlanMetrics> {
        plans.into_iter().map(|p| (p.plan_id.clone(), p)).collect()
    }

    fn unresolved(plan_id: &str, count: u64) -> PlanMetrics {
        let mut plan = PlanMetrics::empty(plan_id, RetentionState::NoPolicy);
        plan.result_count = 1;
        plan.artifact_count = count;
        plan.unresolved_artifact_count = count;
        plan
    }

    #[test]
    fn test_healthy_plans_produce_no_findings() {
        let mut healthy = PlanMetrics::empty("p1", RetentionState::NoPolicy);
        healthy.result_count = 3;
        healthy.total_artifact_bytes = 1024;
        let findings = evaluate(&metrics(vec![healthy]), &RuleSet::with_defaults());
        assert!(findings.is_empty());
    }

    #[test]
    fn test_severity_is_weighted_and_capped() {
        let findings = evaluate(
            &metrics(vec![unresolved("p1", 2), unresolved("p2", 40)]),
            &RuleSet::with_defaults(),
        );

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].plan_id, "p2");
        assert_eq!(findings[0].severity, 5.0);
        assert_eq!(findings[1].severity, 2.0);
        assert_eq!(findings[1].kinds, vec![FindingKind::UnscopedArtifactPattern]);
    }

    #[test]
    fn test_ties_break_by_plan_id() {
        let findings = evaluate(
            &metrics(vec![unresolved("b", 1), unresolved("a", 1), unresolved("c", 3)]),
            &RuleSet::with_defaults(),
        );
        let order: Vec<_> = findings.iter().map(|f| f.plan_id.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn test_contributions_sum_across_rules() {
        let mut plan = unresolved("p1", 1);
        plan.result_count = 2000;
        let findings = evaluate(&metrics(vec![plan]), &RuleSet::with_defaults());

        let finding = &findings[0];
        assert_eq!(
            finding.kinds,
            vec![
                FindingKind::ExcessiveRetention,
                FindingKind::UnscopedArtifactPattern
            ]
        );
        // retention: 2.0 × (2000 - 1000) / 1000, unscoped: 1.0 × 1
        assert_eq!(finding.severity, 3.0);
        assert_eq!(finding.rationale.len(), 2);
    }
}
