//! Health rules
//!
//! Each rule lives in its own module and implements [`HealthRule`]. A rule
//! only decides which of its thresholds a plan breaches and by how much;
//! weighting, capping and summing are done uniformly by the
//! [`evaluate`](super::evaluate) module, so a rule is data
//! (kind → thresholds, weight, cap) plus one comparison.
//!
//! ## Built-in Rules
//!
//! - [`excessive_retention`]: too many or too old results, or overrunning the plan's policy
//! - [`oversized_artifact`]: artifact bytes above a ceiling (plan total or per artifact)
//! - [`unscoped_artifact`]: artifacts whose size could not be determined
//! - [`stale_plan`]: no recent results while still retaining a lot of data
//!
//! ## Configuration
//!
//! ```toml
//! [rules.excessive-retention]
//! weight = 2.0
//! max_results = 500
//!
//! [rules.oversized-artifact-total]
//! scope = "per-artifact"
//! max_bytes = 1073741824
//! ```

pub mod excessive_retention;
pub mod oversized_artifact;
pub mod stale_plan;
pub mod unscoped_artifact;

use super::aggregate::PlanMetrics;
use crate::config::RuleSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ceiling on a rule's normalized excess unless configured otherwise.
pub const DEFAULT_CAP: f64 = 5.0;

/// The recognized finding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    ExcessiveRetention,
    OversizedArtifactTotal,
    UnscopedArtifactPattern,
    StalePlan,
}

impl FindingKind {
    pub const ALL: [FindingKind; 4] = [
        FindingKind::ExcessiveRetention,
        FindingKind::OversizedArtifactTotal,
        FindingKind::UnscopedArtifactPattern,
        FindingKind::StalePlan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::ExcessiveRetention => "excessive-retention",
            FindingKind::OversizedArtifactTotal => "oversized-artifact-total",
            FindingKind::UnscopedArtifactPattern => "unscoped-artifact-pattern",
            FindingKind::StalePlan => "stale-plan",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FindingKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown finding kind '{}' (expected one of: {})",
                    s,
                    FindingKind::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

/// How artifact sizes are compared against a size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeScope {
    /// Sum of known artifact bytes across the plan's retained results
    #[default]
    PlanTotal,
    /// Largest single known artifact
    PerArtifact,
}

impl SizeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeScope::PlanTotal => "plan-total",
            SizeScope::PerArtifact => "per-artifact",
        }
    }
}

impl FromStr for SizeScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plan-total" => Ok(SizeScope::PlanTotal),
            "per-artifact" => Ok(SizeScope::PerArtifact),
            other => Err(Error::Configuration(format!(
                "unknown scope '{}' (expected plan-total or per-artifact)",
                other
            ))),
        }
    }
}

/// A named threshold a rule reads from its configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSpec {
    pub name: &'static str,
    pub default: f64,
    pub summary: &'static str,
}

/// One threshold a plan went past.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breach {
    /// Supporting metric the comparison was made on
    pub metric: &'static str,
    pub observed: f64,
    pub threshold: f64,
    /// Human-readable explanation
    pub rationale: String,
}

impl Breach {
    /// How far past the threshold the observation is, relative to the
    /// threshold (a zero threshold measures absolute excess).
    pub fn normalized_excess(&self) -> f64 {
        let denominator = if self.threshold > 0.0 {
            self.threshold
        } else {
            1.0
        };
        ((self.observed - self.threshold) / denominator).max(0.0)
    }
}

/// Validated settings for one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub kind: FindingKind,
    pub weight: f64,
    pub cap: f64,
    pub scope: SizeScope,
    pub thresholds: BTreeMap<String, f64>,
}

impl ResolvedRule {
    /// Value of a threshold declared by the rule.
    pub fn threshold(&self, name: &str) -> f64 {
        self.thresholds.get(name).copied().unwrap_or_default()
    }
}

/// A health rule: compares one plan's metrics against its thresholds.
///
/// ## Example
///
/// ```rust,ignore
/// pub struct NeverBuilt;
///
/// impl HealthRule for NeverBuilt {
///     fn kind(&self) -> FindingKind { FindingKind::StalePlan }
///     fn thresholds(&self) -> &'static [ThresholdSpec] { &[] }
///     fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach> {
///         vec![]
///     }
/// }
/// ```
pub trait HealthRule: Send + Sync {
    /// Finding kind this rule reports.
    fn kind(&self) -> FindingKind;

    /// Thresholds this rule reads, with their defaults.
    fn thresholds(&self) -> &'static [ThresholdSpec];

    /// Weight applied when not configured.
    fn default_weight(&self) -> f64 {
        1.0
    }

    /// Whether the rule honors a `scope` setting.
    ///
    /// Default implementation returns `false`.
    fn supports_scope(&self) -> bool {
        false
    }

    /// Compare a plan's metrics against the resolved thresholds.
    ///
    /// Returns an empty vector when the plan is within every threshold.
    fn evaluate(&self, metrics: &PlanMetrics, rule: &ResolvedRule) -> Vec<Breach>;
}

/// The validated set of enabled rules, in finding-kind order.
pub struct RuleSet {
    rules: Vec<(Box<dyn HealthRule>, ResolvedRule)>,
}

impl RuleSet {
    /// All built-in rules with their default settings.
    pub fn with_defaults() -> Self {
        // Defaults are always valid.
        Self::from_config(&BTreeMap::new()).unwrap_or_else(|_| Self { rules: Vec::new() })
    }

    /// Validate raw rule settings and resolve them against the built-in rules.
    ///
    /// Fails with [`Error::Configuration`] on an unknown finding kind, an
    /// unknown threshold key, a negative or non-finite value, or a scope on
    /// a rule that has none.
    pub fn from_config(settings: &BTreeMap<String, RuleSettings>) -> Result<Self> {
        for key in settings.keys() {
            key.parse::<FindingKind>()?;
        }

        let mut rules = Vec::new();
        for rule in built_in_rules() {
            let kind = rule.kind();
            let raw = settings.get(kind.as_str()).cloned().unwrap_or_default();
            if raw.enabled == Some(false) {
                tracing::info!(rule = kind.as_str(), "Health rule disabled");
                continue;
            }
            let resolved = resolve(rule.as_ref(), &raw)?;
            rules.push((rule, resolved));
        }

        Ok(Self { rules })
    }

    /// Iterate the enabled rules with their settings.
    pub fn iter(&self) -> impl Iterator<Item = (&dyn HealthRule, &ResolvedRule)> {
        self.rules.iter().map(|(rule, resolved)| (rule.as_ref(), resolved))
    }

    /// Settings of an enabled rule.
    pub fn get(&self, kind: FindingKind) -> Option<&ResolvedRule> {
        self.iter()
            .find(|(_, resolved)| resolved.kind == kind)
            .map(|(_, resolved)| resolved)
    }

    /// Size ceiling single artifacts are counted against, whatever the
    /// oversized rule's scope. `None` when that rule is disabled.
    pub fn artifact_ceiling(&self) -> Option<u64> {
        self.get(FindingKind::OversizedArtifactTotal)
            .map(|rule| rule.threshold(oversized_artifact::MAX_BYTES) as u64)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Every built-in rule, in finding-kind order.
pub fn built_in_rules() -> Vec<Box<dyn HealthRule>> {
    vec![
        Box::new(excessive_retention::ExcessiveRetention),
        Box::new(oversized_artifact::OversizedArtifactTotal),
        Box::new(unscoped_artifact::UnscopedArtifactPattern),
        Box::new(stale_plan::StalePlan),
    ]
}

fn resolve(rule: &dyn HealthRule, raw: &RuleSettings) -> Result<ResolvedRule> {
    let kind = rule.kind();
    let specs = rule.thresholds();

    for key in raw.thresholds.keys() {
        if !specs.iter().any(|spec| spec.name == key) {
            return Err(Error::Configuration(format!(
                "rules.{}: unknown threshold '{}' (expected one of: {})",
                kind,
                key,
                specs
                    .iter()
                    .map(|spec| spec.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    }

    let weight = checked(kind, "weight", raw.weight.unwrap_or(rule.default_weight()))?;
    let cap = checked(kind, "cap", raw.cap.unwrap_or(DEFAULT_CAP))?;

    let scope = match raw.scope.as_deref() {
        None => SizeScope::default(),
        Some(_) if !rule.supports_scope() => {
            return Err(Error::Configuration(format!(
                "rules.{}: scope is not supported by this rule",
                kind
            )))
        }
        Some(scope) => scope.parse()?,
    };

    let mut thresholds = BTreeMap::new();
    for spec in specs {
        let value = raw
            .thresholds
            .get(spec.name)
            .copied()
            .unwrap_or(spec.default);
        thresholds.insert(spec.name.to_string(), checked(kind, spec.name, value)?);
    }

    Ok(ResolvedRule {
        kind,
        weight,
        cap,
        scope,
        thresholds,
    })
}

fn checked(kind: FindingKind, name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Configuration(format!(
            "rules.{}.{} must be a non-negative number, got {}",
            kind, name, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kind: &str, entries: &[(&str, f64)]) -> BTreeMap<String, RuleSettings> {
        let mut raw = RuleSettings::default();
        for (name, value) in entries {
            raw.thresholds.insert(name.to_string(), *value);
        }
        BTreeMap::from([(kind.to_string(), raw)])
    }

    #[test]
    fn test_defaults_enable_every_rule() {
        let rules = RuleSet::with_defaults();
        let kinds: Vec<_> = rules.iter().map(|(r, _)| r.kind()).collect();
        assert_eq!(kinds, FindingKind::ALL.to_vec());
        assert_eq!(rules.artifact_ceiling(), Some(2_147_483_648));
    }

    #[test]
    fn test_finding_kind_round_trips_through_str() {
        for kind in FindingKind::ALL {
            assert_eq!(kind.as_str().parse::<FindingKind>().unwrap(), kind);
        }
        assert!(matches!(
            "slow-build".parse::<FindingKind>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = RuleSet::from_config(&settings("flaky-tests", &[])).err().unwrap();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("flaky-tests")));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let err = RuleSet::from_config(&settings("excessive-retention", &[("max_results", -1.0)]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_threshold_rejected() {
        let err = RuleSet::from_config(&settings("stale-plan", &[("max_bytes", 1.0)]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("max_bytes")));
    }

    #[test]
    fn test_non_finite_weight_rejected() {
        let mut raw = settings("stale-plan", &[]);
        if let Some(rule) = raw.get_mut("stale-plan") {
            rule.weight = Some(f64::NAN);
        }
        assert!(RuleSet::from_config(&raw).is_err());
    }

    #[test]
    fn test_scope_only_on_oversized_rule() {
        let mut raw = settings("unscoped-artifact-pattern", &[]);
        if let Some(rule) = raw.get_mut("unscoped-artifact-pattern") {
            rule.scope = Some("per-artifact".to_string());
        }
        assert!(RuleSet::from_config(&raw).is_err());

        let mut raw = settings("oversized-artifact-total", &[("max_bytes", 1024.0)]);
        if let Some(rule) = raw.get_mut("oversized-artifact-total") {
            rule.scope = Some("per-artifact".to_string());
        }
        let rules = RuleSet::from_config(&raw).unwrap();
        assert_eq!(rules.artifact_ceiling(), Some(1024));
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let mut raw = settings("stale-plan", &[]);
        if let Some(rule) = raw.get_mut("stale-plan") {
            rule.enabled = Some(false);
        }
        let rules = RuleSet::from_config(&raw).unwrap();
        assert_eq!(rules.len(), 3);
        assert!(rules.get(FindingKind::StalePlan).is_none());
    }

    #[test]
    fn test_normalized_excess() {
        let breach = Breach {
            metric: "result_count",
            observed: 300.0,
            threshold: 100.0,
            rationale: String::new(),
        };
        assert_eq!(breach.normalized_excess(), 2.0);

        let breach = Breach {
            metric: "unresolved_artifact_count",
            observed: 3.0,
            threshold: 0.0,
            rationale: String::new(),
        };
        assert_eq!(breach.normalized_excess(), 3.0);
    }
}
