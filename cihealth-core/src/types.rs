//! Core domain types for cihealth
//!
//! These types are read-only snapshots of a CI server's persisted state,
//! constructed fresh for every analysis run and discarded afterwards.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Build plan** | A configured CI pipeline that produces build results over time |
//! | **Build result** | One execution record of a plan |
//! | **Artifact** | A named output retained by a build result |
//! | **Retention policy** | How many / how old results a plan intends to keep |
//! | **Snapshot** | The complete set of records fetched for one run |
//!
//! Sizes that could not be determined are modeled as
//! [`ArtifactSize::Unresolved`] and are never treated as zero bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Build plans
// ============================================

/// Kind of build plan, mirroring the CI server's build types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// Top-level plan (`CHAIN`)
    Chain,
    /// Plan branch (`CHAIN_BRANCH`)
    ChainBranch,
    /// Job inside a plan stage (`JOB`)
    Job,
    /// Anything else the server reports
    Other,
}

impl PlanKind {
    /// Storage representation, matching the CI server's `BUILD_TYPE` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Chain => "CHAIN",
            PlanKind::ChainBranch => "CHAIN_BRANCH",
            PlanKind::Job => "JOB",
            PlanKind::Other => "OTHER",
        }
    }

    /// Short label used in reports (`CHAIN_BRANCH` becomes `BRANCH`).
    pub fn label(&self) -> &'static str {
        match self {
            PlanKind::Chain => "CHAIN",
            PlanKind::ChainBranch => "BRANCH",
            PlanKind::Job => "JOB",
            PlanKind::Other => "OTHER",
        }
    }

    /// Parse a stored build type. Unknown types map to [`PlanKind::Other`].
    pub fn from_storage(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CHAIN" => PlanKind::Chain,
            "CHAIN_BRANCH" => PlanKind::ChainBranch,
            "JOB" | "BUILD" => PlanKind::Job,
            _ => PlanKind::Other,
        }
    }
}

/// One CI build-plan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Unique identifier (the server's build id)
    pub id: String,
    /// Full plan key (e.g., "NW-CND43")
    pub key: String,
    /// Display name
    pub name: String,
    /// Owning project key (e.g., "NW")
    pub project_key: String,
    /// Build type
    pub kind: PlanKind,
    /// Retention policy governing this plan, if one is declared
    pub retention_policy_id: Option<String>,
}

impl BuildPlan {
    /// Path of the plan's page on the CI server (`/browse/<KEY>`).
    pub fn browse_path(&self) -> String {
        format!("/browse/{}", self.key)
    }
}

// ============================================
// Build results
// ============================================

/// Outcome of a build result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
    /// Any other state the server reports (in progress, unknown, ...)
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Other(state) => state,
        }
    }

    /// Parse a stored build state (`Successful`, `Failed`, ...).
    pub fn from_storage(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "successful" => BuildStatus::Success,
            "failure" | "failed" => BuildStatus::Failure,
            other => BuildStatus::Other(other.to_string()),
        }
    }
}

/// One execution record of a plan.
///
/// Results of a plan are kept in insertion order, which is chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Unique identifier
    pub id: String,
    /// Owning plan
    pub plan_id: String,
    /// Outcome
    pub status: BuildStatus,
    /// When the result was created
    pub created_at: DateTime<Utc>,
    /// Build duration in milliseconds
    pub duration_ms: u64,
    /// Artifacts retained by this result
    pub artifact_ids: Vec<String>,
}

// ============================================
// Artifacts
// ============================================

/// Size of an artifact as far as the server knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArtifactSize {
    /// Size and file count were determined
    Known { bytes: u64, files: u64 },
    /// Declared pattern is too broad to size cheaply
    Unresolved,
}

impl ArtifactSize {
    /// Byte size if known.
    pub fn bytes(&self) -> Option<u64> {
        match self {
            ArtifactSize::Known { bytes, .. } => Some(*bytes),
            ArtifactSize::Unresolved => None,
        }
    }

    /// File count if known.
    pub fn files(&self) -> Option<u64> {
        match self {
            ArtifactSize::Known { files, .. } => Some(*files),
            ArtifactSize::Unresolved => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ArtifactSize::Unresolved)
    }
}

/// A named output retained by a build result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier
    pub id: String,
    /// Owning build result
    pub result_id: String,
    /// Declared artifact name
    pub name: String,
    /// Declared copy pattern (e.g., "**/*.jar")
    pub pattern: String,
    /// Size, possibly unresolved
    pub size: ArtifactSize,
}

// ============================================
// Retention
// ============================================

/// What a retention policy asks the server to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionRule {
    /// Never expire results
    KeepForever,
    /// Expire results beyond a count and/or an age (at least one is set)
    Expire {
        max_results: Option<u64>,
        max_age_days: Option<u64>,
    },
}

/// Per-plan retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Unique identifier
    pub id: String,
    /// Rule
    pub rule: RetentionRule,
}

// ============================================
// Snapshot
// ============================================

/// The four record collections fetched for one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub plans: Vec<BuildPlan>,
    pub results: Vec<BuildResult>,
    pub artifacts: Vec<Artifact>,
    pub policies: Vec<RetentionPolicy>,
}

impl Snapshot {
    /// Total number of records across all four kinds.
    pub fn record_count(&self) -> usize {
        self.plans.len() + self.results.len() + self.artifacts.len() + self.policies.len()
    }
}
