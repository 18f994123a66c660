//! Record sources for an analysis run
//!
//! The CI server's storage schema is hidden behind [`BuildStore`], a narrow
//! read-only capability with one paged fetch per record kind. The
//! [`Extractor`] drives a store to produce a complete [`Snapshot`].
//!
//! Built-in stores:
//! - [`SnapshotDatabase`](crate::db::SnapshotDatabase): SQLite import of CI state
//! - [`MemoryStore`]: records held in memory (fixtures, tests, pre-loaded data)
//!
//! [`Snapshot`]: crate::types::Snapshot

pub mod extractor;
pub mod memory;

pub use extractor::Extractor;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{Artifact, BuildPlan, BuildResult, RetentionPolicy};

/// Window of records requested from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Number of records to skip
    pub offset: usize,
    /// Maximum number of records to return
    pub limit: usize,
}

impl PageRequest {
    /// Apply this window to an in-memory slice.
    pub fn slice<'a, T>(&self, records: &'a [T]) -> &'a [T] {
        let start = self.offset.min(records.len());
        let end = start.saturating_add(self.limit).min(records.len());
        &records[start..end]
    }
}

/// The four record kinds a store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Plans,
    Results,
    Artifacts,
    RetentionPolicies,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Plans => "plans",
            FetchKind::Results => "results",
            FetchKind::Artifacts => "artifacts",
            FetchKind::RetentionPolicies => "retention_policies",
        }
    }
}

/// Whether a store pinned a point-in-time view for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSupport {
    /// All subsequent fetches observe the same state
    Pinned,
    /// Fetches may observe concurrent writes
    Unsupported,
}

/// Read-only query capability over a CI server's persisted state.
///
/// Implementations must not issue state-changing calls against the CI
/// server. Results must be returned in insertion (chronological) order so
/// paging is stable.
pub trait BuildStore: Send + Sync {
    /// Short name for logs (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Fetch a page of build plans.
    fn fetch_plans(&self, page: PageRequest) -> Result<Vec<BuildPlan>>;

    /// Fetch a page of build results.
    fn fetch_results(&self, page: PageRequest) -> Result<Vec<BuildResult>>;

    /// Fetch a page of artifacts.
    fn fetch_artifacts(&self, page: PageRequest) -> Result<Vec<Artifact>>;

    /// Fetch a page of retention policies.
    fn fetch_retention_policies(&self, page: PageRequest) -> Result<Vec<RetentionPolicy>>;

    /// Whether the four record kinds may be fetched from separate threads.
    ///
    /// Default implementation returns `false`.
    fn supports_concurrent_fetch(&self) -> bool {
        false
    }

    /// Pin a point-in-time view before the first fetch.
    ///
    /// Default implementation cannot pin anything.
    fn begin_snapshot(&self) -> Result<SnapshotSupport> {
        Ok(SnapshotSupport::Unsupported)
    }

    /// Release the view pinned by [`begin_snapshot`](Self::begin_snapshot).
    fn end_snapshot(&self) -> Result<()> {
        Ok(())
    }
}
