//! In-memory record store.

use super::{BuildStore, FetchKind, PageRequest, SnapshotSupport};
use crate::error::{Error, Result};
use crate::types::{Artifact, BuildPlan, BuildResult, RetentionPolicy, Snapshot};

/// Store that serves records from an owned [`Snapshot`].
///
/// The records never change, so every run observes a pinned view and the
/// four kinds can be fetched concurrently. A failure can be injected for one
/// record kind to exercise partial-extraction handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Snapshot,
    failure: Option<(FetchKind, String)>,
}

impl MemoryStore {
    /// Create a store serving the given records.
    pub fn new(records: Snapshot) -> Self {
        Self {
            records,
            failure: None,
        }
    }

    /// Make every fetch of `kind` fail with a data source error.
    pub fn with_failure(mut self, kind: FetchKind, message: impl Into<String>) -> Self {
        self.failure = Some((kind, message.into()));
        self
    }

    fn check(&self, kind: FetchKind) -> Result<()> {
        match &self.failure {
            Some((failing, message)) if *failing == kind => {
                Err(Error::DataSource(format!("{}: {}", kind.as_str(), message)))
            }
            _ => Ok(()),
        }
    }
}

impl BuildStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch_plans(&self, page: PageRequest) -> Result<Vec<BuildPlan>> {
        self.check(FetchKind::Plans)?;
        Ok(page.slice(&self.records.plans).to_vec())
    }

    fn fetch_results(&self, page: PageRequest) -> Result<Vec<BuildResult>> {
        self.check(FetchKind::Results)?;
        Ok(page.slice(&self.records.results).to_vec())
    }

    fn fetch_artifacts(&self, page: PageRequest) -> Result<Vec<Artifact>> {
        self.check(FetchKind::Artifacts)?;
        Ok(page.slice(&self.records.artifacts).to_vec())
    }

    fn fetch_retention_policies(&self, page: PageRequest) -> Result<Vec<RetentionPolicy>> {
        self.check(FetchKind::RetentionPolicies)?;
        Ok(page.slice(&self.records.policies).to_vec())
    }

    fn supports_concurrent_fetch(&self) -> bool {
        true
    }

    fn begin_snapshot(&self) -> Result<SnapshotSupport> {
        Ok(SnapshotSupport::Pinned)
    }
}
