//! Record extraction
//!
//! Drives a [`BuildStore`] page by page and materializes one complete
//! [`Snapshot`]. Any failure while fetching any of the four record kinds
//! fails the whole extraction: the engine never analyzes a partial snapshot.

use super::{BuildStore, FetchKind, PageRequest, SnapshotSupport};
use crate::config::{AnalysisConfig, ConsistencyMode};
use crate::error::{Error, Result};
use crate::types::{RetentionRule, Snapshot};
use std::collections::HashSet;
use std::time::Instant;

/// Produces snapshots from an injected store.
pub struct Extractor<'a> {
    store: &'a dyn BuildStore,
    page_size: usize,
    consistency: ConsistencyMode,
}

impl<'a> Extractor<'a> {
    /// Create an extractor over a store the caller owns.
    pub fn new(store: &'a dyn BuildStore, config: &AnalysisConfig) -> Self {
        Self {
            store,
            page_size: config.page_size.max(1),
            consistency: config.consistency,
        }
    }

    /// Fetch all four record kinds and validate their shape.
    pub fn extract(&self) -> Result<Snapshot> {
        let start = Instant::now();

        let support = self
            .store
            .begin_snapshot()
            .map_err(|e| e.into_data_source("begin_snapshot"))?;

        let pinned = match support {
            SnapshotSupport::Pinned => true,
            SnapshotSupport::Unsupported => match self.consistency {
                ConsistencyMode::Strict => {
                    return Err(Error::DataSource(format!(
                        "store '{}' cannot pin a consistent snapshot and consistency is strict",
                        self.store.name()
                    )));
                }
                ConsistencyMode::BestEffort => {
                    tracing::warn!(
                        store = self.store.name(),
                        "Store cannot pin a snapshot; continuing with best-effort consistency"
                    );
                    false
                }
            },
        };

        let fetched = self.fetch_all();

        // The pinned view is released even when a fetch failed; the fetch
        // error takes precedence over a release error.
        if pinned {
            let released = self
                .store
                .end_snapshot()
                .map_err(|e| e.into_data_source("end_snapshot"));
            if let Err(e) = released {
                if fetched.is_ok() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Failed to release snapshot after fetch error");
            }
        }

        let snapshot = fetched?;
        validate_shape(&snapshot)?;

        tracing::info!(
            store = self.store.name(),
            consistency = self.consistency.as_str(),
            plans = snapshot.plans.len(),
            results = snapshot.results.len(),
            artifacts = snapshot.artifacts.len(),
            policies = snapshot.policies.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Snapshot extracted"
        );

        Ok(snapshot)
    }

    fn fetch_all(&self) -> Result<Snapshot> {
        if !self.store.supports_concurrent_fetch() {
            return Ok(Snapshot {
                plans: self.fetch_paged(FetchKind::Plans, |p| self.store.fetch_plans(p))?,
                results: self.fetch_paged(FetchKind::Results, |p| self.store.fetch_results(p))?,
                artifacts: self
                    .fetch_paged(FetchKind::Artifacts, |p| self.store.fetch_artifacts(p))?,
                policies: self.fetch_paged(FetchKind::RetentionPolicies, |p| {
                    self.store.fetch_retention_policies(p)
                })?,
            });
        }

        // Every fetch completes before any outcome is inspected.
        let ((plans, results), (artifacts, policies)) = rayon::join(
            || {
                rayon::join(
                    || self.fetch_paged(FetchKind::Plans, |p| self.store.fetch_plans(p)),
                    || self.fetch_paged(FetchKind::Results, |p| self.store.fetch_results(p)),
                )
            },
            || {
                rayon::join(
                    || self.fetch_paged(FetchKind::Artifacts, |p| self.store.fetch_artifacts(p)),
                    || {
                        self.fetch_paged(FetchKind::RetentionPolicies, |p| {
                            self.store.fetch_retention_policies(p)
                        })
                    },
                )
            },
        );

        Ok(Snapshot {
            plans: plans?,
            results: results?,
            artifacts: artifacts?,
            policies: policies?,
        })
    }

    fn fetch_paged<T, F>(&self, kind: FetchKind, fetch: F) -> Result<Vec<T>>
    where
        F: Fn(PageRequest) -> Result<Vec<T>>,
    {
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = PageRequest {
                offset: records.len(),
                limit: self.page_size,
            };
            let batch = fetch(page).map_err(|e| e.into_data_source(kind.as_str()))?;
            pages += 1;

            let count = batch.len();
            if count > self.page_size {
                return Err(Error::DataSource(format!(
                    "{}: store returned {} records for a page of {}",
                    kind.as_str(),
                    count,
                    self.page_size
                )));
            }

            records.extend(batch);
            if count < self.page_size {
                break;
            }
        }

        tracing::debug!(
            kind = kind.as_str(),
            records = records.len(),
            pages,
            "Fetched records"
        );

        Ok(records)
    }
}

/// Reject records that are malformed on their own: empty or duplicate ids
/// and retention rules that limit nothing.
fn validate_shape(snapshot: &Snapshot) -> Result<()> {
    check_ids(FetchKind::Plans, snapshot.plans.iter().map(|p| p.id.as_str()))?;
    check_ids(FetchKind::Results, snapshot.results.iter().map(|r| r.id.as_str()))?;
    check_ids(
        FetchKind::Artifacts,
        snapshot.artifacts.iter().map(|a| a.id.as_str()),
    )?;
    check_ids(
        FetchKind::RetentionPolicies,
        snapshot.policies.iter().map(|p| p.id.as_str()),
    )?;

    for policy in &snapshot.policies {
        if let RetentionRule::Expire {
            max_results: None,
            max_age_days: None,
        } = policy.rule
        {
            return Err(Error::DataSource(format!(
                "retention policy {} expires results but declares no count or age limit",
                policy.id
            )));
        }
    }

    Ok(())
}

fn check_ids<'r>(kind: FetchKind, ids: impl Iterator<Item = &'r str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(Error::DataSource(format!(
                "{}: record with empty id",
                kind.as_str()
            )));
        }
        if !seen.insert(id) {
            return Err(Error::DataSource(format!(
                "{}: duplicate id {}",
                kind.as_str(),
                id
            )));
        }
    }
    Ok(())
}
