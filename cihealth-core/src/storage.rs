//! Artifact storage scan
//!
//! The CI server keeps artifacts of each plan under
//! `<home>/shared/artifacts/plan-<build id>`. One pass over that directory
//! sizes the directory of every plan in the snapshot and lists the
//! directories no plan owns (orphans: disk the server no longer accounts
//! for). The scan is read-only and never influences plan severities.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::types::BuildPlan;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// On-disk artifact usage of one known plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStorage {
    pub plan_id: String,
    pub plan_key: String,
    pub plan_name: String,
    pub plan_type: &'static str,
    /// Server-relative plan page (`/browse/<KEY>`)
    pub browse_path: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file_count: u64,
}

/// A directory under the artifact root that no plan owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedDirectory {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file_count: u64,
}

/// Outcome of one pass over the artifact root, both lists largest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageScan {
    pub plans: Vec<PlanStorage>,
    pub orphans: Vec<OrphanedDirectory>,
}

/// Artifact directory name for a plan.
pub fn plan_artifact_dir(plan: &BuildPlan) -> String {
    format!("plan-{}", plan.id)
}

/// Size plan directories under `root` and collect orphans.
///
/// Directories named in `config.ignored_dirs` (e.g. `tmp`, `globalStorage`)
/// are skipped. Plans whose directory holds no more than
/// `config.min_plan_bytes` are left out.
pub fn scan_artifact_storage(
    root: &Path,
    plans: &[BuildPlan],
    config: &StorageConfig,
) -> Result<StorageScan> {
    let known: HashMap<String, &BuildPlan> =
        plans.iter().map(|p| (plan_artifact_dir(p), p)).collect();

    let entries = std::fs::read_dir(root).map_err(|e| {
        Error::Storage(format!("cannot read artifact root {}: {}", root.display(), e))
    })?;

    let mut scan = StorageScan::default();
    for entry in entries {
        let entry = entry.map_err(|e| Error::Storage(format!("{}: {}", root.display(), e)))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if config.ignored_dirs.iter().any(|dir| *dir == name) {
            tracing::debug!(dir = %path.display(), "Ignoring special artifact directory");
            continue;
        }

        let (size_bytes, file_count) = directory_size(&path)?;
        match known.get(&name) {
            Some(plan) if size_bytes > config.min_plan_bytes => scan.plans.push(PlanStorage {
                plan_id: plan.id.clone(),
                plan_key: plan.key.clone(),
                plan_name: plan.name.clone(),
                plan_type: plan.kind.label(),
                browse_path: plan.browse_path(),
                path,
                size_bytes,
                file_count,
            }),
            Some(_) => {}
            None => {
                tracing::debug!(dir = %path.display(), size_bytes, "Found orphaned artifact directory");
                scan.orphans.push(OrphanedDirectory {
                    name,
                    path,
                    size_bytes,
                    file_count,
                });
            }
        }
    }

    scan.plans.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.plan_id.cmp(&b.plan_id))
    });
    scan.orphans.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.name.cmp(&b.name))
    });

    tracing::info!(
        root = %root.display(),
        plans = scan.plans.len(),
        orphans = scan.orphans.len(),
        known_plans = known.len(),
        "Scanned artifact storage"
    );

    Ok(scan)
}

/// Total bytes and file count below `dir`.
fn directory_size(dir: &Path) -> Result<(u64, u64)> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::Storage(format!("invalid scan pattern {}: {}", pattern, e)))?;

    let mut bytes = 0u64;
    let mut files = 0u64;
    for entry in entries.flatten() {
        let Ok(metadata) = std::fs::symlink_metadata(&entry) else {
            continue;
        };
        if metadata.is_file() {
            bytes = bytes.saturating_add(metadata.len());
            files += 1;
        }
    }
    Ok((bytes, files))
}
