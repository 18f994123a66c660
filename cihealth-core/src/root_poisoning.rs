//! Root-owned files in agent workspaces
//!
//! Build agents run a nightly `chown -vR bamboo:bamboo` over their home and
//! log every repaired path to `<host>_bamboo-home-assets-chowned.log`:
//!
//! ```text
//! changed ownership of '/home/bamboo/bamboo-agent-home/xml-data/build-dir/PRJ-PLAN-JOB1/target/x.jar' from root:root to bamboo:bamboo
//! ```
//!
//! A job or deployment that leaves root-owned files behind breaks the next
//! build scheduled in the same workspace. This module parses collected logs
//! and groups the repaired paths by the workspace that produced them. The
//! workspace directory under `xml-data/build-dir/` is named after a build
//! job key (`PROJECT-PLAN-JOB`, two dashes) or a deployment
//! (`<project id>-<environment id>`, one dash).
//!
//! Collecting the logs from the agents is left to the operator.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

const CHANGED_OWNERSHIP: &str = "changed ownership of ";
const ROOT_TO_AGENT: &str = " from root:root to bamboo:bamboo";
const LOG_SUFFIX: &str = "_bamboo-home-assets-chowned.log";

/// Local paths listed per workspace before the rest are only counted
pub const MAX_LISTED_PATHS: usize = 100;

/// What produced a workspace under `xml-data/build-dir/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    BuildJob,
    Deployment,
}

impl WorkspaceKind {
    /// Classify a workspace directory name by its dash count.
    pub fn classify(key: &str) -> Option<Self> {
        match key.matches('-').count() {
            2 => Some(WorkspaceKind::BuildJob),
            1 => Some(WorkspaceKind::Deployment),
            _ => None,
        }
    }
}

/// One repaired path attributed to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChownedPath {
    pub host: String,
    pub key: String,
    pub kind: WorkspaceKind,
    /// Path relative to the workspace directory
    pub local_path: String,
}

/// Paths from one or more logs, plus lines that named something other than
/// a build workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChownLog {
    pub paths: Vec<ChownedPath>,
    pub ignored: usize,
}

/// A workspace that left root-owned files behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoisonedWorkspace {
    pub key: String,
    pub kind: WorkspaceKind,
    /// Workspace directory relative to the agent home
    pub workspace: String,
    /// Server-relative page of the job or deployment environment
    pub link: String,
    /// Agents the workspace was repaired on, in first-seen order
    pub hosts: Vec<String>,
    /// Distinct repaired paths, at most [`MAX_LISTED_PATHS`]
    pub local_paths: Vec<String>,
    /// Distinct repaired paths beyond the listed ones
    pub omitted_paths: usize,
}

impl PoisonedWorkspace {
    /// Comma-separated paths, with a `(N more)` suffix when truncated.
    pub fn paths_summary(&self) -> String {
        let listed = self.local_paths.join(", ");
        if self.omitted_paths > 0 {
            format!("{}... ({} more)", listed, self.omitted_paths)
        } else {
            listed
        }
    }
}

/// Parses `chown -v` output for one agent home.
pub struct ChownLogParser {
    build_dir: String,
}

impl ChownLogParser {
    pub fn new(agent_home: &str) -> Self {
        Self {
            build_dir: format!("{}/xml-data/build-dir/", agent_home.trim_end_matches('/')),
        }
    }

    /// Parse one log line. `None` for lines that do not record a
    /// root-to-agent ownership repair inside a build workspace.
    pub fn parse_line(&self, host: &str, line: &str) -> Option<ChownedPath> {
        let (_, rest) = line.trim().split_once(CHANGED_OWNERSHIP)?;
        let (path, _) = rest.split_once(ROOT_TO_AGENT)?;
        let path = path.trim_matches(|c| matches!(c, '\'' | '‘' | '’'));

        let Some(relative) = path.strip_prefix(&self.build_dir) else {
            tracing::warn!(host, path, "Ignoring repaired path outside build workspaces");
            return None;
        };

        let (key, local_path) = match relative.split_once('/') {
            Some((key, local)) if !local.is_empty() => (key, local),
            _ => (relative.trim_end_matches('/'), "."),
        };
        let Some(kind) = WorkspaceKind::classify(key) else {
            tracing::warn!(host, key, "Ignoring workspace that is neither a job nor a deployment");
            return None;
        };

        Some(ChownedPath {
            host: host.to_string(),
            key: key.to_string(),
            kind,
            local_path: local_path.to_string(),
        })
    }

    /// Parse every line of one agent's log.
    pub fn parse<R: BufRead>(&self, host: &str, reader: R) -> Result<ChownLog> {
        let mut log = ChownLog::default();
        for line in reader.lines() {
            let line = line?;
            if !(line.contains(CHANGED_OWNERSHIP) && line.contains(ROOT_TO_AGENT)) {
                continue;
            }
            match self.parse_line(host, &line) {
                Some(path) => log.paths.push(path),
                None => log.ignored += 1,
            }
        }
        Ok(log)
    }

    /// Parse every `*_bamboo-home-assets-chowned.log` file in `dir`.
    pub fn parse_dir(&self, dir: &Path) -> Result<ChownLog> {
        let pattern = format!(
            "{}/*{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            LOG_SUFFIX
        );
        let mut files: Vec<_> = glob::glob(&pattern)
            .map_err(|e| Error::Storage(format!("invalid log pattern {}: {}", pattern, e)))?
            .flatten()
            .collect();
        files.sort();

        let mut combined = ChownLog::default();
        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(host) = host_from_log_name(&name) else {
                tracing::warn!(file = %file.display(), "Skipping log without a host name");
                continue;
            };
            let reader = std::fs::File::open(file)
                .map(std::io::BufReader::new)
                .map_err(|e| Error::Storage(format!("cannot read {}: {}", file.display(), e)))?;
            let log = self.parse(&host, reader)?;
            combined.ignored += log.ignored;
            combined.paths.extend(log.paths);
        }

        tracing::info!(
            dir = %dir.display(),
            logs = files.len(),
            paths = combined.paths.len(),
            ignored = combined.ignored,
            "Parsed agent chown logs"
        );
        Ok(combined)
    }
}

/// Agent short host name from a log file name such as
/// `todays_agent-7.ci.example.net_bamboo-home-assets-chowned.log`.
pub fn host_from_log_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(LOG_SUFFIX)?;
    let host = stem.rsplit('_').next()?;
    let short = host.split('.').next().unwrap_or(host);
    (!short.is_empty()).then(|| short.to_string())
}

/// Group repaired paths by workspace key, ordered by key.
pub fn group_by_workspace(log: &ChownLog) -> Vec<PoisonedWorkspace> {
    let mut grouped: BTreeMap<&str, PoisonedWorkspace> = BTreeMap::new();
    let mut path_counts: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for path in &log.paths {
        let workspace = grouped
            .entry(path.key.as_str())
            .or_insert_with(|| PoisonedWorkspace {
                key: path.key.clone(),
                kind: path.kind,
                workspace: format!("xml-data/build-dir/{}", path.key),
                link: workspace_link(&path.key, path.kind),
                hosts: Vec::new(),
                local_paths: Vec::new(),
                omitted_paths: 0,
            });
        if !workspace.hosts.contains(&path.host) {
            workspace.hosts.push(path.host.clone());
        }

        let distinct = path_counts.entry(path.key.as_str()).or_default();
        if !distinct.contains(&path.local_path.as_str()) {
            distinct.push(path.local_path.as_str());
        }
    }

    for (key, paths) in path_counts {
        if let Some(workspace) = grouped.get_mut(key) {
            workspace.omitted_paths = paths.len().saturating_sub(MAX_LISTED_PATHS);
            workspace.local_paths = paths
                .into_iter()
                .take(MAX_LISTED_PATHS)
                .map(str::to_string)
                .collect();
        }
    }

    grouped.into_values().collect()
}

fn workspace_link(key: &str, kind: WorkspaceKind) -> String {
    match kind {
        WorkspaceKind::BuildJob => format!("/browse/{}/latest", key),
        WorkspaceKind::Deployment => {
            let environment = key.split('-').nth(1).unwrap_or(key);
            format!("/deploy/viewEnvironment.action?id={}", environment)
        }
    }
}
