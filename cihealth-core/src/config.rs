//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/cihealth/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/cihealth/` (~/.config/cihealth/)
//! - Data: `$XDG_DATA_HOME/cihealth/` (~/.local/share/cihealth/)
//! - State/Logs: `$XDG_STATE_HOME/cihealth/` (~/.local/state/cihealth/)
//!
//! Rule tables are kept as raw data here and validated by
//! [`RuleSet::from_config`](crate::analytics::RuleSet::from_config), so that
//! an unknown finding kind is reported as a configuration error instead of a
//! parse failure.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Extraction behavior
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Rule overrides keyed by finding kind (e.g. `excessive-retention`)
    #[serde(default)]
    pub rules: BTreeMap<String, RuleSettings>,

    /// Report options
    #[serde(default)]
    pub report: ReportConfig,

    /// Artifact storage scan options
    #[serde(default)]
    pub storage: StorageConfig,

    /// Build agent ownership-repair logs
    #[serde(default)]
    pub agents: AgentLogConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How strictly the extractor requires a point-in-time view of the store.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyMode {
    /// The store must pin a single snapshot across all fetches
    #[default]
    Strict,
    /// Proceed without a pinned snapshot if the store cannot provide one
    BestEffort,
}

impl ConsistencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Strict => "strict",
            ConsistencyMode::BestEffort => "best-effort",
        }
    }
}

/// Extraction configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Snapshot consistency mode
    #[serde(default)]
    pub consistency: ConsistencyMode,

    /// Records requested per page when fetching from the store
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::default(),
            page_size: default_page_size(),
        }
    }
}

impl AnalysisConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Configuration(
                "analysis.page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_page_size() -> usize {
    500
}

/// Raw settings for one health rule.
///
/// Every key other than `weight`, `cap`, `enabled` and `scope` is treated as
/// a named threshold, e.g. `max_results = 1000`.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct RuleSettings {
    /// Multiplier applied to the normalized excess
    pub weight: Option<f64>,

    /// Ceiling on the normalized excess
    pub cap: Option<f64>,

    /// Set to `false` to skip the rule entirely
    pub enabled: Option<bool>,

    /// Rule-specific evaluation scope (e.g. `plan-total` or `per-artifact`)
    pub scope: Option<String>,

    /// Named thresholds
    #[serde(flatten)]
    pub thresholds: BTreeMap<String, f64>,
}

/// Report configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportConfig {
    /// Base URL of the CI server, used to build absolute plan links
    pub base_url: Option<String>,
}

/// Artifact storage scan configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the server's shared artifact directory
    /// (e.g. `/opt/bamboo-home/shared/artifacts`)
    pub artifact_root: Option<PathBuf>,

    /// Directory names under the root that are never reported as orphans
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Plan directories at or below this size are left out of the report
    #[serde(default = "default_min_plan_bytes")]
    pub min_plan_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_root: None,
            ignored_dirs: default_ignored_dirs(),
            min_plan_bytes: default_min_plan_bytes(),
        }
    }
}

fn default_ignored_dirs() -> Vec<String> {
    vec!["tmp".to_string(), "globalStorage".to_string()]
}

fn default_min_plan_bytes() -> u64 {
    1024 * 1024
}

/// Build agent log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentLogConfig {
    /// Directory holding the daily `chown` logs collected from each agent
    pub chown_log_dir: Option<PathBuf>,

    /// Agent home directory as it appears in the logs
    #[serde(default = "default_agent_home")]
    pub agent_home: String,
}

impl Default for AgentLogConfig {
    fn default() -> Self {
        Self {
            chown_log_dir: None,
            agent_home: default_agent_home(),
        }
    }
}

fn default_agent_home() -> String {
    "/home/bamboo/bamboo-agent-home".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Level mirrored to stderr
    #[serde(default = "default_stderr_level")]
    pub stderr_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr_level: default_stderr_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

fn default_stderr_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("failed to parse config: {}", e)))?;
        config.analysis.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/cihealth/config.toml` (~/.config/cihealth/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("cihealth").join("config.toml")
    }

    /// Returns the data directory path (for the snapshot database)
    ///
    /// `$XDG_DATA_HOME/cihealth/` (~/.local/share/cihealth/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("cihealth")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/cihealth/` (~/.local/state/cihealth/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("cihealth")
    }

    /// Returns the snapshot database file path
    ///
    /// `$XDG_DATA_HOME/cihealth/snapshot.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("snapshot.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/cihealth/cihealth.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("cihealth.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.consistency, ConsistencyMode::Strict);
        assert_eq!(config.analysis.page_size, 500);
        assert!(config.rules.is_empty());
        assert_eq!(config.storage.ignored_dirs, vec!["tmp", "globalStorage"]);
        assert_eq!(config.storage.min_plan_bytes, 1_048_576);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[analysis]
consistency = "best-effort"
page_size = 100

[rules.excessive-retention]
weight = 2.0
max_results = 1000
overrun_ratio = 1.5

[rules.oversized-artifact-total]
scope = "per-artifact"
max_bytes = 1073741824

[report]
base_url = "https://bamboo.example.com"

[storage]
min_plan_bytes = 0

[agents]
chown_log_dir = "/var/lib/cihealth/chown-logs"

[logging]
level = "debug"
"#;
        let config = Config::parse(toml).unwrap();

        assert_eq!(config.analysis.consistency, ConsistencyMode::BestEffort);
        assert_eq!(config.analysis.page_size, 100);

        let retention = &config.rules["excessive-retention"];
        assert_eq!(retention.weight, Some(2.0));
        assert_eq!(retention.thresholds.get("max_results"), Some(&1000.0));
        assert_eq!(retention.thresholds.get("overrun_ratio"), Some(&1.5));
        assert!(!retention.thresholds.contains_key("weight"));

        let oversized = &config.rules["oversized-artifact-total"];
        assert_eq!(oversized.scope.as_deref(), Some("per-artifact"));

        assert_eq!(
            config.report.base_url.as_deref(),
            Some("https://bamboo.example.com")
        );
        assert_eq!(config.storage.min_plan_bytes, 0);
        assert_eq!(
            config.agents.chown_log_dir,
            Some(PathBuf::from("/var/lib/cihealth/chown-logs"))
        );
        assert_eq!(config.agents.agent_home, "/home/bamboo/bamboo-agent-home");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.stderr_level, "warn");
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = Config::parse("[analysis]\npage_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = Config::parse("[rules.stale-plan\nweight = 1").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_paths_are_namespaced() {
        assert!(Config::config_path().ends_with("cihealth/config.toml"));
        assert!(Config::database_path().ends_with("cihealth/snapshot.db"));
        assert!(Config::log_path().ends_with("cihealth/cihealth.log"));
    }
}
