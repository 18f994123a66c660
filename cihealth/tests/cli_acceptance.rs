use chrono::{DateTime, Duration, TimeZone, Utc};
use cihealth_core::{
    Artifact, ArtifactSize, BuildPlan, BuildResult, BuildStatus, PlanKind, RetentionPolicy,
    RetentionRule, Snapshot, SnapshotDatabase,
};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

const NOW: &str = "2024-06-01T00:00:00Z";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("cihealth/snapshot.db")
    }

    fn seed(&self, snapshot: &Snapshot) {
        let db = SnapshotDatabase::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db.import_snapshot(snapshot).expect("failed to import snapshot");
    }

    fn write_config(&self, content: &str) -> PathBuf {
        let path = self.xdg_config.join("cihealth/config.toml");
        fs::create_dir_all(path.parent().expect("config parent")).expect("config dir");
        fs::write(&path, content).expect("failed to write config");
        path
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("cihealth"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute cihealth: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "cihealth {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    );
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// One plan keeping 60 results against a policy of 10, one healthy plan.
fn fixture() -> Snapshot {
    let plan = |id: &str, key: &str, policy: Option<&str>| BuildPlan {
        id: id.to_string(),
        key: key.to_string(),
        name: format!("{key} build"),
        project_key: "NW".to_string(),
        kind: PlanKind::Chain,
        retention_policy_id: policy.map(str::to_string),
    };

    let mut results = Vec::new();
    let mut artifacts = Vec::new();
    for i in 0..60 {
        let result_id = format!("r{i}");
        let artifact_id = format!("a{i}");
        results.push(BuildResult {
            id: result_id.clone(),
            plan_id: "100".to_string(),
            status: BuildStatus::Success,
            created_at: now() - Duration::days(60 - i),
            duration_ms: 90_000,
            artifact_ids: vec![artifact_id.clone()],
        });
        artifacts.push(Artifact {
            id: artifact_id,
            result_id,
            name: "dist".to_string(),
            pattern: "dist/*.tar.gz".to_string(),
            size: ArtifactSize::Known {
                bytes: 1024 * 1024,
                files: 1,
            },
        });
    }
    results.push(BuildResult {
        id: "h1".to_string(),
        plan_id: "200".to_string(),
        status: BuildStatus::Success,
        created_at: now() - Duration::days(1),
        duration_ms: 30_000,
        artifact_ids: vec![],
    });

    Snapshot {
        plans: vec![
            plan("100", "NW-HEAVY", Some("rp-10")),
            plan("200", "NW-LIGHT", None),
        ],
        results,
        artifacts,
        policies: vec![RetentionPolicy {
            id: "rp-10".to_string(),
            rule: RetentionRule::Expire {
                max_results: Some(10),
                max_age_days: None,
            },
        }],
    }
}

#[test]
fn json_report_ranks_flagged_plan() {
    let env = CliTestEnv::new();
    env.seed(&fixture());

    let args = ["--now", NOW, "--format", "json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let entries = report["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 1, "only the heavy plan should be flagged");
    assert_eq!(entries[0]["plan_key"], "NW-HEAVY");
    assert_eq!(entries[0]["kinds"][0], "excessive-retention");
    assert_eq!(report["summary"]["plans_analyzed"], 2);
    assert_eq!(report["generated_at"], "2024-06-01T00:00:00Z");
}

#[test]
fn text_report_is_deterministic() {
    let env = CliTestEnv::new();
    env.seed(&fixture());

    let args = ["--now", NOW];
    let first = run_bin(&env, &args);
    assert_success(&args, &first);
    let second = run_bin(&env, &args);
    assert_success(&args, &second);

    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("NW-HEAVY"), "got:\n{stdout}");
    assert!(stdout.contains("Fingerprint:"));
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn config_file_can_disable_a_rule() {
    let env = CliTestEnv::new();
    env.seed(&fixture());
    let config = env.write_config(
        r#"
[rules.excessive-retention]
enabled = false
"#,
    );
    let config = config.to_string_lossy().into_owned();

    let args = ["--config", config.as_str(), "--now", NOW, "--format", "json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert!(report["entries"].as_array().expect("entries").is_empty());
}

#[test]
fn unknown_rule_kind_fails_before_reading_database() {
    let env = CliTestEnv::new();
    let config = env.write_config("[rules.flaky-tests]\nweight = 1.0\n");
    let config = config.to_string_lossy().into_owned();

    let output = run_bin(&env, &["--config", config.as_str(), "--now", NOW]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("flaky-tests"), "got:\n{stderr}");
}

#[test]
fn list_rules_prints_every_kind() {
    let env = CliTestEnv::new();

    let args = ["--list-rules"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    for kind in [
        "excessive-retention",
        "oversized-artifact-total",
        "unscoped-artifact-pattern",
        "stale-plan",
    ] {
        assert!(stdout.contains(kind), "missing {kind} in:\n{stdout}");
    }
}

#[test]
fn artifact_root_reports_plan_usage_and_orphans() {
    let env = CliTestEnv::new();
    env.seed(&fixture());

    let root = env.home.join("bamboo/shared/artifacts");
    for (dir, bytes) in [("plan-100", 2 * 1024 * 1024), ("plan-999", 2048), ("tmp", 4096)] {
        fs::create_dir_all(root.join(dir)).expect("artifact dir");
        fs::write(root.join(dir).join("blob.bin"), vec![0u8; bytes]).expect("artifact file");
    }
    let root = root.to_string_lossy().into_owned();

    let args = ["--now", NOW, "--artifact-root", root.as_str(), "--format", "json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    let plans = report["plan_storage"].as_array().expect("plan storage");
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0]["plan_key"], "NW-HEAVY");
    assert_eq!(plans[0]["browse_path"], "/browse/NW-HEAVY");
    assert_eq!(plans[0]["size_bytes"], 2 * 1024 * 1024);

    let orphans = report["orphaned_storage"].as_array().expect("orphans");
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["name"], "plan-999");
    assert_eq!(orphans[0]["size_bytes"], 2048);
}

#[test]
fn chown_logs_report_root_owned_workspaces() {
    let env = CliTestEnv::new();
    env.seed(&fixture());

    let logs = env.home.join("chown-logs");
    fs::create_dir_all(&logs).expect("log dir");
    fs::write(
        logs.join("todays_agent-1.ci.example.net_bamboo-home-assets-chowned.log"),
        "\"changed ownership of '/home/bamboo/bamboo-agent-home/xml-data/build-dir/121667587-121602106/deployment.vars' from root:root to bamboo:bamboo\"\n",
    )
    .expect("log file");
    let logs = logs.to_string_lossy().into_owned();

    let args = ["--now", NOW, "--chown-logs", logs.as_str(), "--format", "json"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    let workspaces = report["root_poisoned_workspaces"]
        .as_array()
        .expect("workspaces");
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0]["kind"], "deployment");
    assert_eq!(workspaces[0]["hosts"][0], "agent-1");
    assert_eq!(
        workspaces[0]["link"],
        "/deploy/viewEnvironment.action?id=121602106"
    );
}

#[test]
fn foreign_database_is_rejected_untouched() {
    let env = CliTestEnv::new();
    let db_path = env.xdg_data.join("foreign.db");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("foreign db");
        conn.execute_batch("CREATE TABLE builds (id INTEGER);")
            .expect("foreign table");
    }
    let db = db_path.to_string_lossy().into_owned();

    let output = run_bin(&env, &["--db", db.as_str(), "--now", NOW]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("schema version"), "got:\n{stderr}");

    let conn = rusqlite::Connection::open(&db_path).expect("reopen");
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(version, 0);
    let tables: i64 = conn
        .query_row("SELECT count(*) FROM sqlite_master WHERE type = 'table'", [], |row| {
            row.get(0)
        })
        .expect("table count");
    assert_eq!(tables, 1);
}

#[test]
fn invalid_now_is_rejected() {
    let env = CliTestEnv::new();
    env.seed(&fixture());

    let output = run_bin(&env, &["--now", "yesterday"]);
    assert!(!output.status.success());
}
