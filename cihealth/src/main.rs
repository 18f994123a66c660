//! cihealth - CLI tool to produce health reports for a CI server
//!
//! Reads a snapshot database of CI state, runs the health engine and prints
//! the ranked report as text or JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cihealth_core::analytics::{all_metrics, HealthReport};
use cihealth_core::format::{format_age_opt, format_bytes};
use cihealth_core::{Config, HealthEngine, SnapshotDatabase};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "cihealth")]
#[command(about = "Rank CI build plans by storage and retention health")]
#[command(version)]
struct Args {
    /// Snapshot database to analyze (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Configuration file (defaults to ~/.config/cihealth/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reference time for ages, as RFC 3339 (defaults to the current time)
    #[arg(long)]
    now: Option<String>,

    /// Shared artifact directory to size per plan and scan for orphans
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    /// Directory of agent chown logs to scan for root-owned workspaces
    #[arg(long)]
    chown_logs: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// List health rules and their effective settings without running analysis
    #[arg(long)]
    list_rules: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    // Initialize logging
    let log_guard =
        cihealth_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Rules are validated before anything is read
    let engine = HealthEngine::new(&config)
        .context("invalid health rule configuration")?
        .with_artifact_root(args.artifact_root.clone())
        .with_chown_log_dir(args.chown_logs.clone());

    if args.list_rules {
        print_rules(&engine);
        return Ok(());
    }

    let now = reference_time(args.now.as_deref())?;

    // Open database; analysis never writes to it
    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    if !db_path.exists() {
        anyhow::bail!("snapshot database not found at {}", db_path.display());
    }
    let db = SnapshotDatabase::open_read_only(&db_path).context("failed to open snapshot database")?;

    tracing::info!(db = %db_path.display(), %now, "Analyzing snapshot database");
    let report = engine.run(&db, now).with_context(|| {
        format!(
            "health analysis failed (logs in {})",
            log_guard.log_dir().display()
        )
    })?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report)?,
    }

    Ok(())
}

/// Parse `--now`, or read the system clock.
fn reference_time(now: Option<&str>) -> Result<DateTime<Utc>> {
    match now {
        Some(value) => Ok(DateTime::parse_from_rfc3339(value)
            .with_context(|| format!("invalid --now value '{}', expected RFC 3339", value))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn print_rules(engine: &HealthEngine) {
    println!("Health rules:");
    for (rule, resolved) in engine.rules().iter() {
        println!(
            "  {} (weight {}, cap {}{})",
            resolved.kind,
            resolved.weight,
            resolved.cap,
            if rule.supports_scope() {
                format!(", scope {}", resolved.scope.as_str())
            } else {
                String::new()
            }
        );
        for spec in rule.thresholds() {
            println!(
                "    {:<20} {:>14}  {}",
                spec.name,
                resolved.threshold(spec.name),
                spec.summary
            );
        }
    }

    println!();
    println!("Supporting metrics:");
    for metric in all_metrics() {
        println!(
            "  {:<30} {:<13} {}",
            metric.name,
            metric.unit.as_str(),
            metric.summary
        );
    }
}

fn print_report(report: &HealthReport) -> Result<()> {
    let summary = &report.summary;
    println!("CI health report ({})", report.generated_at.to_rfc3339());
    println!(
        "Analyzed {} plans, {} results, {} artifacts",
        summary.plans_analyzed, summary.results_analyzed, summary.artifacts_analyzed
    );
    println!("Fingerprint: {}", report.fingerprint()?);
    println!();

    if report.is_healthy() {
        println!("No findings: every plan is within its thresholds.");
    } else {
        println!("{} plan(s) flagged:", summary.plans_flagged);
        for (kind, count) in &summary.findings_by_kind {
            println!("  {:<28} {}", kind.as_str(), count);
        }
        println!();

        for entry in &report.entries {
            let kinds: Vec<_> = entry.kinds.iter().map(|k| k.as_str()).collect();
            println!(
                "{:>3}. {} [{}] {} severity {:.2}",
                entry.rank, entry.plan_key, entry.plan_type, entry.plan_name, entry.severity
            );
            println!("     kinds: {}", kinds.join(", "));
            println!(
                "     results: {}  artifacts: {} ({} unresolved)  oldest: {}  newest: {}",
                entry.metrics.result_count,
                format_bytes(entry.metrics.total_artifact_bytes),
                entry.metrics.unresolved_artifact_count,
                format_age_opt(entry.metrics.oldest_result_age_secs),
                format_age_opt(entry.metrics.newest_result_age_secs),
            );
            if let Some(url) = &entry.url {
                println!("     {}", url);
            }
            for line in &entry.rationale {
                println!("     - {}", line);
            }
        }
    }

    if !report.plan_storage.is_empty() {
        println!();
        println!("Plans by artifact disk usage:");
        for plan in &report.plan_storage {
            println!(
                "  {:>8}  {:<6} {} {}  {}",
                format_bytes(plan.size_bytes),
                plan.plan_type,
                plan.plan_key,
                plan.plan_name,
                plan.browse_path
            );
        }
    }

    if !report.orphaned_storage.is_empty() {
        println!();
        println!(
            "Orphaned artifact directories: {} ({})",
            report.orphaned_storage.len(),
            format_bytes(report.orphaned_bytes())
        );
        for orphan in &report.orphaned_storage {
            println!(
                "  {:>8}  {}",
                format_bytes(orphan.size_bytes),
                orphan.path.display()
            );
        }
    }

    if !report.root_poisoned_workspaces.is_empty() {
        println!();
        println!(
            "Workspaces left with root-owned files: {}",
            report.root_poisoned_workspaces.len()
        );
        for workspace in &report.root_poisoned_workspaces {
            println!("  {}  {}", workspace.key, workspace.link);
            println!("     agents: {}", workspace.hosts.join(", "));
            println!("     {}/: {}", workspace.workspace, workspace.paths_summary());
        }
    }

    Ok(())
}
