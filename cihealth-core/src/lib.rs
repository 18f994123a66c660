//! # cihealth-core
//!
//! Core library for cihealth - a health report engine for CI servers.
//!
//! This library provides:
//! - Domain types for build plans, results, artifacts and retention policies
//! - A read-only fetch capability ([`BuildStore`]) with a SQLite snapshot store
//! - Aggregation, rule evaluation and report assembly
//! - Artifact disk usage and root-owned agent workspace reports
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! One analysis pass runs four stages, each consuming the previous stage's
//! complete output:
//! - **Extract:** page every record kind out of the store into a [`Snapshot`]
//! - **Aggregate:** per-plan [`PlanMetrics`](analytics::PlanMetrics)
//! - **Evaluate:** weighted, capped severity per plan
//! - **Assemble:** a ranked [`HealthReport`](analytics::HealthReport)
//!
//! The engine never reads the system clock: "now" is injected by the caller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cihealth_core::{Config, HealthEngine, SnapshotDatabase};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = SnapshotDatabase::open_read_only(&Config::database_path())
//!     .expect("failed to open database");
//!
//! let engine = HealthEngine::new(&config).expect("invalid rules");
//! let report = engine.run(&db, chrono::Utc::now()).expect("analysis failed");
//! println!("{} plans flagged", report.entries.len());
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{HealthEngine, HealthReport};
pub use config::Config;
pub use db::SnapshotDatabase;
pub use error::{Error, Result};
pub use source::{BuildStore, MemoryStore};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod root_poisoning;
pub mod source;
pub mod storage;
pub mod types;
