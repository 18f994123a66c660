//! Snapshot storage for cihealth
//!
//! This module provides a SQLite copy of CI server state with:
//! - Schema migrations
//! - Import operations for plans, results, artifacts and retention policies
//! - A read-only [`BuildStore`](crate::source::BuildStore) implementation

pub mod repo;
pub mod schema;

pub use repo::SnapshotDatabase;
