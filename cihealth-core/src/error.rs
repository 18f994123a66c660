//! Error types for cihealth-core

use thiserror::Error;

/// Main error type for the cihealth-core library
///
/// `DataSource`, `Configuration` and `Integrity` abort an analysis run: the
/// engine never produces a partial report once one of them is raised.
#[derive(Error, Debug)]
pub enum Error {
    /// Extraction failed: connectivity, malformed record or schema mismatch
    #[error("data source error: {0}")]
    DataSource(String),

    /// Invalid rule set or configuration file
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dangling reference discovered while aggregating a snapshot
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Artifact storage scan error
    #[error("storage scan error: {0}")]
    Storage(String),
}

impl Error {
    /// Re-label an infrastructure failure raised while fetching `what` as a
    /// data source error. Errors that already carry a run-aborting category
    /// are passed through unchanged.
    pub fn into_data_source(self, what: &str) -> Self {
        match self {
            Error::DataSource(_) | Error::Configuration(_) | Error::Integrity(_) => self,
            other => Error::DataSource(format!("{what}: {other}")),
        }
    }
}

/// Result type alias for cihealth-core
pub type Result<T> = std::result::Result<T, Error>;
