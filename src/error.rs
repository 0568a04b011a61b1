use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::app::{IngestPhase, RunStats};

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("format detection failed: {0}")]
    #[diagnostic(help("pass an explicit column mapping with --id-column/--value-column"))]
    Detection(String),

    #[error("invalid patient id: {0}")]
    #[diagnostic(help("patient ids must be 1-48 characters of [A-Za-z0-9_]"))]
    InvalidPatientId(String),

    #[error("row {row}: identifier `{identifier}` not found in reference catalog")]
    UnresolvedIdentifier { row: usize, identifier: String },

    #[error("row {row}: invalid fold change value `{value}`")]
    InvalidValue { row: usize, value: String },

    #[error("match rate {rate:.3} is below the required minimum {threshold:.3}")]
    #[diagnostic(help("check that the file uses the same species and identifier namespace as the catalog"))]
    LowMatchRate { rate: f64, threshold: f64 },

    #[error("namespace {namespace} has an incompatible layout: {message}")]
    #[diagnostic(help("inspect the namespace manually; drop it to re-provision"))]
    SchemaConflict { namespace: String, message: String },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("database busy or timed out: {0}")]
    #[diagnostic(help("the run was rolled back and can be retried"))]
    Transient(String),

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("patient namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("failed to read input table: {0}")]
    TableRead(String),

    #[error("reference catalog error: {0}")]
    Catalog(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    /// Transient failures leave no trace in the database and may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KiraError::Transient(_) | KiraError::Cancelled)
    }
}

/// A run-level failure together with everything collected before it happened.
#[derive(Debug, Error, Diagnostic)]
#[error("ingestion failed during {phase}")]
pub struct IngestionFailure {
    pub phase: IngestPhase,
    #[source]
    #[diagnostic_source]
    pub error: KiraError,
    pub stats: RunStats,
}

impl IngestionFailure {
    pub fn new(phase: IngestPhase, error: KiraError, stats: RunStats) -> Self {
        Self {
            phase,
            error,
            stats,
        }
    }
}

impl From<rusqlite::Error> for KiraError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _)
                if matches!(
                    inner.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                KiraError::Transient(err.to_string())
            }
            _ => KiraError::Transaction(err.to_string()),
        }
    }
}
