use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::validate::ValidationError;

#[derive(Debug, Error, Diagnostic)]
pub enum ConnectorError {
    #[error("missing required environment variables for {mode} mode: {}", .missing.join(", "))]
    #[diagnostic(help("set the variables in the environment or a .env file"))]
    MissingEnv { mode: String, missing: Vec<String> },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("unknown storage backend: {0} (expected local, remote or catalog)")]
    UnknownBackend(String),

    #[error("unknown region type: {0}")]
    UnknownRegion(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{method} {url} returned status {status}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
    },

    #[error("object store request failed: {0}")]
    ObjectStore(String),

    #[error("object store returned status {status} for {key}: {message}")]
    ObjectStoreStatus {
        key: String,
        status: u16,
        message: String,
    },

    #[error("raw asset '{0}' not found")]
    RawNotFound(String),

    #[error("no table found for dataset {0}")]
    TableNotFound(String),

    #[error("invalid upload mode '{0}': must be append, overwrite or merge")]
    InvalidMode(String),

    #[error("merge_key is required when mode is merge")]
    MissingMergeKey,

    #[error("merge key column '{0}' is missing from the table")]
    MergeKeyColumn(String),

    #[error("column {column} changes type from {existing} to {incoming}")]
    SchemaMismatch {
        column: String,
        existing: String,
        incoming: String,
    },

    #[error("column lengths differ: {0}")]
    RaggedTable(String),

    #[error("invalid columns in descriptions: {}", .0.join(", "))]
    InvalidDescriptionColumns(Vec<String>),

    #[error("missing required metadata field: {0}")]
    MissingMetadataField(String),

    #[error("snapshot conflict on {table}: expected parent {expected:?}, found {found:?}")]
    SnapshotConflict {
        table: String,
        expected: Option<i64>,
        found: Option<i64>,
    },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("cannot parse date column header '{0}'")]
    InvalidDate(String),

    #[error("columnar encoding failed: {0}")]
    Columnar(String),

    #[error("failed to parse JSON: {0}")]
    Json(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read {0}")]
    FileRead(PathBuf),

    #[error("failed to start pipeline process: {0}")]
    Spawn(String),

    #[error(transparent)]
    #[diagnostic(code(connector::validation))]
    Validation(#[from] ValidationError),

    #[error("{failed} of {total} transform slices failed")]
    SlicesFailed { failed: usize, total: usize },
}

impl From<csv::Error> for ConnectorError {
    fn from(err: csv::Error) -> Self {
        ConnectorError::Csv(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectorError::Catalog(err.to_string())
    }
}
