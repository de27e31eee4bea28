//! Error types for the reingestion pipeline.
//!
//! Errors are grouped by how the run controller treats them: storage and
//! sink errors come from collaborators, unpack and record errors are local to
//! one outer line, and [`ReingestError`] is what a failed run reports.

use thiserror::Error;

/// Errors from the durable object store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Access denied to {bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("Failed to read object body: {0}")]
    Body(String),
}

/// Errors from the streaming delivery sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Delivery stream unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery stream throttled: {0}")]
    Throttled(String),

    #[error("{failed} of {total} records were rejected by the delivery stream")]
    PartialFailure { failed: usize, total: usize },

    #[error("Delivery stream rejected the request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to build request: {0}")]
    Build(String),
}

impl SinkError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SinkError::Unavailable(_)
                | SinkError::Throttled(_)
                | SinkError::PartialFailure { .. }
                | SinkError::Transport(_)
        )
    }
}

/// Failure to unpack one outer record into event records.
#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Outer record is not valid JSON: {0}")]
    OuterJson(#[source] serde_json::Error),

    #[error("Event record is not valid JSON: {0}")]
    InnerJson(#[source] serde_json::Error),

    #[error("Event record is not a JSON object")]
    NotAnObject,
}

/// Failure to read or update the reingestion counter of an event record.
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("Field `fields` is not an object")]
    FieldsNotObject,

    #[error("Counter `{field}` is not a non-negative integer: {value}")]
    InvalidCounter { field: String, value: String },
}

/// Either kind of failure that sends a whole outer line to quarantine.
#[derive(Error, Debug)]
pub enum LineError {
    #[error(transparent)]
    Unpack(#[from] UnpackError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Fatal outcome of a reingestion run.
#[derive(Error, Debug)]
pub enum ReingestError {
    #[error("Failed to fetch {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to deliver {entries} entries after {attempts} attempts: {source}")]
    Delivery {
        entries: usize,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error("Failed to write quarantine object {key}: {source}")]
    QuarantineDump {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
