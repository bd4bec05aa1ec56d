//! Core error types for pomoloop-core.
//!
//! Each concern gets its own `thiserror` enum; [`CoreError`] wraps them for
//! callers that do not care which layer failed.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::ActiveTimePointId;

/// Core error type for pomoloop-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Looper precondition failures
    #[error("Looper error: {0}")]
    Looper(#[from] LooperError),

    /// Ledger / database errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Precondition failures reported by the looper.
///
/// None of these leave the looper in a different state than before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LooperError {
    /// The time point queue has no elements.
    #[error("time point queue is empty")]
    EmptyQueue,

    /// The operation needs an open interval (running or paused).
    #[error("no interval is active")]
    NotActive,

    /// Skipping a break was disabled by configuration.
    #[error("skipping a break is disabled")]
    SkipBreakDisabled,

    /// The operation is only allowed while stopped.
    #[error("looper must be stopped to {0}")]
    NotStopped(&'static str),

    /// Time point lookup failed.
    #[error("time point {0} is not in the queue")]
    UnknownTimePoint(uuid::Uuid),
}

/// Ledger and database errors. Always returned as a value, never panicked.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Stored event payload could not be decoded
    #[error("Corrupt work event row {id}: {message}")]
    CorruptRow { id: i64, message: String },

    /// Referenced row does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The operation was cancelled before it touched the store
    #[error("Storage operation cancelled")]
    Cancelled,

    /// The ledger writer is gone (shutdown already happened)
    #[error("Ledger writer is closed")]
    WriterClosed,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Malformed time point list
    #[error("Invalid time point list: {0}")]
    InvalidTimePoints(String),

    /// Malformed cycle pattern
    #[error("Invalid pattern '{pattern}' at position {position}: {message}")]
    InvalidPattern {
        pattern: String,
        position: usize,
        message: String,
    },
}

/// A ledger event that does not fit the reduction state.
///
/// Replay logs and skips these rather than failing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayInconsistency {
    /// `Stopped` arrived with no open interval.
    StopWithoutStart { index: usize },
    /// An adjustment arrived with no open interval.
    AdjustmentWithoutStart { index: usize },
    /// An adjustment names a different interval (or kind) than the open one.
    AdjustmentMismatch {
        index: usize,
        active_time_point_id: Option<ActiveTimePointId>,
    },
    /// An event is timestamped before the interval it closes was opened.
    WentBackInTime { index: usize, by_ms: u64 },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => match e.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    StorageError::Locked
                }
                _ => StorageError::QueryFailed(err.to_string()),
            },
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
