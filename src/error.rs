//! Error types for td
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad input, unknown task, bad config)
//! - 3: Storage pressure (quota exceeded, payload too large)
//! - 4: Operation failed (blob store, cache install, I/O)

use std::fmt;
use std::path::PathBuf;

use serde_json::json;
use thiserror::Error;

/// Exit codes for the td CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const STORAGE_FULL: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Step of a blob store transaction that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStage {
    Setup,
    Write,
    Read,
    Delete,
}

impl fmt::Display for BlobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlobStage::Setup => "setup",
            BlobStage::Write => "write",
            BlobStage::Read => "read",
            BlobStage::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Main error type for td operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task id '{0}' matches more than one task")]
    AmbiguousTaskId(String),

    // Storage pressure (exit code 3)
    #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    StorageQuotaExceeded { needed: u64, quota: u64 },

    #[error("Image too large: {size} bytes (limit {limit} bytes)")]
    PayloadTooLarge { size: u64, limit: u64 },

    // Operation failures (exit code 4)
    #[error("Blob store {stage} failed: {message}")]
    BlobStore { stage: BlobStage, message: String },

    #[error("Cache install failed for {url}: {reason}")]
    CacheInstall { url: String, reason: String },

    #[error("Offline and no cached copy of {0}")]
    Offline(String),

    #[error("Invalid cache state: {0}")]
    CacheState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Shorthand for a blob store failure at a given stage
    pub fn blob(stage: BlobStage, message: impl Into<String>) -> Self {
        Error::BlobStore {
            stage,
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::Validation(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::TaskNotFound(_)
            | Error::AmbiguousTaskId(_) => exit_codes::USER_ERROR,

            // Storage pressure
            Error::StorageQuotaExceeded { .. } | Error::PayloadTooLarge { .. } => {
                exit_codes::STORAGE_FULL
            }

            // Operation failures
            Error::BlobStore { .. }
            | Error::CacheInstall { .. }
            | Error::Offline(_)
            | Error::CacheState(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Http(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for machine-readable output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Validation(message) | Error::InvalidConfig(message) => {
                Some(json!({ "message": message }))
            }
            Error::TaskNotFound(id) | Error::AmbiguousTaskId(id) => Some(json!({ "id": id })),
            Error::StorageQuotaExceeded { needed, quota } => {
                Some(json!({ "needed": needed, "quota": quota }))
            }
            Error::PayloadTooLarge { size, limit } => Some(json!({ "size": size, "limit": limit })),
            Error::BlobStore { stage, message } => {
                Some(json!({ "stage": stage, "message": message }))
            }
            Error::CacheInstall { url, reason } => Some(json!({ "url": url, "reason": reason })),
            Error::Offline(url) => Some(json!({ "url": url })),
            _ => None,
        }
    }

    /// True when the failure came from running out of space
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::StorageQuotaExceeded { .. })
    }
}

/// Result type alias for td operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
