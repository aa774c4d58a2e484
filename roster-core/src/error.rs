//! Error types for ROSTER operations

use std::time::Duration;
use thiserror::Error;

/// Storage, indexing and synchronization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Key {key} is not under root {root}")]
    KeyOutOfRoot { key: String, root: String },

    #[error("Backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Decode failed for key {key}: {reason}")]
    DecodeFailure { key: String, reason: String },

    #[error("Unknown data type: {type_name}")]
    UnknownType { type_name: String },

    #[error("Watch failed for {type_name}: {reason}")]
    WatchFailed { type_name: String, reason: String },

    #[error("Revision {revision} has been compacted (compacted up to {compacted})")]
    Compacted { revision: i64, compacted: i64 },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Store is stopped")]
    Stopped,
}

/// Add-on installation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddOnError {
    #[error("Invalid add-on: {reason}")]
    InvalidAddOn { reason: String },

    #[error("Add-on {name} is already installed")]
    DuplicateAddOn { name: String },
}

/// Lease renewal errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Failed to submit renewal for {key}: {reason}")]
    RenewalSubmitFailed { key: String, reason: String },

    #[error("No handled renewal for {key}")]
    RenewalNotFound { key: String },

    #[error("Lease {key} not found")]
    LeaseNotFound { key: String },

    #[error("Renewal of {key} failed: {reason}")]
    RenewalFailed { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ROSTER errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Add-on error: {0}")]
    AddOn(#[from] AddOnError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ROSTER operations.
pub type RosterResult<T> = Result<T, RosterError>;

pub type StorageResult<T> = Result<T, StorageError>;

pub type LeaseResult<T> = Result<T, LeaseError>;
