//! ROSTER Core - Registry Data Types
//!
//! Pure data structures shared by every other crate: key-value entries,
//! query options, change events, registry objects, configuration and the
//! error taxonomy. This crate contains no I/O.

pub mod config;
pub mod error;
pub mod event;
pub mod types;
pub mod value;

pub use config::{ListWatchConfig, RetryConfig, RosterConfig};
pub use error::{
    AddOnError, ConfigError, LeaseError, LeaseResult, RosterError, RosterResult, StorageError,
    StorageResult,
};
pub use event::{ChangeEvent, EventType, EventTypeParseError, KvEvent, ResumePoint};
pub use types::{KeyValue, QueryOptions, QueryResult, RawKeyValue, Revision};
pub use value::{Instance, Service, Value};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
