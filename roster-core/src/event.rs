//! Change events produced by watch streams.

use crate::types::{KeyValue, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }

    /// Parse an operation name. Document stores report full-document
    /// replacement as `replace`, which is an update here.
    pub fn from_operation(s: &str) -> Result<Self, EventTypeParseError> {
        match s.to_lowercase().as_str() {
            "insert" | "create" | "put" => Ok(EventType::Insert),
            "update" | "replace" => Ok(EventType::Update),
            "delete" => Ok(EventType::Delete),
            _ => Err(EventTypeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_operation(s)
    }
}

/// Error when parsing an unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeParseError(pub String);

impl fmt::Display for EventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid event operation: {}", self.0)
    }
}

impl std::error::Error for EventTypeParseError {}

// ============================================================================
// EVENTS
// ============================================================================

/// Revision-tagged change to one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEvent {
    pub revision: Revision,
    pub action: EventType,
    pub kv: KeyValue,
}

impl KvEvent {
    pub fn new(action: EventType, kv: KeyValue, revision: Revision) -> Self {
        Self {
            revision,
            action,
            kv,
        }
    }
}

/// Change record as delivered by a document store's change stream.
///
/// On delete, `business_id` is empty and `value` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: EventType,
    pub document_id: String,
    pub business_id: String,
    pub value: Option<serde_json::Value>,
}

/// Where a watch stream resumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// First revision to deliver.
    Revision(Revision),
    /// Opaque cursor returned by the backend.
    Token(Vec<u8>),
}
