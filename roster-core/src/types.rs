//! Key-value entries, query options and query results.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Backend revision number. 0 means "latest" in query options.
pub type Revision = i64;

// ============================================================================
// KEY VALUES
// ============================================================================

/// Undecoded entry exactly as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: i64,
    pub create_revision: Revision,
    pub mod_revision: Revision,
}

impl RawKeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version: 0,
            create_revision: 0,
            mod_revision: 0,
        }
    }
}

/// Decoded entry held by the mirror and returned from queries.
///
/// `value` is `None` for key-only results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Option<Value>,
    pub version: i64,
    pub create_revision: Revision,
    pub mod_revision: Revision,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            version: 0,
            create_revision: 0,
            mod_revision: 0,
        }
    }

    /// Build an entry carrying only the key.
    pub fn key_only(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            version: 0,
            create_revision: 0,
            mod_revision: 0,
        }
    }

    /// Copy version and revisions from the raw entry this was decoded from.
    pub fn with_meta_from(mut self, raw: &RawKeyValue) -> Self {
        self.version = raw.version;
        self.create_revision = raw.create_revision;
        self.mod_revision = raw.mod_revision;
        self
    }

    pub fn with_mod_revision(mut self, revision: Revision) -> Self {
        self.mod_revision = revision;
        self
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Drop the value, keeping key and metadata.
    pub fn strip_value(mut self) -> Self {
        self.value = None;
        self
    }
}

// ============================================================================
// QUERY OPTIONS
// ============================================================================

/// Options for a single indexer search.
///
/// Explicit revision, pagination or `no_cache` force the query past the
/// mirror. `count_only` takes precedence over `key_only`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub key: Vec<u8>,
    pub prefix: bool,
    pub revision: Revision,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub key_only: bool,
    pub count_only: bool,
    pub cache_only: bool,
    pub no_cache: bool,
}

impl QueryOptions {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_key_only(mut self) -> Self {
        self.key_only = true;
        self
    }

    pub fn with_count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn with_cache_only(mut self) -> Self {
        self.cache_only = true;
        self
    }

    pub fn with_no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// True when `key` is selected by these options.
    pub fn selects(&self, key: &[u8]) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key.as_slice()
        }
    }
}

// ============================================================================
// QUERY RESULT
// ============================================================================

/// Result of an indexer search.
///
/// `count` is the number of matches even when `entries` is empty
/// (count-only) or shorter (entries that failed to decode).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub count: i64,
    pub revision: Revision,
    pub entries: Vec<KeyValue>,
}

impl QueryResult {
    pub fn empty(revision: Revision) -> Self {
        Self {
            count: 0,
            revision,
            entries: Vec::new(),
        }
    }

    pub fn from_entries(entries: Vec<KeyValue>, revision: Revision) -> Self {
        Self {
            count: entries.len() as i64,
            revision,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Apply the shape options of a query to an already-matched result.
    pub fn shaped_by(mut self, opts: &QueryOptions) -> Self {
        if opts.count_only {
            self.entries.clear();
        } else if opts.key_only {
            self.entries = self.entries.into_iter().map(KeyValue::strip_value).collect();
        }
        self
    }
}
