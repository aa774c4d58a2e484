//! Backend capability: the authoritative revisioned key-value store.
//!
//! Concrete wire drivers live outside this crate. Everything here talks to
//! a backend only through [`Backend`]; [`crate::MemoryBackend`] is the
//! in-process implementation used for embedding and tests.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use roster_core::{EventType, LeaseResult, QueryOptions, RawKeyValue, Revision, StorageResult};

/// Response of a single range read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// Store revision the read was served at.
    pub revision: Revision,
    /// Total matches before pagination.
    pub count: i64,
    pub kvs: Vec<RawKeyValue>,
}

/// Change to one key as reported by the backend's watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub revision: Revision,
    pub action: EventType,
    pub kv: RawKeyValue,
}

pub type RawEventStream = BoxStream<'static, StorageResult<RawEvent>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Read honoring key, prefix, revision, pagination and the
    /// key-only/count-only shape flags.
    async fn range(&self, opts: &QueryOptions) -> StorageResult<RawResponse>;

    /// Ordered change stream for keys under `prefix`, starting at
    /// `from_revision` (inclusive).
    async fn watch(&self, prefix: &[u8], from_revision: Revision) -> StorageResult<RawEventStream>;

    /// Renew the lease attached to `lease_key`, returning its TTL in seconds.
    async fn keep_alive(&self, lease_key: &[u8]) -> LeaseResult<i64>;
}
