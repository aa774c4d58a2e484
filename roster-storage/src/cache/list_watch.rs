//! List + watch abstraction over one data type.

use crate::backend::Backend;
use crate::codec::ValueCodec;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};
use roster_core::{
    EventType, KeyValue, KvEvent, ListWatchConfig, QueryOptions, ResumePoint, Revision,
    StorageError, StorageResult,
};
use std::sync::Arc;

pub type KvEventStream = BoxStream<'static, StorageResult<KvEvent>>;

/// Full listing of a data type at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub revision: Revision,
    pub entries: Vec<KeyValue>,
    /// Where a watch must start to see every change after this listing.
    pub resume: ResumePoint,
}

/// Produces snapshots and ordered change streams for one data type.
#[async_trait]
pub trait ListWatch: Send + Sync {
    fn type_name(&self) -> &str;

    async fn list(&self) -> StorageResult<Snapshot>;

    async fn watch(&self, from: ResumePoint) -> StorageResult<KvEventStream>;
}

/// List-watch over a key prefix of a revisioned [`Backend`].
pub struct KvListWatch {
    type_name: String,
    prefix: Vec<u8>,
    backend: Arc<dyn Backend>,
    codec: Arc<dyn ValueCodec>,
    config: ListWatchConfig,
}

impl KvListWatch {
    pub fn new(
        type_name: impl Into<String>,
        prefix: impl Into<Vec<u8>>,
        backend: Arc<dyn Backend>,
        codec: Arc<dyn ValueCodec>,
        config: ListWatchConfig,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            prefix: prefix.into(),
            backend,
            codec,
            config,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }
}

#[async_trait]
impl ListWatch for KvListWatch {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn list(&self) -> StorageResult<Snapshot> {
        let opts = QueryOptions::new(self.prefix.clone()).with_prefix();
        let resp = tokio::time::timeout(self.config.timeout, self.backend.range(&opts))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: format!("list {}", self.type_name),
                elapsed: self.config.timeout,
            })??;

        let mut entries = Vec::with_capacity(resp.kvs.len());
        for raw in &resp.kvs {
            match self.codec.decode(&raw.value) {
                Ok(value) => entries.push(KeyValue::new(raw.key.clone(), value).with_meta_from(raw)),
                Err(e) => tracing::warn!(
                    type_name = %self.type_name,
                    key = %String::from_utf8_lossy(&raw.key),
                    error = %e,
                    "Skipping undecodable entry while listing"
                ),
            }
        }

        Ok(Snapshot {
            revision: resp.revision,
            entries,
            resume: ResumePoint::Revision(resp.revision + 1),
        })
    }

    async fn watch(&self, from: ResumePoint) -> StorageResult<KvEventStream> {
        let from_revision = match from {
            ResumePoint::Revision(r) => r,
            ResumePoint::Token(_) => {
                return Err(StorageError::WatchFailed {
                    type_name: self.type_name.clone(),
                    reason: "revisioned watch cannot resume from a cursor".to_string(),
                })
            }
        };

        let raw = self.backend.watch(&self.prefix, from_revision).await?;
        let codec = Arc::clone(&self.codec);
        let type_name = self.type_name.clone();

        let events = raw.filter_map(move |item| {
            let decoded = match item {
                Err(e) => Some(Err(e)),
                Ok(raw) if raw.action == EventType::Delete => Some(Ok(KvEvent::new(
                    EventType::Delete,
                    KeyValue::key_only(raw.kv.key.clone()).with_meta_from(&raw.kv),
                    raw.revision,
                ))),
                Ok(raw) => match codec.decode(&raw.kv.value) {
                    Ok(value) => Some(Ok(KvEvent::new(
                        raw.action,
                        KeyValue::new(raw.kv.key.clone(), value).with_meta_from(&raw.kv),
                        raw.revision,
                    ))),
                    Err(e) => {
                        tracing::warn!(
                            type_name = %type_name,
                            key = %String::from_utf8_lossy(&raw.kv.key),
                            revision = raw.revision,
                            error = %e,
                            "Skipping undecodable watch event"
                        );
                        None
                    }
                },
            };
            future::ready(decoded)
        });

        Ok(events.boxed())
    }
}
