use super::{check_root, Indexer};
use crate::backend::Backend;
use crate::codec::ValueCodec;
use async_trait::async_trait;
use roster_core::{KeyValue, QueryOptions, QueryResult, StorageResult};
use std::sync::Arc;

/// Stateless indexer that sends every search to the backend.
#[derive(Clone)]
pub struct RawIndexer {
    root: String,
    backend: Arc<dyn Backend>,
    codec: Arc<dyn ValueCodec>,
}

impl RawIndexer {
    pub fn new(root: impl Into<String>, backend: Arc<dyn Backend>, codec: Arc<dyn ValueCodec>) -> Self {
        Self {
            root: root.into(),
            backend,
            codec,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

#[async_trait]
impl Indexer for RawIndexer {
    /// One backend read. The backend's count is returned verbatim, so
    /// entries that fail to decode are dropped but still counted.
    async fn search(&self, opts: &QueryOptions) -> StorageResult<QueryResult> {
        check_root(&self.root, opts)?;

        let resp = self.backend.range(opts).await?;
        let mut result = QueryResult::empty(resp.revision);
        result.count = resp.count;
        if opts.count_only {
            return Ok(result);
        }

        result.entries.reserve(resp.kvs.len());
        for raw in &resp.kvs {
            if opts.key_only {
                result
                    .entries
                    .push(KeyValue::key_only(raw.key.clone()).with_meta_from(raw));
                continue;
            }
            match self.codec.decode(&raw.value) {
                Ok(value) => result
                    .entries
                    .push(KeyValue::new(raw.key.clone(), value).with_meta_from(raw)),
                Err(e) => tracing::warn!(
                    key = %String::from_utf8_lossy(&raw.key),
                    codec = self.codec.name(),
                    error = %e,
                    "Dropping undecodable entry from search result"
                ),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RawEventStream, RawResponse};
    use crate::codec::MapCodec;
    use crate::memory::MemoryBackend;
    use roster_core::{LeaseResult, RawKeyValue, Revision, StorageError};

    struct FixedBackend(StorageResult<RawResponse>);

    #[async_trait]
    impl Backend for FixedBackend {
        async fn range(&self, _opts: &QueryOptions) -> StorageResult<RawResponse> {
            self.0.clone()
        }

        async fn watch(&self, _prefix: &[u8], _from: Revision) -> StorageResult<RawEventStream> {
            Err(StorageError::BackendUnavailable {
                reason: "not watchable".to_string(),
            })
        }

        async fn keep_alive(&self, _lease_key: &[u8]) -> LeaseResult<i64> {
            Ok(0)
        }
    }

    fn indexer(root: &str, backend: FixedBackend) -> RawIndexer {
        RawIndexer::new(root, Arc::new(backend), Arc::new(MapCodec))
    }

    fn two_entries() -> FixedBackend {
        FixedBackend(Ok(RawResponse {
            revision: 9,
            count: 2,
            kvs: vec![RawKeyValue::new("/a", "abc"), RawKeyValue::new("/b", "{}")],
        }))
    }

    #[tokio::test]
    async fn test_key_outside_root_is_rejected() {
        let result = indexer("/", two_entries())
            .search(&QueryOptions::new("a"))
            .await;
        assert!(matches!(result, Err(StorageError::KeyOutOfRoot { .. })));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = FixedBackend(Err(StorageError::BackendUnavailable {
            reason: "down".to_string(),
        }));
        let result = indexer("/", backend).search(&QueryOptions::new("/a")).await;
        assert!(matches!(result, Err(StorageError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_empty_response() {
        let backend = FixedBackend(Ok(RawResponse::default()));
        let result = indexer("/", backend)
            .search(&QueryOptions::new("/a"))
            .await
            .expect("search should succeed");
        assert_eq!(result.count, 0);
        assert!(result.entries.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entries_dropped_but_counted() {
        let result = indexer("/", two_entries())
            .search(&QueryOptions::new("/").with_prefix())
            .await
            .expect("search should succeed");
        assert_eq!(result.count, 2);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].key_str(), "/b");
        assert_eq!(result.revision, 9);
    }

    #[tokio::test]
    async fn test_key_only_keeps_every_entry() {
        let result = indexer("/", two_entries())
            .search(&QueryOptions::new("/").with_prefix().with_key_only())
            .await
            .expect("search should succeed");
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries.iter().all(|kv| kv.value.is_none()));
    }

    #[tokio::test]
    async fn test_count_only_has_no_entries() {
        let result = indexer("/", two_entries())
            .search(&QueryOptions::new("/").with_prefix().with_count_only())
            .await
            .expect("search should succeed");
        assert_eq!(result.count, 2);
        assert!(result.entries.is_empty());
    }

    #[tokio::test]
    async fn test_memory_backend_pagination() {
        let backend = Arc::new(MemoryBackend::new());
        for key in ["/r/1", "/r/2", "/r/3"] {
            backend.put(key, "{}").expect("put should succeed");
        }
        let raw = RawIndexer::new("/r/", backend, Arc::new(MapCodec));
        let page = raw
            .search(&QueryOptions::new("/r/").with_prefix().with_offset(2).with_limit(5))
            .await
            .expect("search should succeed");
        assert_eq!(page.count, 3);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key_str(), "/r/3");
    }
}
