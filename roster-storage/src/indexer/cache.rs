use super::{check_root, Indexer, RawIndexer};
use crate::cache::Cacher;
use async_trait::async_trait;
use roster_core::{QueryOptions, QueryResult, StorageResult};
use std::sync::Arc;

/// Indexer that prefers the mirror of a cacher.
///
/// Routing, in order:
/// - key outside root: `KeyOutOfRoot`
/// - `no_cache`, explicit revision or pagination: raw indexer
/// - exact mirror hit, then (for prefix queries) a mirror prefix scan
/// - miss with `cache_only`: empty result, backend untouched
/// - miss otherwise: raw indexer result, unmodified
///
/// Bypassed results are never written back into the mirror.
#[derive(Clone)]
pub struct CacheIndexer {
    raw: RawIndexer,
    cacher: Arc<Cacher>,
}

impl CacheIndexer {
    pub fn new(raw: RawIndexer, cacher: Arc<Cacher>) -> Self {
        Self { raw, cacher }
    }

    pub fn cacher(&self) -> &Arc<Cacher> {
        &self.cacher
    }

    fn bypasses_mirror(opts: &QueryOptions) -> bool {
        opts.no_cache || opts.revision != 0 || opts.is_paginated()
    }
}

#[async_trait]
impl Indexer for CacheIndexer {
    async fn search(&self, opts: &QueryOptions) -> StorageResult<QueryResult> {
        check_root(self.raw.root(), opts)?;

        if Self::bypasses_mirror(opts) {
            return self.raw.search(opts).await;
        }

        let mirror = self.cacher.mirror();
        let mut hits: Vec<_> = mirror.get(&opts.key)?.into_iter().collect();
        if hits.is_empty() && opts.prefix {
            hits = mirror.scan_prefix(&opts.key)?;
        }
        let revision = mirror.watermark()?.revision;

        if !hits.is_empty() {
            return Ok(QueryResult::from_entries(hits, revision).shaped_by(opts));
        }
        if opts.cache_only {
            return Ok(QueryResult::empty(revision));
        }
        self.raw.search(opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{KvEventStream, ListWatch, Snapshot};
    use crate::codec::StringCodec;
    use crate::memory::MemoryBackend;
    use futures_util::{stream, StreamExt};
    use roster_core::{
        EventType, KeyValue, KvEvent, ResumePoint, RetryConfig, StorageError, Value,
    };

    // Never lists; the mirror is filled directly by the tests.
    struct IdleListWatch;

    #[async_trait]
    impl ListWatch for IdleListWatch {
        fn type_name(&self) -> &str {
            "idle"
        }

        async fn list(&self) -> StorageResult<Snapshot> {
            Err(StorageError::BackendUnavailable {
                reason: "idle".to_string(),
            })
        }

        async fn watch(&self, _from: ResumePoint) -> StorageResult<KvEventStream> {
            Ok(stream::pending().boxed())
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        indexer: CacheIndexer,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(MemoryBackend::new());
            let raw = RawIndexer::new("/", backend.clone(), Arc::new(StringCodec));
            let cacher = Arc::new(Cacher::new(Arc::new(IdleListWatch), RetryConfig::default()));
            Self {
                backend,
                indexer: CacheIndexer::new(raw, cacher),
            }
        }

        fn mirror_put(&self, key: &str, value: &str, revision: i64) {
            self.indexer
                .cacher()
                .mirror()
                .apply(&KvEvent::new(
                    EventType::Insert,
                    KeyValue::new(key, Value::Text(value.to_string())),
                    revision,
                ))
                .expect("mirror apply should succeed");
        }

        async fn search(&self, opts: QueryOptions) -> StorageResult<QueryResult> {
            self.indexer.search(&opts).await
        }
    }

    #[tokio::test]
    async fn test_key_outside_root_is_rejected() {
        let f = Fixture::new();
        let result = f.search(QueryOptions::new("a")).await;
        assert!(matches!(result, Err(StorageError::KeyOutOfRoot { .. })));
        assert_eq!(f.backend.range_calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_goes_remote() {
        let f = Fixture::new();
        f.backend.put("/a", "remote").expect("put should succeed");
        let result = f.search(QueryOptions::new("/a")).await.expect("search");
        assert_eq!(result.count, 1);
        assert_eq!(f.backend.range_calls(), 1);
    }

    #[tokio::test]
    async fn test_bypass_options_skip_mirror() {
        let f = Fixture::new();
        f.mirror_put("/a", "va", 1);
        f.backend.put("/a", "remote").expect("put should succeed");

        for opts in [
            QueryOptions::new("/a").with_no_cache(),
            QueryOptions::new("/a").with_revision(1),
            QueryOptions::new("/a").with_offset(0).with_limit(1),
        ] {
            let result = f.search(opts).await.expect("search");
            assert_eq!(
                result.entries[0].value,
                Some(Value::Text("remote".to_string()))
            );
        }
        assert_eq!(f.backend.range_calls(), 3);
        // Bypassed reads leave the mirror as it was.
        let cached = f.indexer.cacher().mirror().get(b"/a").expect("get").expect("present");
        assert_eq!(cached.value, Some(Value::Text("va".to_string())));
    }

    #[tokio::test]
    async fn test_unrelated_mirror_content_goes_remote() {
        let f = Fixture::new();
        f.mirror_put("ka", "x", 1);

        f.search(QueryOptions::new("/a")).await.expect("search");
        f.search(QueryOptions::new("/a").with_prefix()).await.expect("search");
        assert_eq!(f.backend.range_calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces_on_miss() {
        let f = Fixture::new();
        f.backend.set_available(false);
        let result = f.search(QueryOptions::new("/a")).await;
        assert!(matches!(result, Err(StorageError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_mirror_hits() {
        let f = Fixture::new();
        f.mirror_put("/a", "va", 1);

        let exact = f.search(QueryOptions::new("/a")).await.expect("search");
        assert_eq!(exact.count, 1);
        assert_eq!(exact.entries[0].value, Some(Value::Text("va".to_string())));

        let prefix = f
            .search(QueryOptions::new("/a").with_prefix())
            .await
            .expect("search");
        assert_eq!(prefix.count, 1);
        assert_eq!(prefix.entries[0].value, Some(Value::Text("va".to_string())));

        let counted = f
            .search(QueryOptions::new("/a").with_count_only())
            .await
            .expect("search");
        assert_eq!(counted.count, 1);
        assert!(counted.entries.is_empty());

        assert_eq!(f.backend.range_calls(), 0);
    }

    #[tokio::test]
    async fn test_prefix_scan_when_no_exact_key() {
        let f = Fixture::new();
        f.mirror_put("/svc/1", "a", 1);
        f.mirror_put("/svc/2", "b", 2);

        let result = f
            .search(QueryOptions::new("/svc/").with_prefix().with_key_only())
            .await
            .expect("search");
        assert_eq!(result.count, 2);
        assert_eq!(result.revision, 2);
        assert!(result.entries.iter().all(|kv| kv.value.is_none()));
        assert_eq!(f.backend.range_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_only_miss_is_empty() {
        let f = Fixture::new();
        f.mirror_put("/a", "va", 1);
        f.backend.put("/a/b", "remote").expect("put should succeed");

        let result = f
            .search(QueryOptions::new("/a/b").with_cache_only())
            .await
            .expect("search");
        assert_eq!(result.count, 0);
        assert!(result.entries.is_empty());
        assert_eq!(f.backend.range_calls(), 0);
    }
}
