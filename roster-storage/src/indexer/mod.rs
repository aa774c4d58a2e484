//! Query engines.
//!
//! [`RawIndexer`] always reads the backend. [`CacheIndexer`] answers from
//! a cacher's mirror when the query allows it and falls back to the raw
//! indexer otherwise.

mod cache;
mod raw;

pub use cache::CacheIndexer;
pub use raw::RawIndexer;

use async_trait::async_trait;
use roster_core::{QueryOptions, QueryResult, StorageError, StorageResult};

/// Executes searches for one data type.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn search(&self, opts: &QueryOptions) -> StorageResult<QueryResult>;
}

/// Reject keys outside `root`.
pub(crate) fn check_root(root: &str, opts: &QueryOptions) -> StorageResult<()> {
    if opts.key.starts_with(root.as_bytes()) {
        return Ok(());
    }
    Err(StorageError::KeyOutOfRoot {
        key: opts.key_str().into_owned(),
        root: root.to_string(),
    })
}
