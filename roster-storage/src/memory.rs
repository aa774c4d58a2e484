//! In-memory revisioned backend.
//!
//! Keeps recent changes in a history log so range reads can be served at a
//! past revision and watchers can replay from an older revision before
//! switching to live events. The log is bounded: once it grows past its
//! limit the oldest events are folded into a base snapshot, and reads or
//! watches below that compacted revision fail with
//! [`StorageError::Compacted`].

use crate::backend::{Backend, RawEvent, RawEventStream, RawResponse};
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use roster_core::{
    EventType, LeaseError, LeaseResult, QueryOptions, RawKeyValue, Revision, StorageError,
    StorageResult,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default number of events kept in the history log.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, Default)]
struct MemoryState {
    revision: Revision,
    kvs: BTreeMap<Vec<u8>, RawKeyValue>,
    // Content at `compacted`; `history` holds only later events.
    base: BTreeMap<Vec<u8>, RawKeyValue>,
    compacted: Revision,
    history: VecDeque<RawEvent>,
    leases: HashMap<Vec<u8>, i64>,
}

fn replay(kvs: &mut BTreeMap<Vec<u8>, RawKeyValue>, event: &RawEvent) {
    match event.action {
        EventType::Delete => {
            kvs.remove(&event.kv.key);
        }
        EventType::Insert | EventType::Update => {
            kvs.insert(event.kv.key.clone(), event.kv.clone());
        }
    }
}

impl MemoryState {
    fn at_revision(&self, revision: Revision) -> BTreeMap<Vec<u8>, RawKeyValue> {
        let mut kvs = self.base.clone();
        for event in self.history.iter().take_while(|e| e.revision <= revision) {
            replay(&mut kvs, event);
        }
        kvs
    }

    // Folds every event at or below `revision` into the base.
    fn compact(&mut self, revision: Revision) {
        while let Some(event) = self.history.front() {
            if event.revision > revision {
                break;
            }
            if let Some(event) = self.history.pop_front() {
                replay(&mut self.base, &event);
            }
        }
        self.compacted = self.compacted.max(revision);
    }

    fn check_compacted(&self, revision: Revision) -> StorageResult<()> {
        if revision < self.compacted {
            return Err(StorageError::Compacted {
                revision,
                compacted: self.compacted,
            });
        }
        Ok(())
    }
}

/// Revisioned key-value store held entirely in memory.
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    history_limit: usize,
    events: broadcast::Sender<RawEvent>,
    unavailable: AtomicBool,
    range_calls: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            events,
            unavailable: AtomicBool::new(false),
            range_calls: AtomicU64::new(0),
        }
    }

    /// Keep at most `limit` events in the history log.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Drop history up to `revision`. Returns the compacted revision,
    /// which never moves backward and never passes the store revision.
    pub fn compact(&self, revision: Revision) -> StorageResult<Revision> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let target = revision.min(state.revision);
        state.compact(target);
        Ok(state.compacted)
    }

    pub fn compacted(&self) -> StorageResult<Revision> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.compacted)
    }

    /// Insert or overwrite `key`, returning the new store revision.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> StorageResult<Revision> {
        let key = key.into();
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.revision += 1;
        let revision = state.revision;

        let (action, version, create_revision) = match state.kvs.get(&key) {
            Some(existing) => (EventType::Update, existing.version + 1, existing.create_revision),
            None => (EventType::Insert, 1, revision),
        };
        let kv = RawKeyValue {
            key: key.clone(),
            value: value.into(),
            version,
            create_revision,
            mod_revision: revision,
        };
        state.kvs.insert(key, kv.clone());
        self.record(&mut state, RawEvent { revision, action, kv });
        Ok(revision)
    }

    /// Remove `key`. Returns the delete revision, or `None` if absent.
    pub fn delete(&self, key: &[u8]) -> StorageResult<Option<Revision>> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        let Some(mut kv) = state.kvs.remove(key) else {
            return Ok(None);
        };
        state.revision += 1;
        let revision = state.revision;
        kv.value.clear();
        kv.mod_revision = revision;
        self.record(
            &mut state,
            RawEvent {
                revision,
                action: EventType::Delete,
                kv,
            },
        );
        Ok(Some(revision))
    }

    // Broadcast under the write lock so live delivery order equals
    // revision order.
    fn record(&self, state: &mut MemoryState, event: RawEvent) {
        state.history.push_back(event.clone());
        if state.history.len() > self.history_limit {
            let excess = state.history.len() - self.history_limit;
            if let Some(upto) = state.history.get(excess - 1).map(|e| e.revision) {
                state.compact(upto);
                tracing::debug!(compacted = upto, "Memory backend history compacted");
            }
        }
        let _ = self.events.send(event);
    }

    pub fn grant_lease(&self, lease_key: impl Into<Vec<u8>>, ttl: i64) -> StorageResult<()> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.leases.insert(lease_key.into(), ttl);
        Ok(())
    }

    pub fn revoke_lease(&self, lease_key: &[u8]) -> StorageResult<bool> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.leases.remove(lease_key).is_some())
    }

    /// Simulate an outage: every call fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn revision(&self) -> StorageResult<Revision> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.revision)
    }

    /// Number of range reads served so far.
    pub fn range_calls(&self) -> u64 {
        self.range_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::BackendUnavailable {
                reason: "memory backend disabled".to_string(),
            });
        }
        Ok(())
    }
}

fn select_range(
    kvs: &BTreeMap<Vec<u8>, RawKeyValue>,
    opts: &QueryOptions,
) -> Vec<RawKeyValue> {
    if opts.prefix {
        kvs.range(opts.key.clone()..)
            .take_while(|(k, _)| k.starts_with(&opts.key))
            .map(|(_, v)| v.clone())
            .collect()
    } else {
        kvs.get(&opts.key).cloned().into_iter().collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn range(&self, opts: &QueryOptions) -> StorageResult<RawResponse> {
        self.check_available()?;
        self.range_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        if opts.revision > state.revision {
            return Err(StorageError::BackendUnavailable {
                reason: format!(
                    "revision {} is newer than store revision {}",
                    opts.revision, state.revision
                ),
            });
        }

        if opts.revision > 0 {
            state.check_compacted(opts.revision)?;
        }

        let (matches, revision) = if opts.revision > 0 {
            (select_range(&state.at_revision(opts.revision), opts), opts.revision)
        } else {
            (select_range(&state.kvs, opts), state.revision)
        };
        drop(state);

        let count = matches.len() as i64;
        if opts.count_only {
            return Ok(RawResponse {
                revision,
                count,
                kvs: Vec::new(),
            });
        }

        let offset = opts.offset.unwrap_or(0).max(0) as usize;
        let limit = match opts.limit {
            Some(l) if l > 0 => l as usize,
            _ => usize::MAX,
        };
        let kvs = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut kv| {
                if opts.key_only {
                    kv.value.clear();
                }
                kv
            })
            .collect();

        Ok(RawResponse {
            revision,
            count,
            kvs,
        })
    }

    async fn watch(&self, prefix: &[u8], from_revision: Revision) -> StorageResult<RawEventStream> {
        self.check_available()?;

        // Subscribe before copying history; writers hold the write lock
        // while broadcasting, so live events all come after the replay.
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        // Events at the compacted revision itself are gone too.
        state.check_compacted(from_revision.max(1) - 1)?;
        let rx = self.events.subscribe();
        let replay: Vec<RawEvent> = state
            .history
            .iter()
            .filter(|e| e.revision >= from_revision && e.kv.key.starts_with(prefix))
            .cloned()
            .collect();
        drop(state);

        let prefix = prefix.to_vec();
        let live = BroadcastStream::new(rx).filter_map(move |res| {
            let item = match res {
                Ok(event) if event.kv.key.starts_with(&prefix) && event.revision >= from_revision => {
                    Some(Ok(event))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(StorageError::WatchFailed {
                    type_name: String::from_utf8_lossy(&prefix).into_owned(),
                    reason: format!("watcher lagged behind by {missed} events"),
                })),
            };
            future::ready(item)
        });

        Ok(stream::iter(replay.into_iter().map(Ok)).chain(live).boxed())
    }

    async fn keep_alive(&self, lease_key: &[u8]) -> LeaseResult<i64> {
        let key = String::from_utf8_lossy(lease_key).into_owned();
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LeaseError::RenewalFailed {
                key,
                reason: "memory backend disabled".to_string(),
            });
        }
        let state = self.state.read().map_err(|_| LeaseError::RenewalFailed {
            key: key.clone(),
            reason: StorageError::LockPoisoned.to_string(),
        })?;
        state
            .leases
            .get(lease_key)
            .copied()
            .ok_or(LeaseError::LeaseNotFound { key })
    }
}
