//! Cacher: keeps one mirror in sync with its list-watch source.
//!
//! # Lifecycle
//!
//! ```text
//! Created ── start() ──→ Syncing ── first list ──→ Ready
//!                                                   │  ↑
//!                                     mark_dirty()  ↓  │ relist
//!                                                 Resyncing
//! any state ── shutdown ──→ Stopped
//! any state ── retries exhausted ──→ Failed
//! ```
//!
//! The sync loop lists, replaces the mirror content, then applies watch
//! events in stream order. Dirty marking forces a relist on the next tick
//! while the existing watch stream stays open; events at or below the
//! relist revision are already covered and are skipped.

use super::list_watch::{KvEventStream, ListWatch};
use super::mirror::Mirror;
use super::ready::ReadyGate;
use futures_util::StreamExt;
use roster_core::{KvEvent, ResumePoint, RetryConfig, StorageError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Receives every change applied to a mirror, including the synthetic
/// events produced by a relist.
pub trait EventSink: Send + Sync {
    fn on_events(&self, type_name: &str, events: &[KvEvent]);
}

/// Sync state of a [`Cacher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacherState {
    Created = 0,
    Syncing = 1,
    Ready = 2,
    Resyncing = 3,
    Failed = 4,
    Stopped = 5,
}

impl CacherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CacherState::Created,
            1 => CacherState::Syncing,
            2 => CacherState::Ready,
            3 => CacherState::Resyncing,
            4 => CacherState::Failed,
            _ => CacherState::Stopped,
        }
    }
}

impl fmt::Display for CacherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacherState::Created => "created",
            CacherState::Syncing => "syncing",
            CacherState::Ready => "ready",
            CacherState::Resyncing => "resyncing",
            CacherState::Failed => "failed",
            CacherState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Owns the mirror and list-watch subscription of one data type.
pub struct Cacher {
    type_name: String,
    mirror: Arc<Mirror>,
    list_watch: Arc<dyn ListWatch>,
    sink: Option<Arc<dyn EventSink>>,
    retry: RetryConfig,
    ready: ReadyGate,
    dirty: AtomicBool,
    dirty_notify: Notify,
    started: AtomicBool,
    state: AtomicU8,
}

impl fmt::Debug for Cacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacher")
            .field("type_name", &self.type_name)
            .field("state", &self.state())
            .field("ready", &self.ready.is_ready())
            .finish_non_exhaustive()
    }
}

impl Cacher {
    pub fn new(list_watch: Arc<dyn ListWatch>, retry: RetryConfig) -> Self {
        Self {
            type_name: list_watch.type_name().to_string(),
            mirror: Arc::new(Mirror::new()),
            list_watch,
            sink: None,
            retry,
            ready: ReadyGate::new(),
            dirty: AtomicBool::new(false),
            dirty_notify: Notify::new(),
            started: AtomicBool::new(false),
            state: AtomicU8::new(CacherState::Created as u8),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    pub fn ready(&self) -> &ReadyGate {
        &self.ready
    }

    pub fn state(&self) -> CacherState {
        CacherState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: CacherState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Force a full relist on the next sync tick.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.dirty_notify.notify_one();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Spawn the sync loop on `handle`. Only the first call spawns.
    pub fn start(
        self: &Arc<Self>,
        handle: &Handle,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(handle.spawn(Arc::clone(self).sync_loop(shutdown)))
    }

    async fn sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;
        let mut resume: Option<ResumePoint> = None;
        let mut stream: Option<KvEventStream> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let dirty = self.dirty.swap(false, Ordering::SeqCst);
            if resume.is_none() || dirty {
                if self.ready.is_ready() {
                    self.set_state(CacherState::Resyncing);
                } else {
                    self.set_state(CacherState::Syncing);
                }

                let listed = tokio::select! {
                    _ = shutdown.changed() => break,
                    listed = self.list_watch.list() => listed,
                };
                match listed.and_then(|snapshot| {
                    let events = self.mirror.replace(snapshot.entries, snapshot.revision)?;
                    Ok((events, snapshot.resume, snapshot.revision))
                }) {
                    Ok((events, next, revision)) => {
                        self.dispatch(&events);
                        if resume.is_none() || stream.is_none() {
                            resume = Some(next);
                        }
                        attempts = 0;
                        self.set_state(CacherState::Ready);
                        if self.ready.close() {
                            tracing::debug!(
                                type_name = %self.type_name,
                                revision = revision,
                                "Cache is ready"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            type_name = %self.type_name,
                            attempt = attempts,
                            error = %e,
                            "List failed"
                        );
                        // Retry the listing, not just the stream.
                        self.dirty.store(true, Ordering::SeqCst);
                        if !self.backoff(&mut attempts, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            if stream.is_none() {
                let from = match &resume {
                    Some(point) => point.clone(),
                    None => continue,
                };
                let opened = tokio::select! {
                    _ = shutdown.changed() => break,
                    opened = self.list_watch.watch(from) => opened,
                };
                match opened {
                    Ok(s) => stream = Some(s),
                    Err(e) => {
                        tracing::warn!(
                            type_name = %self.type_name,
                            attempt = attempts,
                            error = %e,
                            "Watch failed to open"
                        );
                        // History is gone; only a fresh listing can resume.
                        if matches!(e, StorageError::Compacted { .. }) {
                            self.dirty.store(true, Ordering::SeqCst);
                        }
                        if !self.backoff(&mut attempts, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let Some(events) = stream.as_mut() else {
                continue;
            };
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.dirty_notify.notified() => continue,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        attempts = 0;
                        resume = Some(ResumePoint::Revision(event.revision + 1));
                        if let Err(e) = self.apply(event) {
                            tracing::error!(
                                type_name = %self.type_name,
                                error = %e,
                                "Failed to apply watch event"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            type_name = %self.type_name,
                            attempt = attempts,
                            error = %e,
                            "Watch stream failed, reconnecting"
                        );
                        stream = None;
                        // A lagging or broken stream may have dropped events.
                        self.dirty.store(true, Ordering::SeqCst);
                        if !self.backoff(&mut attempts, &mut shutdown).await {
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(type_name = %self.type_name, "Watch stream ended, reconnecting");
                        stream = None;
                        if !self.backoff(&mut attempts, &mut shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        if self.state() != CacherState::Failed {
            self.set_state(CacherState::Stopped);
        }
        tracing::debug!(type_name = %self.type_name, state = %self.state(), "Cacher sync loop exited");
    }

    fn apply(&self, event: KvEvent) -> Result<(), StorageError> {
        if self.mirror.apply(&event)? {
            self.dispatch(std::slice::from_ref(&event));
        }
        Ok(())
    }

    fn dispatch(&self, events: &[KvEvent]) {
        if events.is_empty() {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.on_events(&self.type_name, events);
        }
    }

    // Sleeps before the next attempt. Returns false when the loop must
    // exit: shutdown was requested or retries are exhausted.
    async fn backoff(&self, attempts: &mut u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.retry.exhausted(*attempts) {
            tracing::error!(
                type_name = %self.type_name,
                attempts = *attempts,
                "Sync retries exhausted, cache stays at its last known content"
            );
            self.set_state(CacherState::Failed);
            return false;
        }
        let delay = self.retry.backoff_for(*attempts);
        *attempts += 1;
        tokio::select! {
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::list_watch::Snapshot;
    use async_trait::async_trait;
    use futures_util::stream;
    use roster_core::{EventType, KeyValue, StorageResult, Value};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(key, Value::Text(value.to_string()))
    }

    fn fast_retry(max: Option<u32>) -> RetryConfig {
        RetryConfig {
            max_retries: max,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        }
    }

    // Scripted source: each list() pops the next snapshot; the watch stream
    // is fed through a channel held by the test.
    struct ScriptedListWatch {
        snapshots: Mutex<Vec<StorageResult<Snapshot>>>,
        list_calls: Mutex<u32>,
        watch_failures: Mutex<Vec<StorageError>>,
        events: Mutex<Option<mpsc::UnboundedReceiver<StorageResult<KvEvent>>>>,
    }

    impl ScriptedListWatch {
        fn new(
            snapshots: Vec<StorageResult<Snapshot>>,
        ) -> (Arc<Self>, mpsc::UnboundedSender<StorageResult<KvEvent>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let lw = Arc::new(Self {
                snapshots: Mutex::new(snapshots.into_iter().rev().collect()),
                list_calls: Mutex::new(0),
                watch_failures: Mutex::new(Vec::new()),
                events: Mutex::new(Some(rx)),
            });
            (lw, tx)
        }

        fn list_calls(&self) -> u32 {
            *self.list_calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl ListWatch for ScriptedListWatch {
        fn type_name(&self) -> &str {
            "scripted"
        }

        async fn list(&self) -> StorageResult<Snapshot> {
            *self.list_calls.lock().expect("lock") += 1;
            let mut snapshots = self.snapshots.lock().expect("lock");
            match snapshots.len() {
                0 => Err(StorageError::BackendUnavailable {
                    reason: "script exhausted".to_string(),
                }),
                1 => snapshots[0].clone(),
                _ => snapshots.pop().expect("script has snapshots"),
            }
        }

        async fn watch(&self, _from: ResumePoint) -> StorageResult<KvEventStream> {
            if let Some(e) = self.watch_failures.lock().expect("lock").pop() {
                return Err(e);
            }
            match self.events.lock().expect("lock").take() {
                Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn snapshot(revision: i64, entries: Vec<KeyValue>) -> StorageResult<Snapshot> {
        Ok(Snapshot {
            revision,
            entries,
            resume: ResumePoint::Revision(revision + 1),
        })
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(EventType, String)>>,
    }

    impl EventSink for RecordingSink {
        fn on_events(&self, _type_name: &str, events: &[KvEvent]) {
            let mut seen = self.events.lock().expect("lock");
            seen.extend(events.iter().map(|e| (e.action, e.kv.key_str().into_owned())));
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_first_list_populates_and_readies() {
        let (lw, _tx) = ScriptedListWatch::new(vec![snapshot(3, vec![kv("/a", "1")])]);
        let cacher = Arc::new(Cacher::new(lw, fast_retry(None)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = cacher
            .start(&Handle::current(), shutdown_rx.clone())
            .expect("first start spawns");
        assert!(cacher.start(&Handle::current(), shutdown_rx).is_none());

        tokio::time::timeout(Duration::from_secs(1), cacher.ready().wait())
            .await
            .expect("cacher should become ready");
        assert_eq!(cacher.state(), CacherState::Ready);
        assert!(cacher.mirror().get(b"/a").expect("get").is_some());

        shutdown_tx.send(true).expect("send shutdown");
        handle.await.expect("loop should exit cleanly");
        assert_eq!(cacher.state(), CacherState::Stopped);
    }

    #[tokio::test]
    async fn test_watch_events_applied_and_stale_skipped() {
        let (lw, tx) = ScriptedListWatch::new(vec![snapshot(5, vec![kv("/a", "1")])]);
        let sink = Arc::new(RecordingSink::default());
        let cacher = Arc::new(Cacher::new(lw, fast_retry(None)).with_sink(sink.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        cacher.start(&Handle::current(), shutdown_rx);
        cacher.ready().wait().await;

        tx.send(Ok(KvEvent::new(EventType::Update, kv("/a", "stale"), 4)))
            .expect("send");
        tx.send(Ok(KvEvent::new(EventType::Insert, kv("/b", "2"), 6)))
            .expect("send");

        let mirror = Arc::clone(cacher.mirror());
        eventually(|| mirror.get(b"/b").ok().flatten().is_some()).await;

        let a = mirror.get(b"/a").expect("get").expect("present");
        assert_eq!(a.value, Some(Value::Text("1".into())));
        let seen = sink.events.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                (EventType::Insert, "/a".to_string()),
                (EventType::Insert, "/b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_mark_dirty_relists_and_emits_diff() {
        let (lw, _tx) = ScriptedListWatch::new(vec![
            snapshot(3, vec![kv("/a", "1"), kv("/b", "1")]),
            snapshot(7, vec![kv("/b", "1"), kv("/c", "1")]),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let cacher = Arc::new(Cacher::new(lw.clone(), fast_retry(None)).with_sink(sink.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        cacher.start(&Handle::current(), shutdown_rx);
        cacher.ready().wait().await;

        cacher.mark_dirty();
        let mirror = Arc::clone(cacher.mirror());
        eventually(|| mirror.get(b"/c").ok().flatten().is_some()).await;

        assert!(mirror.get(b"/a").expect("get").is_none());
        assert_eq!(lw.list_calls(), 2);
        assert!(!cacher.is_dirty());
        let seen = sink.events.lock().expect("lock").clone();
        assert!(seen.contains(&(EventType::Delete, "/a".to_string())));
        assert!(seen.contains(&(EventType::Insert, "/c".to_string())));
    }

    #[tokio::test]
    async fn test_event_at_relist_revision_reaches_sink_once() {
        let (lw, tx) = ScriptedListWatch::new(vec![
            snapshot(5, vec![kv("/a", "1")]),
            snapshot(7, vec![kv("/a", "1"), kv("/b", "1")]),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let cacher = Arc::new(Cacher::new(lw, fast_retry(None)).with_sink(sink.clone()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        cacher.start(&Handle::current(), shutdown_rx);
        cacher.ready().wait().await;

        cacher.mark_dirty();
        let mirror = Arc::clone(cacher.mirror());
        eventually(|| mirror.get(b"/b").ok().flatten().is_some()).await;

        // The open stream still delivers the write the relist picked up.
        tx.send(Ok(KvEvent::new(EventType::Insert, kv("/b", "1"), 7)))
            .expect("send");
        tx.send(Ok(KvEvent::new(EventType::Insert, kv("/c", "1"), 8)))
            .expect("send");
        eventually(|| mirror.get(b"/c").ok().flatten().is_some()).await;

        let seen = sink.events.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                (EventType::Insert, "/a".to_string()),
                (EventType::Insert, "/b".to_string()),
                (EventType::Insert, "/c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_compacted_resume_point_forces_relist() {
        let (lw, _tx) = ScriptedListWatch::new(vec![
            snapshot(3, vec![kv("/a", "1")]),
            snapshot(9, vec![kv("/a", "1"), kv("/b", "1")]),
        ]);
        lw.watch_failures
            .lock()
            .expect("lock")
            .push(StorageError::Compacted {
                revision: 4,
                compacted: 8,
            });
        let cacher = Arc::new(Cacher::new(lw.clone(), fast_retry(None)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        cacher.start(&Handle::current(), shutdown_rx);

        let mirror = Arc::clone(cacher.mirror());
        eventually(|| mirror.get(b"/b").ok().flatten().is_some()).await;
        assert_eq!(lw.list_calls(), 2);
        assert_eq!(mirror.watermark().expect("watermark").listed, 9);
    }

    #[tokio::test]
    async fn test_exhausted_retries_never_ready() {
        let (lw, _tx) = ScriptedListWatch::new(vec![]);
        let cacher = Arc::new(Cacher::new(lw, fast_retry(Some(2))));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = cacher
            .start(&Handle::current(), shutdown_rx)
            .expect("spawned");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should give up")
            .expect("loop should not panic");
        assert_eq!(cacher.state(), CacherState::Failed);
        assert!(!cacher.ready().is_ready());
    }
}
