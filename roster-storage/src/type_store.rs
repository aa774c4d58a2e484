//! Registry of cachers keyed by data-type name.
//!
//! Cachers are created lazily and at most once per name. `run` starts the
//! sync loops, an aggregate readiness task and (when a TTL is configured)
//! a watchdog that periodically marks every cacher dirty. `stop` is
//! idempotent and waits for every spawned task to exit.

use crate::backend::Backend;
use crate::cache::{Cacher, EventSink, KvListWatch, ListWatch, ReadyGate};
use crate::codec::ValueCodec;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roster_core::{ListWatchConfig, RetryConfig, RosterConfig, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Name, key prefix and codec of one data type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub prefix: Vec<u8>,
    pub codec: Arc<dyn ValueCodec>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, prefix: impl Into<Vec<u8>>, codec: Arc<dyn ValueCodec>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            codec,
        }
    }
}

/// Builds the list-watch source for a data type.
pub trait ListWatchFactory: Send + Sync {
    fn create(&self, descriptor: &TypeDescriptor) -> Arc<dyn ListWatch>;
}

/// Factory producing [`KvListWatch`]es over one backend.
pub struct KvListWatchFactory {
    backend: Arc<dyn Backend>,
    config: ListWatchConfig,
}

impl KvListWatchFactory {
    pub fn new(backend: Arc<dyn Backend>, config: ListWatchConfig) -> Self {
        Self { backend, config }
    }
}

impl ListWatchFactory for KvListWatchFactory {
    fn create(&self, descriptor: &TypeDescriptor) -> Arc<dyn ListWatch> {
        Arc::new(KvListWatch::new(
            descriptor.name.clone(),
            descriptor.prefix.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&descriptor.codec),
            self.config,
        ))
    }
}

pub struct TypeStore {
    descriptors: DashMap<String, TypeDescriptor>,
    cachers: Arc<DashMap<String, Arc<Cacher>>>,
    factory: Arc<dyn ListWatchFactory>,
    sink: Option<Arc<dyn EventSink>>,
    retry: RetryConfig,
    cache_ttl: Duration,
    ready: ReadyGate,
    shutdown_tx: watch::Sender<bool>,
    runtime: OnceLock<Handle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl TypeStore {
    pub fn new(factory: Arc<dyn ListWatchFactory>, config: &RosterConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            descriptors: DashMap::new(),
            cachers: Arc::new(DashMap::new()),
            factory,
            sink: None,
            retry: config.retry.clone(),
            cache_ttl: config.cache_ttl,
            ready: ReadyGate::new(),
            shutdown_tx,
            runtime: OnceLock::new(),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Deliver every applied change to `sink`. Affects cachers created
    /// after this call only.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register a data type. Returns false if the name is already taken;
    /// the existing descriptor is kept.
    pub fn register(&self, descriptor: TypeDescriptor) -> bool {
        match self.descriptors.entry(descriptor.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<TypeDescriptor> {
        self.descriptors.get(name).map(|d| d.value().clone())
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.descriptors.iter().map(|d| d.key().clone()).collect();
        names.sort();
        names
    }

    pub fn cacher(&self, name: &str) -> Option<Arc<Cacher>> {
        self.cachers.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Return the cacher for `name`, creating it on first use.
    ///
    /// Concurrent callers for the same name all receive the instance built
    /// by whichever caller won the shard lock; the others block until it
    /// is inserted.
    pub fn get_or_create(&self, name: &str) -> StorageResult<Arc<Cacher>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped);
        }
        if let Some(existing) = self.cacher(name) {
            return Ok(existing);
        }

        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| StorageError::UnknownType {
                type_name: name.to_string(),
            })?;

        let cacher = Arc::clone(
            self.cachers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(self.build(&descriptor)))
                .value(),
        );

        if let Some(handle) = self.runtime.get() {
            self.start_cacher(&cacher, handle);
        }
        Ok(cacher)
    }

    fn build(&self, descriptor: &TypeDescriptor) -> Cacher {
        let cacher = Cacher::new(self.factory.create(descriptor), self.retry.clone());
        match &self.sink {
            Some(sink) => cacher.with_sink(Arc::clone(sink)),
            None => cacher,
        }
    }

    fn start_cacher(&self, cacher: &Arc<Cacher>, handle: &Handle) {
        if let Some(task) = cacher.start(handle, self.shutdown_tx.subscribe()) {
            self.track(task);
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Aggregate readiness: closed once every type registered at `run`
    /// time has completed its first listing.
    pub fn ready(&self) -> &ReadyGate {
        &self.ready
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Start sync loops for all registered types plus the readiness and
    /// watchdog tasks. Calling it again is a no-op.
    pub async fn run(&self) -> StorageResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handle = self.runtime.get_or_init(Handle::current).clone();

        for name in self.type_names() {
            self.get_or_create(&name)?;
        }
        let cachers: Vec<Arc<Cacher>> = self.cachers.iter().map(|c| Arc::clone(c.value())).collect();
        for cacher in &cachers {
            self.start_cacher(cacher, &handle);
        }

        let gates: Vec<ReadyGate> = cachers.iter().map(|c| c.ready().clone()).collect();
        let ready = self.ready.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        self.track(handle.spawn(async move {
            for gate in gates {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = gate.wait() => {}
                }
            }
            if ready.close() {
                tracing::debug!("All caches are ready");
            }
        }));

        if self.cache_ttl.is_zero() {
            tracing::debug!("Cache TTL is zero, dirty-marking watchdog disabled");
        } else {
            let watchdog = mark_dirty_periodically(
                Arc::clone(&self.cachers),
                self.cache_ttl,
                self.shutdown_tx.subscribe(),
            );
            self.track(handle.spawn(watchdog));
        }

        tracing::info!(
            types = cachers.len(),
            cache_ttl_secs = self.cache_ttl.as_secs(),
            "Type store running"
        );
        Ok(())
    }

    /// Stop every task and close the readiness gate. Only the first call
    /// does anything; later or concurrent calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Type store task ended abnormally");
            }
        }

        self.ready.close();
        tracing::debug!("Type store stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn mark_dirty_periodically(
    cachers: Arc<DashMap<String, Arc<Cacher>>>,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + ttl, ttl);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for cacher in cachers.iter() {
                    cacher.value().mark_dirty();
                }
                tracing::warn!(
                    caches = cachers.len(),
                    ttl_secs = ttl.as_secs(),
                    "Caches are marked dirty"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringCodec;
    use crate::memory::MemoryBackend;

    fn store(backend: Arc<MemoryBackend>, ttl: Duration) -> TypeStore {
        let config = RosterConfig::default().with_root("/r/").with_cache_ttl(ttl);
        let factory = Arc::new(KvListWatchFactory::new(backend, config.list_watch));
        let store = TypeStore::new(factory, &config);
        store.register(TypeDescriptor::new("service", "/r/svc/", Arc::new(StringCodec)));
        store.register(TypeDescriptor::new("instance", "/r/inst/", Arc::new(StringCodec)));
        store
    }

    #[test]
    fn test_register_is_create_once() {
        let s = store(Arc::new(MemoryBackend::new()), Duration::ZERO);
        let again = TypeDescriptor::new("service", "/other/", Arc::new(StringCodec));
        assert!(!s.register(again));
        let kept = s.descriptor("service").expect("registered");
        assert_eq!(kept.prefix, b"/r/svc/".to_vec());
        assert_eq!(s.type_names(), vec!["instance", "service"]);
    }

    #[test]
    fn test_unknown_type() {
        let s = store(Arc::new(MemoryBackend::new()), Duration::ZERO);
        assert!(matches!(
            s.get_or_create("schema"),
            Err(StorageError::UnknownType { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_returns_one_instance() {
        let s = Arc::new(store(Arc::new(MemoryBackend::new()), Duration::ZERO));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = Arc::clone(&s);
            handles.push(tokio::spawn(async move { s.get_or_create("instance") }));
        }
        let mut created = Vec::new();
        for h in handles {
            created.push(h.await.expect("task").expect("cacher"));
        }
        assert!(created.iter().all(|c| Arc::ptr_eq(c, &created[0])));
    }

    #[tokio::test]
    async fn test_run_closes_aggregate_ready() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put("/r/svc/s1", "svc").expect("put should succeed");
        let s = store(Arc::clone(&backend), Duration::ZERO);

        s.run().await.expect("run should succeed");
        tokio::time::timeout(Duration::from_secs(1), s.ready().wait())
            .await
            .expect("store should become ready");

        let svc = s.cacher("service").expect("created by run");
        assert!(svc.mirror().get(b"/r/svc/s1").expect("get").is_some());
        s.stop().await;
    }

    #[tokio::test]
    async fn test_watchdog_forces_relists() {
        let backend = Arc::new(MemoryBackend::new());
        let s = store(Arc::clone(&backend), Duration::from_millis(20));
        s.run().await.expect("run should succeed");
        s.ready().wait().await;
        let initial = backend.range_calls();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(backend.range_calls() > initial);
        s.stop().await;
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_watchdog() {
        let backend = Arc::new(MemoryBackend::new());
        let s = store(Arc::clone(&backend), Duration::ZERO);
        assert!(!s.is_running());
        s.run().await.expect("run should succeed");
        s.ready().wait().await;
        assert!(s.is_running());
        let initial = backend.range_calls();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(backend.range_calls(), initial);
        let cachers = ["service", "instance"].map(|name| s.cacher(name).expect("created by run"));
        assert!(cachers.iter().all(|c| !c.is_dirty()));

        s.stop().await;
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_ready() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);
        let s = store(backend, Duration::from_millis(10));
        s.run().await.expect("run should succeed");
        assert!(!s.ready().is_ready());

        tokio::join!(s.stop(), s.stop());
        s.stop().await;

        assert!(s.ready().is_ready());
        assert!(s.is_stopped());
        assert!(matches!(s.get_or_create("service"), Err(StorageError::Stopped)));
        assert!(matches!(s.run().await, Err(StorageError::Stopped)));
    }
}
