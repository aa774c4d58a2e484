//! Registry composition.
//!
//! [`Registry`] wires a backend to the type store, the lease keeper and
//! the add-on registry, and registers the built-in `service` and
//! `instance` types under the configured root. [`RegistryEngine`] drives
//! self-registration of the hosting process.

use crate::addon::{AddOn, AddOnRegistry};
use crate::backend::Backend;
use crate::cache::{EventSink, ReadyGate};
use crate::codec::{InstanceCodec, ServiceCodec, ValueCodec};
use crate::indexer::{CacheIndexer, RawIndexer};
use crate::lease::{LeaseKeeper, SingleFlightRenewals};
use crate::type_store::{KvListWatchFactory, TypeDescriptor, TypeStore};
use async_trait::async_trait;
use roster_core::{AddOnError, LeaseResult, RosterConfig, RosterResult, StorageError};
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_TYPE: &str = "service";
pub const INSTANCE_TYPE: &str = "instance";

/// Key prefixes of the built-in types, relative to the root.
pub const SERVICE_PREFIX: &str = "ms/services/";
pub const INSTANCE_PREFIX: &str = "ms/instances/";

/// Deadline for self-unregistration during shutdown.
pub const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(3);

/// Registers the hosting process itself with the registry.
#[async_trait]
pub trait SelfRegistration: Send + Sync {
    async fn register(&self) -> RosterResult<()>;

    async fn unregister(&self) -> RosterResult<()>;
}

pub struct RegistryEngine {
    registration: Arc<dyn SelfRegistration>,
    stop_timeout: Duration,
}

impl RegistryEngine {
    pub fn new(registration: Arc<dyn SelfRegistration>) -> Self {
        Self {
            registration,
            stop_timeout: UNREGISTER_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub async fn start(&self) -> RosterResult<()> {
        self.registration.register().await?;
        tracing::info!("Registry engine started");
        Ok(())
    }

    /// Self-unregister within the stop deadline. Failures are logged only.
    pub async fn stop(&self) {
        match tokio::time::timeout(self.stop_timeout, self.registration.unregister()).await {
            Ok(Ok(())) => tracing::info!("Registry engine stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Self-unregistration failed"),
            Err(_) => tracing::error!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Self-unregistration timed out"
            ),
        }
    }
}

pub struct Registry {
    config: RosterConfig,
    backend: Arc<dyn Backend>,
    store: TypeStore,
    addons: Arc<AddOnRegistry>,
    renewals: Arc<SingleFlightRenewals>,
    leases: LeaseKeeper,
}

impl Registry {
    pub fn new(config: RosterConfig, backend: Arc<dyn Backend>) -> RosterResult<Self> {
        config.validate()?;

        let addons = Arc::new(AddOnRegistry::new());
        let factory = Arc::new(KvListWatchFactory::new(Arc::clone(&backend), config.list_watch));
        let sink: Arc<dyn EventSink> = addons.clone();
        let store = TypeStore::new(factory, &config).with_sink(sink);
        let renewals = Arc::new(SingleFlightRenewals::new(Arc::clone(&backend)));
        let leases = LeaseKeeper::new(renewals.clone());

        let registry = Self {
            config,
            backend,
            store,
            addons,
            renewals,
            leases,
        };
        registry.register_type(SERVICE_TYPE, SERVICE_PREFIX, Arc::new(ServiceCodec));
        registry.register_type(INSTANCE_TYPE, INSTANCE_PREFIX, Arc::new(InstanceCodec));
        Ok(registry)
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    /// Register a data type whose keys live under root + `relative_prefix`.
    /// Returns false if the name is already taken.
    pub fn register_type(
        &self,
        name: &str,
        relative_prefix: &str,
        codec: Arc<dyn ValueCodec>,
    ) -> bool {
        let prefix = format!("{}{}", self.config.root, relative_prefix);
        self.store.register(TypeDescriptor::new(name, prefix, codec))
    }

    pub fn type_store(&self) -> &TypeStore {
        &self.store
    }

    pub fn addons(&self) -> &AddOnRegistry {
        &self.addons
    }

    pub fn raw_indexer(&self, type_name: &str) -> RosterResult<RawIndexer> {
        let descriptor = self
            .store
            .descriptor(type_name)
            .ok_or_else(|| StorageError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        Ok(RawIndexer::new(
            self.config.root.clone(),
            Arc::clone(&self.backend),
            descriptor.codec,
        ))
    }

    /// Cache-backed indexer for `type_name`, creating its cacher on first use.
    pub fn indexer(&self, type_name: &str) -> RosterResult<CacheIndexer> {
        let raw = self.raw_indexer(type_name)?;
        let cacher = self.store.get_or_create(type_name)?;
        Ok(CacheIndexer::new(raw, cacher))
    }

    pub async fn keep_alive(&self, key: &str) -> LeaseResult<i64> {
        self.leases.keep_alive(key).await
    }

    pub fn install(&self, addon: Option<Arc<dyn AddOn>>) -> Result<String, AddOnError> {
        self.addons.install(addon)
    }

    pub async fn run(&self) -> RosterResult<()> {
        self.store.run().await?;
        Ok(())
    }

    pub fn ready(&self) -> &ReadyGate {
        self.store.ready()
    }

    pub async fn stop(&self) {
        self.store.stop().await;
        self.renewals.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use crate::memory::MemoryBackend;
    use roster_core::{QueryOptions, RosterError, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRegistration {
        registered: AtomicUsize,
        unregistered: AtomicUsize,
        unregister_delay: Duration,
        fail_unregister: bool,
    }

    impl CountingRegistration {
        fn new(unregister_delay: Duration, fail_unregister: bool) -> Arc<Self> {
            Arc::new(Self {
                registered: AtomicUsize::new(0),
                unregistered: AtomicUsize::new(0),
                unregister_delay,
                fail_unregister,
            })
        }
    }

    #[async_trait]
    impl SelfRegistration for CountingRegistration {
        async fn register(&self) -> RosterResult<()> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unregister(&self) -> RosterResult<()> {
            tokio::time::sleep(self.unregister_delay).await;
            self.unregistered.fetch_add(1, Ordering::SeqCst);
            if self.fail_unregister {
                return Err(StorageError::BackendUnavailable {
                    reason: "gone".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_engine_registers_and_unregisters() {
        let registration = CountingRegistration::new(Duration::ZERO, false);
        let engine = RegistryEngine::new(registration.clone());
        engine.start().await.expect("start");
        engine.stop().await;
        assert_eq!(registration.registered.load(Ordering::SeqCst), 1);
        assert_eq!(registration.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_stop_swallows_failure() {
        let registration = CountingRegistration::new(Duration::ZERO, true);
        RegistryEngine::new(registration.clone()).stop().await;
        assert_eq!(registration.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_stop_gives_up_after_deadline() {
        let registration = CountingRegistration::new(Duration::from_secs(10), false);
        let engine = RegistryEngine::new(registration.clone());
        let started = tokio::time::Instant::now();
        engine.stop().await;
        assert!(started.elapsed() >= UNREGISTER_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(registration.unregistered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Registry::new(
            RosterConfig::default().with_root("relative/"),
            Arc::new(MemoryBackend::new()),
        );
        assert!(matches!(result, Err(RosterError::Config(_))));
    }

    #[test]
    fn test_builtin_types() {
        let registry =
            Registry::new(RosterConfig::default(), Arc::new(MemoryBackend::new())).expect("new");
        assert_eq!(registry.type_store().type_names(), vec!["instance", "service"]);
        let svc = registry.type_store().descriptor(SERVICE_TYPE).expect("service");
        assert_eq!(svc.prefix, b"/roster/ms/services/".to_vec());
        assert!(!registry.register_type(SERVICE_TYPE, "other/", Arc::new(ServiceCodec)));
        assert!(matches!(
            registry.indexer("schema"),
            Err(RosterError::Storage(StorageError::UnknownType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_serves_services_from_cache() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .put(
                "/roster/ms/services/s1",
                r#"{"serviceId":"s1","serviceName":"orders","version":"1.0.0"}"#,
            )
            .expect("put should succeed");
        let registry = Registry::new(RosterConfig::default(), backend.clone()).expect("new");

        registry.run().await.expect("run");
        tokio::time::timeout(Duration::from_secs(1), registry.ready().wait())
            .await
            .expect("registry should become ready");

        let reads_before = backend.range_calls();
        let result = registry
            .indexer(SERVICE_TYPE)
            .expect("indexer")
            .search(&QueryOptions::new("/roster/ms/services/s1"))
            .await
            .expect("search");
        assert_eq!(backend.range_calls(), reads_before);
        let service = result.entries[0]
            .value
            .as_ref()
            .and_then(Value::as_service)
            .expect("service value");
        assert_eq!(service.service_name, "orders");

        registry.stop().await;
    }
}
