//! ROSTER Test Utilities
//!
//! Shared test infrastructure for the ROSTER workspace:
//! - Tracing initialisation for test binaries
//! - Scripted mocks for the renewal queue and self-registration
//! - Proptest generators for version strings
//! - Fixtures for common scenarios
//! - Assertions over ROSTER results

pub use roster_core::{
    AddOnError, EventType, Instance, KeyValue, KvEvent, LeaseError, LeaseResult, QueryOptions,
    QueryResult, RosterConfig, RosterError, RosterResult, Service, StorageError, StorageResult,
    Value,
};
pub use roster_storage::{
    lease_task_key, LeaseTask, MemoryBackend, RenewalQueue, SelfRegistration,
};
pub use roster_version::{Version, VersionRule};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCKS
// ============================================================================

/// Renewal queue with scripted outcomes.
///
/// Submissions for task keys registered with [`fail_submit`] fail; every
/// other submission is recorded. Handled tasks are whatever the test put
/// in with [`handle`], so "nothing handled yet" is the default.
///
/// [`fail_submit`]: ScriptedRenewalQueue::fail_submit
/// [`handle`]: ScriptedRenewalQueue::handle
#[derive(Default)]
pub struct ScriptedRenewalQueue {
    failing: Mutex<Vec<String>>,
    handled: Mutex<HashMap<String, LeaseTask>>,
    submitted: tokio::sync::Mutex<Vec<String>>,
}

impl ScriptedRenewalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submit(self, task_key: impl Into<String>) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task_key.into());
        self
    }

    /// Record a completed renewal for `task_key`.
    pub fn handle(&self, task_key: &str, lease_key: &str, outcome: LeaseResult<i64>) {
        let (ttl, error) = match outcome {
            Ok(ttl) => (ttl, None),
            Err(e) => (0, Some(e)),
        };
        let task = LeaseTask {
            key: task_key.to_string(),
            lease_key: lease_key.as_bytes().to_vec(),
            ttl,
            error,
            handled_at: Utc::now(),
        };
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_key.to_string(), task);
    }

    pub async fn submitted(&self) -> Vec<String> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl RenewalQueue for ScriptedRenewalQueue {
    async fn submit(&self, task_key: &str, _lease_key: &[u8]) -> LeaseResult<()> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|k| k == task_key);
        if failing {
            return Err(LeaseError::RenewalSubmitFailed {
                key: task_key.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.submitted.lock().await.push(task_key.to_string());
        Ok(())
    }

    fn latest_handled(&self, task_key: &str) -> Option<LeaseTask> {
        self.handled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_key)
            .cloned()
    }
}

/// Self-registration that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct MockRegistration {
    registered: AtomicUsize,
    unregistered: AtomicUsize,
    fail: bool,
}

impl MockRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn unregistered(&self) -> usize {
        self.unregistered.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> RosterResult<()> {
        if self.fail {
            return Err(StorageError::BackendUnavailable {
                reason: "registration rejected".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl SelfRegistration for MockRegistration {
    async fn register(&self) -> RosterResult<()> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    async fn unregister(&self) -> RosterResult<()> {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for version strings.

    use proptest::prelude::*;

    /// A version whose every segment is within range.
    pub fn arb_valid_version() -> impl Strategy<Value = String> {
        prop::collection::vec(0u16..=32767, 1..5).prop_map(|segments| {
            segments
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(".")
        })
    }

    /// A dotted version with one segment above the limit.
    pub fn arb_oversized_version() -> impl Strategy<Value = String> {
        (arb_valid_version(), 32768u32..=99999).prop_map(|(v, big)| format!("{v}.{big}"))
    }

    /// Text that is never a version: empty segments or non-digits.
    pub fn arb_malformed_version() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z]{1,6}",
            "[0-9]{1,3}\\.\\.[0-9]{1,3}",
            "[0-9]{1,3}\\.[a-z]{1,3}",
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Registry objects and configurations used across tests.

    use super::*;
    use std::time::Duration;

    pub fn service(service_id: &str, service_name: &str, version: &str) -> Service {
        Service {
            service_id: service_id.to_string(),
            app_id: "default".to_string(),
            service_name: service_name.to_string(),
            version: version.to_string(),
            environment: String::new(),
            timestamp: String::new(),
            mod_timestamp: String::new(),
            properties: Default::default(),
        }
    }

    pub fn instance(instance_id: &str, service_id: &str) -> Instance {
        Instance {
            instance_id: instance_id.to_string(),
            service_id: service_id.to_string(),
            host_name: "localhost".to_string(),
            endpoints: vec!["rest://127.0.0.1:8080".to_string()],
            status: "UP".to_string(),
            timestamp: String::new(),
            mod_timestamp: String::new(),
            properties: Default::default(),
        }
    }

    /// JSON bytes as stored in the backend.
    pub fn service_bytes(service: &Service) -> Vec<u8> {
        serde_json::to_vec(service).unwrap_or_default()
    }

    pub fn instance_bytes(instance: &Instance) -> Vec<u8> {
        serde_json::to_vec(instance).unwrap_or_default()
    }

    /// Config with short timeouts and no watchdog.
    pub fn fast_config() -> RosterConfig {
        RosterConfig::default()
            .with_list_timeout(Duration::from_secs(1))
            .with_retry(roster_core::RetryConfig {
                max_retries: None,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
                backoff_multiplier: 2.0,
            })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over ROSTER results.

    use super::*;

    #[track_caller]
    pub fn assert_key_out_of_root<T: std::fmt::Debug>(result: &StorageResult<T>) {
        match result {
            Err(StorageError::KeyOutOfRoot { .. }) => {}
            other => panic!("Expected KeyOutOfRoot, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_addon<T: std::fmt::Debug>(result: &Result<T, AddOnError>) {
        match result {
            Err(AddOnError::InvalidAddOn { .. }) => {}
            other => panic!("Expected InvalidAddOn, got: {:?}", other),
        }
    }

    /// Assert that the result's keys are exactly `expected`, in order.
    #[track_caller]
    pub fn assert_keys(result: &QueryResult, expected: &[&str]) {
        let keys: Vec<String> = result.entries.iter().map(|kv| kv.key_str().into_owned()).collect();
        assert_eq!(keys, expected, "Unexpected result keys");
    }
}

// ============================================================================
// TESTS
// ============================================================================
