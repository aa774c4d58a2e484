//! Lease keepalive.
//!
//! `keep_alive` submits a renewal for the lease's task key and then reads
//! the latest handled renewal for that key; it does not wait for the
//! submitted renewal itself. [`SingleFlightRenewals`] coalesces concurrent
//! submissions for one task key into a single in-flight backend call whose
//! result every attached caller observes.

use crate::backend::Backend;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use roster_core::{LeaseError, LeaseResult, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;

/// How long a handled renewal stays readable after it completed.
pub const HANDLED_RETENTION: Duration = Duration::from_secs(300);

/// Prefix of every lease renewal task key.
pub const LEASE_TASK_PREFIX: &str = "LeaseAsyncTask_";

/// Task key of the renewal for lease `key`.
pub fn lease_task_key(key: &str) -> String {
    format!("{LEASE_TASK_PREFIX}{key}")
}

/// Outcome of one completed renewal.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseTask {
    pub key: String,
    pub lease_key: Vec<u8>,
    pub ttl: i64,
    pub error: Option<LeaseError>,
    pub handled_at: Timestamp,
}

impl LeaseTask {
    fn from_result(key: String, lease_key: Vec<u8>, result: LeaseResult<i64>) -> Self {
        let (ttl, error) = match result {
            Ok(ttl) => (ttl, None),
            Err(e) => (0, Some(e)),
        };
        Self {
            key,
            lease_key,
            ttl,
            error,
            handled_at: Utc::now(),
        }
    }
}

/// Queue of asynchronous renewals with "latest handled" lookup.
#[async_trait]
pub trait RenewalQueue: Send + Sync {
    async fn submit(&self, task_key: &str, lease_key: &[u8]) -> LeaseResult<()>;

    fn latest_handled(&self, task_key: &str) -> Option<LeaseTask>;
}

/// Client-facing keepalive over a [`RenewalQueue`].
#[derive(Clone)]
pub struct LeaseKeeper {
    queue: Arc<dyn RenewalQueue>,
}

impl LeaseKeeper {
    pub fn new(queue: Arc<dyn RenewalQueue>) -> Self {
        Self { queue }
    }

    /// Renew lease `key` and report the TTL of the latest completed
    /// renewal. Any error means a TTL of 0.
    pub async fn keep_alive(&self, key: &str) -> LeaseResult<i64> {
        let task_key = lease_task_key(key);
        self.queue
            .submit(&task_key, key.as_bytes())
            .await
            .map_err(|e| match e {
                LeaseError::RenewalSubmitFailed { .. } => e,
                other => LeaseError::RenewalSubmitFailed {
                    key: task_key.clone(),
                    reason: other.to_string(),
                },
            })?;

        let handled = self
            .queue
            .latest_handled(&task_key)
            .filter(|task| task.key == task_key)
            .ok_or_else(|| LeaseError::RenewalNotFound {
                key: task_key.clone(),
            })?;

        match handled.error {
            Some(e) => Err(e),
            None => Ok(handled.ttl),
        }
    }
}

type RenewalFuture = Shared<BoxFuture<'static, LeaseTask>>;

/// Single-flight renewal queue backed by a [`Backend`].
///
/// Handled renewals older than the retention period are swept whenever a
/// new renewal is submitted, so leases that stop renewing drop out.
pub struct SingleFlightRenewals {
    backend: Arc<dyn Backend>,
    in_flight: Arc<DashMap<String, RenewalFuture>>,
    handled: Arc<DashMap<String, LeaseTask>>,
    retention: Duration,
    workers: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl SingleFlightRenewals {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(DashMap::new()),
            handled: Arc::new(DashMap::new()),
            retention: HANDLED_RETENTION,
            workers: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    // Drops handled renewals past retention, except the one for `keep`.
    fn sweep_handled(&self, keep: &str) {
        let now = Utc::now();
        let retention = self.retention;
        self.handled.retain(|key, task| {
            key == keep
                || (now - task.handled_at)
                    .to_std()
                    .map_or(true, |age| age <= retention)
        });
    }

    /// Attach to the in-flight renewal for `task_key`, starting one if
    /// none is running.
    fn attach(&self, task_key: &str, lease_key: &[u8]) -> LeaseResult<RenewalFuture> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LeaseError::RenewalSubmitFailed {
                key: task_key.to_string(),
                reason: "renewal queue is stopped".to_string(),
            });
        }

        let (renewal, fresh) = match self.in_flight.entry(task_key.to_string()) {
            Entry::Occupied(running) => (running.get().clone(), false),
            Entry::Vacant(slot) => {
                let renewal = self.renewal(task_key.to_string(), lease_key.to_vec());
                slot.insert(renewal.clone());
                (renewal, true)
            }
        };

        if fresh {
            self.sweep_handled(task_key);
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            while workers.try_join_next().is_some() {}
            workers.spawn(renewal.clone().map(|_| ()));
        }
        Ok(renewal)
    }

    fn renewal(&self, task_key: String, lease_key: Vec<u8>) -> RenewalFuture {
        let backend = Arc::clone(&self.backend);
        let in_flight = Arc::clone(&self.in_flight);
        let handled = Arc::clone(&self.handled);

        async move {
            let result = backend.keep_alive(&lease_key).await;
            if let Err(e) = &result {
                tracing::warn!(task_key = %task_key, error = %e, "Lease renewal failed");
            }
            let task = LeaseTask::from_result(task_key.clone(), lease_key, result);
            handled.insert(task_key.clone(), task.clone());
            in_flight.remove(&task_key);
            task
        }
        .boxed()
        .shared()
    }

    /// Submit and wait for the renewal to complete.
    pub async fn renew_and_wait(&self, task_key: &str, lease_key: &[u8]) -> LeaseResult<LeaseTask> {
        Ok(self.attach(task_key, lease_key)?.await)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of task keys with a readable handled renewal.
    pub fn handled_len(&self) -> usize {
        self.handled.len()
    }

    /// Refuse new submissions and cancel running renewals.
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        workers.abort_all();
        while workers.join_next().await.is_some() {}
        self.in_flight.clear();
        tracing::debug!("Lease renewals stopped");
    }
}

#[async_trait]
impl RenewalQueue for SingleFlightRenewals {
    async fn submit(&self, task_key: &str, lease_key: &[u8]) -> LeaseResult<()> {
        self.attach(task_key, lease_key).map(|_| ())
    }

    fn latest_handled(&self, task_key: &str) -> Option<LeaseTask> {
        self.handled.get(task_key).map(|t| t.value().clone())
    }
}
