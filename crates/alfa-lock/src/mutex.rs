//! Distributed mutex facade
//!
//! Composes the quorum coordinator with lease management. A successful
//! acquisition hands back a [`LeaseHandle`] whose background task keeps the
//! lock extended until it is released, dropped, lost or expired.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use alfa_lock::{DistributedMutex, LockConfig, MemoryLockStore, SharedStore};
//!
//! # async fn demo() -> alfa_lock::Result<()> {
//! let stores: Vec<SharedStore> = (0..3)
//!     .map(|i| Arc::new(MemoryLockStore::new(format!("mem-{i}"))) as SharedStore)
//!     .collect();
//! let mutex = DistributedMutex::new(stores, LockConfig::default())?;
//!
//! let lease = mutex
//!     .acquire("report:daily", Duration::from_secs(10), Duration::from_secs(2))
//!     .await?;
//! assert!(mutex.is_held(&lease));
//! mutex.release(lease).await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::LockConfig;
use crate::error::Result;
use crate::event::{LockEvent, LockEventListener, LockEventPublisher};
use crate::lease::{LeaseHandle, LeaseManager};
use crate::model::{LeaseState, LockKey};
use crate::quorum::{QuorumCoordinator, RetryPolicy};
use crate::store::SharedStore;

/// Reachability of one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of pinging every backend
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backends: Vec<BackendHealth>,
    pub quorum: usize,
}

impl HealthReport {
    pub fn reachable(&self) -> usize {
        self.backends.iter().filter(|b| b.ok).count()
    }

    /// Enough backends answered for a lock to be acquirable
    pub fn quorum_reachable(&self) -> bool {
        self.reachable() >= self.quorum
    }
}

/// Cluster-wide mutual exclusion over independent lock stores
pub struct DistributedMutex {
    coordinator: Arc<QuorumCoordinator>,
    leases: LeaseManager,
}

impl DistributedMutex {
    pub fn new(stores: Vec<SharedStore>, config: LockConfig) -> Result<Self> {
        let events = LockEventPublisher::new(config.event_queue_size);
        let coordinator = Arc::new(QuorumCoordinator::new(stores, Arc::new(config), events)?);
        let leases = LeaseManager::new(coordinator.clone());
        Ok(Self {
            coordinator,
            leases,
        })
    }

    pub fn config(&self) -> &LockConfig {
        self.coordinator.config()
    }

    pub fn quorum(&self) -> usize {
        self.coordinator.quorum()
    }

    /// Acquire `key`, retrying until `max_wait` has elapsed
    pub async fn acquire(
        &self,
        key: impl Into<LockKey>,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<LeaseHandle> {
        self.acquire_with(key.into(), ttl, RetryPolicy::until(max_wait))
            .await
    }

    /// Single acquisition attempt
    pub async fn try_acquire(&self, key: impl Into<LockKey>, ttl: Duration) -> Result<LeaseHandle> {
        self.acquire_with(key.into(), ttl, RetryPolicy::once()).await
    }

    /// Acquire with the configured default TTL and retry count
    pub async fn lock(&self, key: impl Into<LockKey>) -> Result<LeaseHandle> {
        let config = self.coordinator.config();
        let policy = RetryPolicy::retries(config.retry_count);
        self.acquire_with(key.into(), config.default_ttl(), policy)
            .await
    }

    async fn acquire_with(
        &self,
        key: LockKey,
        ttl: Duration,
        policy: RetryPolicy,
    ) -> Result<LeaseHandle> {
        let lease = self.coordinator.acquire(&key, ttl, &policy).await?;
        Ok(self.leases.start(lease))
    }

    /// Stop extending and release on every backend, without waiting on them
    pub async fn release(&self, lease: LeaseHandle) -> LeaseState {
        let key = lease.key().clone();
        let state = lease.release().await;
        info!(key = %key, state = %state, "Lease handed back");
        state
    }

    /// `true` only while HELD or EXTENDING and before the lease deadline
    pub fn is_held(&self, lease: &LeaseHandle) -> bool {
        lease.is_held()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.coordinator.events().subscribe()
    }

    pub fn register_listener(&self, listener: Arc<dyn LockEventListener>) -> JoinHandle<()> {
        self.coordinator.events().register_listener(listener)
    }

    pub async fn check_backends(&self) -> HealthReport {
        let backends = self
            .coordinator
            .ping_all()
            .await
            .into_iter()
            .map(|(id, outcome)| BackendHealth {
                id,
                ok: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            })
            .collect();
        HealthReport {
            backends,
            quorum: self.coordinator.quorum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;
    use crate::store::MemoryLockStore;

    fn mutex(n: usize, config: LockConfig) -> (Vec<Arc<MemoryLockStore>>, DistributedMutex) {
        let stores: Vec<Arc<MemoryLockStore>> = (0..n)
            .map(|i| Arc::new(MemoryLockStore::new(format!("mem-{}", i))))
            .collect();
        let shared = stores.iter().map(|s| s.clone() as SharedStore).collect();
        (stores, DistributedMutex::new(shared, config).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release() {
        let (stores, mutex) = mutex(3, LockConfig::default());
        let lease = mutex
            .acquire("k", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(mutex.is_held(&lease));
        assert_eq!(lease.key().as_str(), "k");

        assert_eq!(mutex.release(lease).await, LeaseState::Released);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(stores.iter().all(|s| s.holder("k").is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_contended() {
        let (_stores, mutex) = mutex(3, LockConfig::default());
        let _held = mutex.try_acquire("k", Duration::from_secs(10)).await.unwrap();
        let err = mutex.try_acquire("k", Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, LockError::QuorumNotReached { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_indefinitely_with_max_duration() {
        let (_stores, mutex) = mutex(3, LockConfig::default());
        let mutex = Arc::new(mutex);
        let held = mutex.try_acquire("k", Duration::from_secs(10)).await.unwrap();

        let waiting = mutex.clone();
        let waiter = tokio::spawn(async move {
            waiting.acquire("k", Duration::from_secs(10), Duration::MAX).await
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!waiter.is_finished());
        mutex.release(held).await;

        let lease = waiter.await.unwrap().unwrap();
        assert!(lease.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_uses_defaults() {
        let (stores, mutex) = mutex(3, LockConfig::default());
        let lease = mutex.lock("k").await.unwrap();
        assert_eq!(stores[0].remaining_ttl("k"), Some(Duration::from_secs(10)));

        // Held elsewhere: first attempt plus retry_count retries
        let err = mutex.lock("k").await.unwrap_err();
        assert!(matches!(err, LockError::QuorumNotReached { .. }));
        assert_eq!(stores[0].stats().sets(), 1 + 4);
        drop(lease);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_backends() {
        let (stores, mutex) = mutex(3, LockConfig::default());
        assert!(mutex.check_backends().await.quorum_reachable());

        stores[0].set_reachable(false);
        let report = mutex.check_backends().await;
        assert_eq!(report.reachable(), 2);
        assert!(report.quorum_reachable());
        assert!(report.backends[0].error.is_some());

        stores[1].set_reachable(false);
        assert!(!mutex.check_backends().await.quorum_reachable());
    }

    #[test]
    fn test_invalid_quorum_override() {
        let stores: Vec<SharedStore> = (0..4)
            .map(|i| Arc::new(MemoryLockStore::new(format!("mem-{}", i))) as SharedStore)
            .collect();
        let config = LockConfig {
            quorum: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            DistributedMutex::new(stores, config),
            Err(LockError::InvalidConfig(_))
        ));
    }
}
