// In-process lock store
// DashMap entries with monotonic expiry, plus fault injection for exercising
// quorum behaviour without real backends

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::LockStoreClient;
use crate::error::{LockError, Result};
use crate::model::{LockKey, LockToken};

/// A stored lock entry
struct LockEntry {
    token: String,
    set_at: Instant,
    ttl: Duration,
}

impl LockEntry {
    fn new(token: &LockToken, ttl: Duration) -> Self {
        Self {
            token: token.as_str().to_string(),
            set_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.set_at + self.ttl
    }
}

/// Calls received per operation, counted on arrival
#[derive(Debug, Default)]
pub struct StoreCallStats {
    pub set_calls: AtomicU64,
    pub extend_calls: AtomicU64,
    pub release_calls: AtomicU64,
    pub ping_calls: AtomicU64,
}

impl StoreCallStats {
    pub fn sets(&self) -> u64 {
        self.set_calls.load(Ordering::Relaxed)
    }

    pub fn extends(&self) -> u64 {
        self.extend_calls.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.release_calls.load(Ordering::Relaxed)
    }
}

/// Lock store backed by a concurrent in-memory map
pub struct MemoryLockStore {
    id: String,
    locks: Arc<DashMap<String, LockEntry>>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    stats: StoreCallStats,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl MemoryLockStore {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locks: Arc::new(DashMap::new()),
            reachable: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            stats: StoreCallStats::default(),
            cleanup_handle: None,
        }
    }

    /// Start a background sweep that drops expired entries
    pub fn with_cleanup(mut self, interval: Duration) -> Self {
        let locks = self.locks.clone();
        let id = self.id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let before = locks.len();
                locks.retain(|_, entry| !entry.is_expired());
                let removed = before.saturating_sub(locks.len());
                if removed > 0 {
                    debug!(store = %id, count = removed, "Cleaned up expired lock entries");
                }
            }
        });
        self.cleanup_handle = Some(handle);
        self
    }

    /// Simulate the node going offline (`false`) or coming back (`true`)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it is applied
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &StoreCallStats {
        &self.stats
    }

    /// Token currently holding `key`, if the entry is live
    pub fn holder(&self, key: &str) -> Option<String> {
        self.locks
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.token.clone())
    }

    /// Remaining TTL of a live entry
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.locks
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| (entry.set_at + entry.ttl).saturating_duration_since(Instant::now()))
    }

    async fn enter(&self, counter: &AtomicU64) -> Result<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LockError::unreachable(&self.id, "connection refused"));
        }
        Ok(())
    }
}

impl Drop for MemoryLockStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LockStoreClient for MemoryLockStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_set(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool> {
        self.enter(&self.stats.set_calls).await?;

        let acquired = match self.locks.entry(key.as_str().to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(LockEntry::new(token, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry::new(token, ttl));
                true
            }
        };

        debug!(store = %self.id, key = %key, acquired, "try_set");
        Ok(acquired)
    }

    async fn try_extend(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool> {
        self.enter(&self.stats.extend_calls).await?;

        let extended = match self.locks.get_mut(key.as_str()) {
            Some(mut entry) if !entry.is_expired() && entry.token == token.as_str() => {
                entry.set_at = Instant::now();
                entry.ttl = ttl;
                true
            }
            _ => false,
        };

        debug!(store = %self.id, key = %key, extended, "try_extend");
        Ok(extended)
    }

    async fn try_release(&self, key: &LockKey, token: &LockToken) -> Result<bool> {
        self.enter(&self.stats.release_calls).await?;

        let released = self
            .locks
            .remove_if(key.as_str(), |_, entry| entry.token == token.as_str())
            .map(|(_, entry)| !entry.is_expired())
            .unwrap_or(false);

        debug!(store = %self.id, key = %key, released, "try_release");
        Ok(released)
    }

    async fn ping(&self) -> Result<()> {
        self.enter(&self.stats.ping_calls).await
    }
}
