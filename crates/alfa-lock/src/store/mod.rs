//! Lock store adapters
//!
//! One `LockStoreClient` wraps one independent, non-replicated backend node.
//! The coordinator owns a set of them and never shares state between them.

mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{LockKey, LockToken};

pub use memory::{MemoryLockStore, StoreCallStats};
pub use redis_store::{RedisLockStore, RedisStoreConfig};

/// Atomic conditional operations on a single backend
///
/// `Ok(false)` means the backend answered and refused (key held by another
/// token, or no entry for this token). Network failures must surface as
/// `LockError::BackendUnreachable`, never as `Ok(false)`.
#[async_trait]
pub trait LockStoreClient: Send + Sync {
    /// Stable identifier used in logs, events and quorum tallies
    fn id(&self) -> &str;

    /// Create the entry if absent. Never overwrites a live entry.
    async fn try_set(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Reset the TTL if the stored token matches
    async fn try_extend(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// Delete the entry if the stored token matches
    async fn try_release(&self, key: &LockKey, token: &LockToken) -> Result<bool>;

    /// Liveness round trip
    async fn ping(&self) -> Result<()>;
}

pub type SharedStore = Arc<dyn LockStoreClient>;
