//! Alfa Lock - Redlock-style distributed mutual exclusion
//!
//! This crate coordinates one named lock across N independent lock stores:
//! - Store adapters (Redis, in-memory) behind `LockStoreClient`
//! - Quorum acquisition, extension and release (`QuorumCoordinator`)
//! - Background lease extension and loss detection (`LeaseManager`)
//! - The `DistributedMutex` facade and lifecycle events

pub mod config;
pub mod error;
pub mod event;
pub mod lease;
pub mod metrics;
pub mod model;
pub mod mutex;
pub mod quorum;
pub mod store;

// Re-exports for convenience
pub use config::LockConfig;
pub use error::{LockError, Result};
pub use event::{LockEvent, LockEventKind, LockEventListener, LockEventPublisher};
pub use lease::{LeaseHandle, LeaseManager, LeaseStatus};
pub use crate::metrics::MetricsListener;
pub use model::{Lease, LeaseState, LockKey, LockToken, QuorumResult};
pub use mutex::{BackendHealth, DistributedMutex, HealthReport};
pub use quorum::{QuorumCoordinator, RetryPolicy};
pub use store::{
    LockStoreClient, MemoryLockStore, RedisLockStore, RedisStoreConfig, SharedStore,
    StoreCallStats,
};
