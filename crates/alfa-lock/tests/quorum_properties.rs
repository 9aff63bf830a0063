//! Quorum threshold properties

use std::sync::Arc;
use std::time::Duration;

use alfa_lock::{
    LockConfig, LockError, LockEventPublisher, LockKey, MemoryLockStore, QuorumCoordinator,
    SharedStore,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Acquisition succeeds iff at least N/2+1 backends accept the set
    #[test]
    fn acquisition_needs_majority(n in 1usize..=9, down in 0usize..=9, ttl_ms in 500u64..30_000) {
        let down = down.min(n);
        let stores: Vec<Arc<MemoryLockStore>> = (0..n)
            .map(|i| Arc::new(MemoryLockStore::new(format!("node-{}", i))))
            .collect();
        for store in stores.iter().take(down) {
            store.set_reachable(false);
        }
        let shared: Vec<SharedStore> = stores.iter().map(|s| s.clone() as SharedStore).collect();

        let outcome = runtime().block_on(async {
            let coordinator = QuorumCoordinator::new(
                shared,
                Arc::new(LockConfig::default()),
                LockEventPublisher::new(8),
            )
            .unwrap();
            coordinator
                .try_acquire(&LockKey::from("prop"), Duration::from_millis(ttl_ms))
                .await
        });

        let quorum = n / 2 + 1;
        let healthy = n - down;
        match outcome {
            Ok(lease) => {
                prop_assert!(healthy >= quorum);
                prop_assert_eq!(lease.quorum_size, healthy);
            }
            Err(LockError::QuorumNotReached { successes, required, .. }) => {
                prop_assert!(healthy < quorum);
                prop_assert_eq!(successes, healthy);
                prop_assert_eq!(required, quorum);
                // No partial lock survives a failed attempt
                prop_assert!(stores.iter().all(|s| s.holder("prop").is_none()));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Validity never exceeds the TTL minus the drift allowance
    #[test]
    fn validity_is_drift_adjusted(ttl_ms in 100u64..60_000, factor in 0.0f64..0.1) {
        let config = LockConfig {
            clock_drift_factor: factor,
            ..Default::default()
        };
        let ttl = Duration::from_millis(ttl_ms);
        let bound = ttl.saturating_sub(config.drift_for(ttl));
        let shared: Vec<SharedStore> = (0..3)
            .map(|i| Arc::new(MemoryLockStore::new(format!("node-{}", i))) as SharedStore)
            .collect();

        let lease = runtime().block_on(async {
            QuorumCoordinator::new(shared, Arc::new(config), LockEventPublisher::new(8))
                .unwrap()
                .try_acquire(&LockKey::from("prop"), ttl)
                .await
        });

        if let Ok(lease) = lease {
            prop_assert!(lease.validity <= bound);
        }
    }
}
