//! End-to-end lock scenarios over a five node in-memory cluster

use std::sync::Arc;
use std::time::Duration;

use alfa_lock::{
    DistributedMutex, LeaseState, LockConfig, LockError, LockEventKind, LockEventPublisher,
    LockKey, MemoryLockStore, QuorumCoordinator, SharedStore,
};
use tokio::sync::{Barrier, broadcast};
use tokio::time::Instant;

const KEY: &str = "job:42";

struct Cluster {
    stores: Vec<Arc<MemoryLockStore>>,
    mutex: DistributedMutex,
}

impl Cluster {
    fn new(config: LockConfig) -> Self {
        let stores: Vec<Arc<MemoryLockStore>> = (0..5)
            .map(|i| Arc::new(MemoryLockStore::new(format!("node-{}", i))))
            .collect();
        let shared: Vec<SharedStore> = stores.iter().map(|s| s.clone() as SharedStore).collect();
        let mutex = DistributedMutex::new(shared, config).unwrap();
        Self { stores, mutex }
    }

    fn take_down(&self, nodes: &[usize]) {
        for &i in nodes {
            self.stores[i].set_reachable(false);
        }
    }

    fn holders(&self, token: &str) -> usize {
        self.stores
            .iter()
            .filter(|s| s.holder(KEY).as_deref() == Some(token))
            .count()
    }
}

fn drain(rx: &mut broadcast::Receiver<alfa_lock::LockEvent>) -> Vec<LockEventKind> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.kind)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn all_backends_healthy() {
    let cluster = Cluster::new(LockConfig::default());
    let ttl = Duration::from_secs(10);

    let lease = cluster.mutex.try_acquire(KEY, ttl).await.unwrap();
    let drift = cluster.mutex.config().drift_for(ttl);

    assert!(cluster.mutex.is_held(&lease));
    assert!(lease.remaining() <= ttl - drift);
    assert_eq!(cluster.holders(lease.token().as_str()), 5);
}

#[tokio::test(start_paused = true)]
async fn two_backends_down_still_acquires() {
    let cluster = Cluster::new(LockConfig::default());
    cluster.take_down(&[3, 4]);

    let lease = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(cluster.mutex.is_held(&lease));
    assert_eq!(cluster.holders(lease.token().as_str()), 3);
}

#[tokio::test(start_paused = true)]
async fn minority_fails_and_releases_everywhere() {
    let cluster = Cluster::new(LockConfig::default());
    cluster.take_down(&[2, 3, 4]);
    let mut events = cluster.mutex.subscribe();

    let err = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LockError::QuorumNotReached {
            key: KEY.to_string(),
            successes: 2,
            required: 3,
        }
    );
    for store in &cluster.stores {
        assert_eq!(store.stats().releases(), 1);
        assert!(store.holder(KEY).is_none());
    }
    assert_eq!(drain(&mut events), vec![LockEventKind::AcquisitionFailed]);
}

#[tokio::test(start_paused = true)]
async fn extension_minority_loses_lock_before_ttl() {
    let cluster = Cluster::new(LockConfig::default());
    let mut events = cluster.mutex.subscribe();
    let ttl = Duration::from_secs(10);
    let started = Instant::now();

    let lease = cluster.mutex.try_acquire(KEY, ttl).await.unwrap();
    cluster.take_down(&[0, 1, 2]);

    assert_eq!(lease.cancelled().await, LeaseState::Lost);
    assert!(started.elapsed() < ttl);
    assert!(!cluster.mutex.is_held(&lease));

    let kinds = drain(&mut events);
    assert_eq!(kinds, vec![LockEventKind::Acquired, LockEventKind::Lost]);
}

#[tokio::test(start_paused = true)]
async fn lost_fires_exactly_once() {
    let cluster = Cluster::new(LockConfig::default());
    let mut events = cluster.mutex.subscribe();

    let lease = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap();
    cluster.take_down(&[0, 1, 2]);
    lease.cancelled().await;

    // Nodes coming back must not revive the lease
    for store in &cluster.stores {
        store.set_reachable(true);
    }
    tokio::time::sleep(Duration::from_secs(30)).await;

    let lost = drain(&mut events)
        .into_iter()
        .filter(|k| *k == LockEventKind::Lost)
        .count();
    assert_eq!(lost, 1);
    assert_eq!(lease.state(), LeaseState::Lost);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_are_mutually_exclusive() {
    let cluster = Arc::new(Cluster::new(LockConfig::default()));
    // Staggered replies keep the rounds of different acquirers overlapping
    for (i, store) in cluster.stores.iter().enumerate() {
        store.set_latency(Duration::from_millis(2 * i as u64));
    }
    let start = Arc::new(Barrier::new(8));

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let cluster = cluster.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                cluster
                    .mutex
                    .try_acquire(KEY, Duration::from_secs(10))
                    .await
            })
        })
        .collect();

    let mut winners = Vec::new();
    for attempt in attempts {
        if let Ok(lease) = attempt.await.unwrap() {
            winners.push(lease);
        }
    }
    assert!(winners.len() <= 1);

    // Every loser cleaned up; only the winner's token may remain
    tokio::time::sleep(Duration::from_millis(50)).await;
    let winner = winners.first().map(|lease| lease.token().as_str().to_string());
    for store in &cluster.stores {
        let holder = store.holder(KEY);
        assert!(holder.is_none() || holder == winner, "stray token on {:?}", holder);
    }
}

#[tokio::test(start_paused = true)]
async fn stale_release_does_not_touch_another_token() {
    let cluster = Cluster::new(LockConfig::default());
    let shared: Vec<SharedStore> = cluster.stores.iter().map(|s| s.clone() as SharedStore).collect();
    let coordinator = QuorumCoordinator::new(
        shared,
        Arc::new(LockConfig::default()),
        LockEventPublisher::new(16),
    )
    .unwrap();
    let key = LockKey::from(KEY);

    // First holder never extends; its entries run out
    let stale = coordinator.try_acquire(&key, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let fresh = coordinator.try_acquire(&key, Duration::from_secs(10)).await.unwrap();
    let result = coordinator.release(&key, &stale.token).await;

    assert!(result.successes.is_empty());
    assert_eq!(result.rejected.len(), 5);
    assert_eq!(cluster.holders(fresh.token.as_str()), 5);
}

#[tokio::test(start_paused = true)]
async fn release_frees_the_key_immediately() {
    let cluster = Cluster::new(LockConfig::default());

    let first = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cluster.mutex.release(first).await, LeaseState::Released);
    // The release round finishes in the background
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cluster.holders(second.token().as_str()), 5);
}

#[tokio::test(start_paused = true)]
async fn acquire_times_out_while_held() {
    let cluster = Cluster::new(LockConfig::default());
    let _holder = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap();

    let started = Instant::now();
    let err = cluster
        .mutex
        .acquire(KEY, Duration::from_secs(10), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::AcquireTimeout { .. }));
    assert!(err.is_retryable());
    // The wait is bounded by max_wait plus one attempt
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn waiter_acquires_after_release() {
    let cluster = Arc::new(Cluster::new(LockConfig::default()));
    let holder = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap();

    let waiter = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            cluster
                .mutex
                .acquire(KEY, Duration::from_secs(10), Duration::from_secs(5))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    cluster.mutex.release(holder).await;

    let lease = waiter.await.unwrap().unwrap();
    assert!(cluster.mutex.is_held(&lease));
}

#[tokio::test(start_paused = true)]
async fn dropped_handle_releases_the_key() {
    let cluster = Cluster::new(LockConfig::default());
    let lease = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(60))
        .await
        .unwrap();
    drop(lease);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(cluster.stores.iter().all(|s| s.holder(KEY).is_none()));
}

#[tokio::test(start_paused = true)]
async fn max_extensions_leads_to_expired() {
    let cluster = Cluster::new(LockConfig {
        max_extensions: 2,
        ..Default::default()
    });
    let mut events = cluster.mutex.subscribe();

    let lease = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(lease.cancelled().await, LeaseState::Expired);
    assert_eq!(lease.extensions(), 2);

    assert_eq!(
        drain(&mut events),
        vec![
            LockEventKind::Acquired,
            LockEventKind::Extended,
            LockEventKind::Extended,
            LockEventKind::Expired,
        ]
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cluster.stores.iter().all(|s| s.holder(KEY).is_none()));
}

#[tokio::test(start_paused = true)]
async fn slow_backend_counts_as_unreachable() {
    let cluster = Cluster::new(LockConfig::default());
    // Per-call budget for a 1s TTL is 100ms
    cluster.stores[0].set_latency(Duration::from_millis(300));
    cluster.stores[1].set_latency(Duration::from_millis(300));

    let lease = cluster
        .mutex
        .try_acquire(KEY, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(cluster.holders(lease.token().as_str()), 3);
}

#[tokio::test(start_paused = true)]
async fn health_check_reports_quorum() {
    let cluster = Cluster::new(LockConfig::default());
    cluster.take_down(&[0, 1]);

    let report = cluster.mutex.check_backends().await;
    assert_eq!(report.reachable(), 3);
    assert!(report.quorum_reachable());

    cluster.take_down(&[2]);
    assert!(!cluster.mutex.check_backends().await.quorum_reachable());
}
