//! Redlock quorum coordinator
//!
//! Drives acquisition, extension and release of one named lock across N
//! independent stores:
//!
//! 1. mint a fresh token and record `t0`
//! 2. issue the operation to every store concurrently, each call bounded by
//!    the per-call timeout
//! 3. count successes; the round is valid when `successes >= quorum` and
//!    `ttl - elapsed - drift` is still positive
//! 4. on an invalid acquisition, send a release to every store, including
//!    the ones that failed or timed out, so no partial lock is left behind
//!
//! A failed extension is lock loss, never a retry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::event::{LockEvent, LockEventKind, LockEventPublisher};
use crate::model::{Lease, LockKey, LockToken, QuorumResult};
use crate::store::SharedStore;

/// How one backend answered a call
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallOutcome {
    Succeeded,
    Rejected,
    Unreachable(String),
}

/// A pending call tagged with the backend id
type BackendCall<'a> = (String, BoxFuture<'a, Result<bool>>);

/// Bounds for a retried acquisition
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; unbounded when `None`
    pub max_attempts: Option<u32>,
    /// Attempts in flight are abandoned at this instant and no new one starts
    pub deadline: Option<Instant>,
}

impl RetryPolicy {
    /// A single attempt
    pub fn once() -> Self {
        Self {
            max_attempts: Some(1),
            deadline: None,
        }
    }

    /// First attempt plus `retries` more
    pub fn retries(retries: u32) -> Self {
        Self {
            max_attempts: Some(retries.saturating_add(1)),
            deadline: None,
        }
    }

    /// Keep trying until `max_wait` has elapsed
    ///
    /// A `max_wait` too large to represent as an instant means no deadline.
    pub fn until(max_wait: Duration) -> Self {
        Self {
            max_attempts: None,
            deadline: Instant::now().checked_add(max_wait),
        }
    }
}

/// Redlock coordinator over a fixed set of stores
pub struct QuorumCoordinator {
    stores: Arc<Vec<SharedStore>>,
    config: Arc<LockConfig>,
    quorum: usize,
    events: LockEventPublisher,
}

impl QuorumCoordinator {
    pub fn new(
        stores: Vec<SharedStore>,
        config: Arc<LockConfig>,
        events: LockEventPublisher,
    ) -> Result<Self> {
        config.validate(stores.len())?;
        let quorum = config.quorum_for(stores.len());
        info!(
            backends = stores.len(),
            quorum, "Lock quorum coordinator initialized"
        );
        Ok(Self {
            stores: Arc::new(stores),
            config,
            quorum,
            events,
        })
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn backend_count(&self) -> usize {
        self.stores.len()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn stores(&self) -> &[SharedStore] {
        &self.stores
    }

    pub fn events(&self) -> &LockEventPublisher {
        &self.events
    }

    /// Acquire `key`, retrying with randomized backoff within `policy`
    ///
    /// Every attempt uses a new token. Returns the last `QuorumNotReached`
    /// when attempts run out, or `AcquireTimeout` once the deadline passes.
    /// The deadline also cuts short an attempt still in flight; its partial
    /// lock is released in the background.
    pub async fn acquire(&self, key: &LockKey, ttl: Duration, policy: &RetryPolicy) -> Result<Lease> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if attempts > 0
                && let Some(deadline) = policy.deadline
                && Instant::now() >= deadline
            {
                return Err(timed_out(key, started, attempts));
            }

            attempts += 1;
            let attempt = self.try_acquire(key, ttl);
            let outcome = match policy.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, attempt).await.ok(),
                None => Some(attempt.await),
            };
            let err = match outcome {
                Some(Ok(lease)) => return Ok(lease),
                Some(Err(err)) => err,
                None => {
                    debug!(key = %key, attempts, "Lock acquisition attempt cut off by deadline");
                    return Err(timed_out(key, started, attempts));
                }
            };

            if policy.max_attempts.is_some_and(|max| attempts >= max) {
                debug!(key = %key, attempts, "Lock acquisition attempts exhausted");
                return Err(err);
            }

            let mut delay = self.config.retry_delay();
            if let Some(deadline) = policy.deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(timed_out(key, started, attempts));
                }
                delay = delay.min(deadline - now);
            }

            debug!(key = %key, attempts, delay_ms = delay.as_millis() as u64, "Retrying lock acquisition");
            tokio::time::sleep(delay).await;
        }
    }

    /// One Redlock acquisition attempt
    pub async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<Lease> {
        let token = LockToken::generate();
        // Any exit other than success releases on every store
        let cleanup = CleanupGuard::new(self.stores.clone(), key, &token, self.config.backend_timeout());

        let start = Instant::now();
        let calls = self
            .stores
            .iter()
            .map(|store| (store.id().to_string(), store.try_set(key, &token, ttl)))
            .collect();
        let outcomes = fan_out(calls, self.config.backend_timeout_for(ttl)).await;
        let (result, finished) = self.tally(outcomes, start, ttl);

        if result.is_valid() {
            cleanup.disarm();
            let lease = Lease {
                key: key.clone(),
                token: token.clone(),
                ttl,
                acquired_at: finished,
                validity: result.drift_adjusted_ttl,
                quorum_size: result.successes.len(),
                extensions: 0,
            };
            info!(
                key = %key,
                token = %token,
                successes = result.successes.len(),
                validity_ms = lease.validity.as_millis() as u64,
                "Lock acquired"
            );
            self.events.publish(LockEvent::new(
                LockEventKind::Acquired,
                key,
                &token,
                result.successes.len(),
            ));
            return Ok(lease);
        }

        debug!(
            key = %key,
            successes = result.successes.len(),
            rejected = result.rejected.len(),
            unreachable = result.unreachable.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Lock acquisition attempt failed"
        );
        cleanup.release_now().await;
        self.events.publish(LockEvent::new(
            LockEventKind::AcquisitionFailed,
            key,
            &token,
            result.successes.len(),
        ));
        Err(LockError::QuorumNotReached {
            key: key.to_string(),
            successes: result.successes.len(),
            required: self.quorum,
        })
    }

    /// Extend `lease` with its own token
    ///
    /// On success the refreshed quorum result is returned and `lease` carries
    /// the new validity. On failure every store receives a forced release and
    /// `LockLost` is returned.
    pub async fn extend(&self, lease: &mut Lease) -> Result<QuorumResult> {
        let start = Instant::now();
        let calls = self
            .stores
            .iter()
            .map(|store| {
                (
                    store.id().to_string(),
                    store.try_extend(&lease.key, &lease.token, lease.ttl),
                )
            })
            .collect();
        let outcomes = fan_out(calls, self.config.backend_timeout_for(lease.ttl)).await;
        let (result, finished) = self.tally(outcomes, start, lease.ttl);

        if result.is_valid() {
            lease.refresh(&result, finished);
            debug!(
                key = %lease.key,
                successes = result.successes.len(),
                validity_ms = lease.validity.as_millis() as u64,
                "Lock extended"
            );
            return Ok(result);
        }

        warn!(
            key = %lease.key,
            token = %lease.token,
            successes = result.successes.len(),
            required = self.quorum,
            "Lock extension failed to reach quorum"
        );
        self.release(&lease.key, &lease.token).await;
        Err(LockError::LockLost {
            key: lease.key.to_string(),
        })
    }

    /// Best-effort release on every store
    ///
    /// Per-store failures are logged and never returned; backend TTL expiry
    /// covers anything that did not get through.
    pub async fn release(&self, key: &LockKey, token: &LockToken) -> QuorumResult {
        release_all(&self.stores, key, token, self.config.backend_timeout()).await
    }

    /// Ping every store
    pub async fn ping_all(&self) -> Vec<(String, Result<()>)> {
        let timeout = self.config.backend_timeout();
        let pings = self.stores.iter().map(|store| async move {
            let id = store.id().to_string();
            let outcome = match tokio::time::timeout(timeout, store.ping()).await {
                Ok(result) => result,
                Err(_) => Err(LockError::unreachable(&id, format!("no reply within {:?}", timeout))),
            };
            (id, outcome)
        });
        join_all(pings).await
    }

    /// Count the votes of a round; also returns the instant `elapsed` was measured at
    ///
    /// Validity counts from that instant, so `finished + drift_adjusted_ttl`
    /// never exceeds `start + ttl - drift`.
    fn tally(
        &self,
        outcomes: Vec<(String, CallOutcome)>,
        start: Instant,
        ttl: Duration,
    ) -> (QuorumResult, Instant) {
        let finished = Instant::now();
        let elapsed = finished.saturating_duration_since(start);
        let mut result = QuorumResult {
            elapsed,
            drift_adjusted_ttl: ttl
                .saturating_sub(elapsed)
                .saturating_sub(self.config.drift_for(ttl)),
            quorum: self.quorum,
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                CallOutcome::Succeeded => {
                    result.successes.insert(id);
                }
                CallOutcome::Rejected => {
                    result.rejected.insert(id);
                }
                CallOutcome::Unreachable(reason) => {
                    debug!(backend = %id, reason = %reason, "Backend unreachable");
                    result.unreachable.insert(id);
                }
            }
        }
        (result, finished)
    }
}

fn timed_out(key: &LockKey, started: Instant, attempts: u32) -> LockError {
    LockError::AcquireTimeout {
        key: key.to_string(),
        waited: started.elapsed(),
        attempts,
    }
}

/// Run all calls concurrently, each bounded by `timeout`
async fn fan_out(calls: Vec<BackendCall<'_>>, timeout: Duration) -> Vec<(String, CallOutcome)> {
    let pending = calls.into_iter().map(|(id, call)| async move {
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(true)) => CallOutcome::Succeeded,
            Ok(Ok(false)) => CallOutcome::Rejected,
            Ok(Err(err)) => CallOutcome::Unreachable(err.to_string()),
            Err(_) => CallOutcome::Unreachable(format!("no reply within {:?}", timeout)),
        };
        (id, outcome)
    });
    join_all(pending).await
}

async fn release_all(
    stores: &[SharedStore],
    key: &LockKey,
    token: &LockToken,
    timeout: Duration,
) -> QuorumResult {
    let start = Instant::now();
    let calls = stores
        .iter()
        .map(|store| (store.id().to_string(), store.try_release(key, token)))
        .collect();
    let outcomes = fan_out(calls, timeout).await;

    let mut result = QuorumResult {
        elapsed: start.elapsed(),
        ..Default::default()
    };
    for (id, outcome) in outcomes {
        match outcome {
            CallOutcome::Succeeded => {
                result.successes.insert(id);
            }
            CallOutcome::Rejected => {
                result.rejected.insert(id);
            }
            CallOutcome::Unreachable(reason) => {
                warn!(backend = %id, key = %key, reason = %reason, "Lock release failed on backend");
                result.unreachable.insert(id);
            }
        }
    }
    debug!(
        key = %key,
        released = result.successes.len(),
        failed = result.unreachable.len(),
        "Lock release issued"
    );
    result
}

/// Releases a token on every store unless disarmed
///
/// Covers the explicit failure path (`release_now`) and cancellation: if the
/// acquisition future is dropped mid-round, `Drop` spawns the release on the
/// current runtime.
struct CleanupGuard {
    stores: Arc<Vec<SharedStore>>,
    key: LockKey,
    token: LockToken,
    timeout: Duration,
    armed: bool,
}

impl CleanupGuard {
    fn new(stores: Arc<Vec<SharedStore>>, key: &LockKey, token: &LockToken, timeout: Duration) -> Self {
        Self {
            stores,
            key: key.clone(),
            token: token.clone(),
            timeout,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    /// Stays armed until the round completes, so a cancelled release is
    /// picked up again by `Drop`
    async fn release_now(mut self) {
        release_all(&self.stores, &self.key, &self.token, self.timeout).await;
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let stores = self.stores.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Acquisition cancelled, releasing partial lock");
                handle.spawn(async move {
                    release_all(&stores, &key, &token, timeout).await;
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime to release a cancelled acquisition; relying on TTL expiry");
            }
        }
    }
}
