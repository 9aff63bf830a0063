// Lease lifecycle management
// One background task per held lease schedules extensions and reports loss

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::event::{LockEvent, LockEventKind};
use crate::model::{Lease, LeaseState, LockKey, LockToken, QuorumResult};
use crate::quorum::QuorumCoordinator;

/// Snapshot of a lease as seen by its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseStatus {
    pub state: LeaseState,
    pub expires_at: Instant,
    pub extensions: u32,
}

impl LeaseStatus {
    fn of(lease: &Lease, state: LeaseState) -> Self {
        Self {
            state,
            expires_at: lease.expires_at(),
            extensions: lease.extensions,
        }
    }
}

/// Starts and supervises lease tasks
#[derive(Clone)]
pub struct LeaseManager {
    coordinator: Arc<QuorumCoordinator>,
}

impl LeaseManager {
    pub fn new(coordinator: Arc<QuorumCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Take ownership of a freshly acquired lease
    pub fn start(&self, lease: Lease) -> LeaseHandle {
        let (status_tx, status_rx) = watch::channel(LeaseStatus::of(&lease, LeaseState::Held));
        let (stop_tx, stop_rx) = oneshot::channel();
        let key = lease.key.clone();
        let token = lease.token.clone();

        let task = LeaseTask {
            coordinator: self.coordinator.clone(),
            lease,
            status: status_tx,
        };
        tokio::spawn(task.run(stop_rx));

        LeaseHandle {
            key,
            token,
            status: status_rx,
            stop: Some(stop_tx),
        }
    }
}

/// Holder's view of a lease
///
/// Dropping the handle stops extension and releases the lock in the
/// background.
pub struct LeaseHandle {
    key: LockKey,
    token: LockToken,
    status: watch::Receiver<LeaseStatus>,
    stop: Option<oneshot::Sender<()>>,
}

impl LeaseHandle {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub fn status(&self) -> LeaseStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> LeaseState {
        self.status.borrow().state
    }

    pub fn extensions(&self) -> u32 {
        self.status.borrow().extensions
    }

    /// Time left before the current validity window closes
    pub fn remaining(&self) -> Duration {
        self.status
            .borrow()
            .expires_at
            .saturating_duration_since(Instant::now())
    }

    /// HELD or EXTENDING, and still inside the validity window
    pub fn is_held(&self) -> bool {
        let status = self.status.borrow();
        status.state.is_active() && Instant::now() < status.expires_at
    }

    /// Resolves with the terminal state once the lease ends for any reason
    pub async fn cancelled(&self) -> LeaseState {
        let mut status = self.status.clone();
        // The task only exits after publishing a terminal state
        let _ = status.wait_for(|s| s.state.is_terminal()).await;
        self.state()
    }

    /// Stop extending and release on every backend
    ///
    /// Returns as soon as the lease task marks the lease RELEASED. The
    /// backend release round carries on in the background and is not
    /// awaited. Releasing an already LOST or EXPIRED lease is a no-op.
    pub async fn release(mut self) -> LeaseState {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.cancelled().await
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        // Signalling is enough; the task finishes the release on its own
        if let Some(stop) = self.stop.take()
            && stop.send(()).is_ok()
        {
            debug!(key = %self.key, "Lease handle dropped, releasing in background");
        }
    }
}

impl std::fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("status", &self.status())
            .finish()
    }
}

enum ExtendOutcome {
    Stopped,
    DeadlinePassed,
    Finished(Result<QuorumResult, LockError>),
}

struct LeaseTask {
    coordinator: Arc<QuorumCoordinator>,
    lease: Lease,
    status: watch::Sender<LeaseStatus>,
}

impl LeaseTask {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let config = self.coordinator.config();
        let auto_extend = config.auto_extend;
        let max_extensions = config.max_extensions;
        let extend_ratio = config.extend_ratio;

        loop {
            let limit_reached =
                !auto_extend || (max_extensions > 0 && self.lease.extensions >= max_extensions);
            let wake_at = if limit_reached {
                self.lease.expires_at()
            } else {
                self.lease.acquired_at + self.lease.validity.mul_f64(extend_ratio)
            };

            tokio::select! {
                biased;
                // A dropped sender means the handle went away, which also stops the lease
                _ = &mut stop => {
                    self.release().await;
                    return;
                }
                _ = sleep_until(wake_at) => {}
            }

            if limit_reached {
                self.expire().await;
                return;
            }

            self.set_state(LeaseState::Extending);
            let deadline = self.lease.expires_at();
            let outcome = tokio::select! {
                biased;
                _ = &mut stop => ExtendOutcome::Stopped,
                _ = sleep_until(deadline) => ExtendOutcome::DeadlinePassed,
                result = self.coordinator.extend(&mut self.lease) => ExtendOutcome::Finished(result),
            };

            match outcome {
                ExtendOutcome::Finished(Ok(result)) => {
                    debug!(
                        key = %self.lease.key,
                        extensions = self.lease.extensions,
                        remaining_ms = self.lease.remaining().as_millis() as u64,
                        "Lease extended"
                    );
                    self.set_state(LeaseState::Held);
                    self.publish(LockEventKind::Extended, result.successes.len());
                }
                ExtendOutcome::Finished(Err(e)) => {
                    // The coordinator already forced a release
                    warn!(key = %self.lease.key, error = %e, "Lease lost");
                    self.set_state(LeaseState::Lost);
                    self.publish(LockEventKind::Lost, 0);
                    return;
                }
                ExtendOutcome::DeadlinePassed => {
                    warn!(key = %self.lease.key, "Lease extension outran the validity window");
                    self.set_state(LeaseState::Lost);
                    self.publish(LockEventKind::Lost, 0);
                    self.coordinator
                        .release(&self.lease.key, &self.lease.token)
                        .await;
                    return;
                }
                ExtendOutcome::Stopped => {
                    self.release().await;
                    return;
                }
            }
        }
    }

    async fn release(&mut self) {
        self.set_state(LeaseState::Released);
        let result = self
            .coordinator
            .release(&self.lease.key, &self.lease.token)
            .await;
        info!(
            key = %self.lease.key,
            released = result.successes.len(),
            "Lock released"
        );
        self.publish(LockEventKind::Released, result.successes.len());
    }

    async fn expire(&mut self) {
        info!(
            key = %self.lease.key,
            extensions = self.lease.extensions,
            "Lease expired"
        );
        self.set_state(LeaseState::Expired);
        self.publish(LockEventKind::Expired, 0);
        self.coordinator
            .release(&self.lease.key, &self.lease.token)
            .await;
    }

    fn set_state(&self, state: LeaseState) {
        self.status.send_replace(LeaseStatus::of(&self.lease, state));
    }

    fn publish(&self, kind: LockEventKind, successes: usize) {
        self.coordinator.events().publish(LockEvent::new(
            kind,
            &self.lease.key,
            &self.lease.token,
            successes,
        ));
    }
}
