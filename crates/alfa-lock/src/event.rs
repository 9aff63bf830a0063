// Lock lifecycle events
// Broadcasts acquisition, extension, loss and release to observability listeners

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use alfa_common::current_timestamp;

use crate::model::{LockKey, LockToken};

/// Type of lifecycle event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventKind {
    /// Quorum reached on the initial set
    Acquired,
    /// Extension round reached quorum
    Extended,
    /// Extension failed; the holder must stop
    Lost,
    /// Holder released the lock
    Released,
    /// Lease ran out without being extended
    Expired,
    /// A single acquisition attempt failed to reach quorum
    AcquisitionFailed,
}

impl LockEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockEventKind::Acquired => "acquired",
            LockEventKind::Extended => "extended",
            LockEventKind::Lost => "lost",
            LockEventKind::Released => "released",
            LockEventKind::Expired => "expired",
            LockEventKind::AcquisitionFailed => "acquisition_failed",
        }
    }
}

impl std::fmt::Display for LockEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockEvent {
    pub kind: LockEventKind,
    pub key: LockKey,
    pub token: LockToken,
    /// Backends that confirmed the round behind this event
    pub backend_successes: usize,
    /// Unix millis
    pub timestamp: i64,
}

impl LockEvent {
    pub fn new(
        kind: LockEventKind,
        key: &LockKey,
        token: &LockToken,
        backend_successes: usize,
    ) -> Self {
        Self {
            kind,
            key: key.clone(),
            token: token.clone(),
            backend_successes,
            timestamp: current_timestamp(),
        }
    }
}

/// Receives every lifecycle event published after registration
#[async_trait]
pub trait LockEventListener: Send + Sync {
    async fn on_event(&self, event: &LockEvent);
}

/// Fan-out point for lifecycle events
#[derive(Clone)]
pub struct LockEventPublisher {
    sender: broadcast::Sender<LockEvent>,
}

impl LockEventPublisher {
    pub fn new(queue_size: usize) -> Self {
        let (sender, _) = broadcast::channel(queue_size.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers, returns how many received it
    pub fn publish(&self, event: LockEvent) -> usize {
        debug!(
            kind = %event.kind,
            key = %event.key,
            successes = event.backend_successes,
            "Lock event"
        );
        // No subscribers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Forward events to `listener` on a background task
    pub fn register_listener(&self, listener: Arc<dyn LockEventListener>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => listener.on_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Lock event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
