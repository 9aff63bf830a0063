//! Lock data model
//!
//! Keys, tokens, leases and the per-round quorum tally.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifier of a logical resource guarded by a lock
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LockKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&LockKey> for LockKey {
    fn from(value: &LockKey) -> Self {
        value.clone()
    }
}

/// Ownership proof minted once per acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Mint a fresh random token. Tokens are never reused across attempts.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lease lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// Quorum round for the initial set is in flight
    Acquiring,
    /// Lock is held and an extension is scheduled
    Held,
    /// Extension round is in flight
    Extending,
    /// Holder released the lock
    Released,
    /// Extension failed to reach quorum or outran the deadline
    Lost,
    /// Lease ran out without being extended
    Expired,
}

impl LeaseState {
    /// `true` while the holder may still act on the lock
    pub fn is_active(self) -> bool {
        matches!(self, LeaseState::Held | LeaseState::Extending)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LeaseState::Released | LeaseState::Lost | LeaseState::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeaseState::Acquiring => "acquiring",
            LeaseState::Held => "held",
            LeaseState::Extending => "extending",
            LeaseState::Released => "released",
            LeaseState::Lost => "lost",
            LeaseState::Expired => "expired",
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-bounded ownership grant produced by a successful quorum round
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: LockKey,
    pub token: LockToken,
    /// Nominal TTL written to every backend
    pub ttl: Duration,
    /// Monotonic instant the last successful quorum round completed
    pub acquired_at: Instant,
    /// Drift adjusted validity observed at the last quorum round
    pub validity: Duration,
    /// Backends that confirmed the last round
    pub quorum_size: usize,
    /// Successful extension rounds so far
    pub extensions: u32,
}

impl Lease {
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.validity
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    /// Refresh timing after a successful extension round
    pub(crate) fn refresh(&mut self, result: &QuorumResult, completed_at: Instant) {
        self.acquired_at = completed_at;
        self.validity = result.drift_adjusted_ttl;
        self.quorum_size = result.successes.len();
        self.extensions += 1;
    }
}

/// Outcome of one fan-out round across all backends
#[derive(Debug, Clone, Default)]
pub struct QuorumResult {
    /// Backends that applied the operation
    pub successes: BTreeSet<String>,
    /// Backends that answered but refused (held by another token, or absent)
    pub rejected: BTreeSet<String>,
    /// Backends that errored or did not answer within the per-call timeout
    pub unreachable: BTreeSet<String>,
    /// Wall time of the round
    pub elapsed: Duration,
    /// `ttl - elapsed - drift`, zero once the budget is exhausted
    pub drift_adjusted_ttl: Duration,
    /// Successes required for the round to count
    pub quorum: usize,
}

impl QuorumResult {
    pub fn has_quorum(&self) -> bool {
        self.successes.len() >= self.quorum
    }

    /// Quorum reached and some validity left after drift
    pub fn is_valid(&self) -> bool {
        self.has_quorum() && !self.drift_adjusted_ttl.is_zero()
    }

    pub fn backend_count(&self) -> usize {
        self.successes.len() + self.rejected.len() + self.unreachable.len()
    }
}
