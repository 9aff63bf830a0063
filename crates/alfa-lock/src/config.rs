//! Lock coordinator configuration
//!
//! Every tunable of the quorum protocol is supplied from outside. Defaults
//! match the classic Redlock parameters.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Per-call timeout never drops below this
const MIN_BACKEND_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// TTL used by `DistributedMutex::lock`
    #[serde(default = "default_ttl")]
    pub default_ttl_ms: u64,
    /// Upper bound for a single backend call
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,
    /// Fraction of the TTL reserved for clock drift
    #[serde(default = "default_drift_factor")]
    pub clock_drift_factor: f64,
    /// Fixed drift allowance added on top of the factor
    #[serde(default = "default_drift_min")]
    pub clock_drift_min_ms: u64,
    /// Retries after the first attempt for `DistributedMutex::lock`
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_min")]
    pub retry_delay_min_ms: u64,
    #[serde(default = "default_retry_delay_max")]
    pub retry_delay_max_ms: u64,
    /// Point of the validity window at which an extension is attempted
    #[serde(default = "default_extend_ratio")]
    pub extend_ratio: f64,
    #[serde(default = "default_auto_extend")]
    pub auto_extend: bool,
    /// Maximum extensions per lease (0 = unlimited)
    #[serde(default)]
    pub max_extensions: u32,
    /// Capacity of the lifecycle event channel
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    /// Required successes; majority of the backends when unset
    #[serde(default)]
    pub quorum: Option<usize>,
}

fn default_ttl() -> u64 {
    10_000 // 10 seconds
}

fn default_backend_timeout() -> u64 {
    200
}

fn default_drift_factor() -> f64 {
    0.01
}

fn default_drift_min() -> u64 {
    2
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_min() -> u64 {
    100
}

fn default_retry_delay_max() -> u64 {
    300
}

fn default_extend_ratio() -> f64 {
    0.5
}

fn default_auto_extend() -> bool {
    true
}

fn default_event_queue_size() -> usize {
    256
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl(),
            backend_timeout_ms: default_backend_timeout(),
            clock_drift_factor: default_drift_factor(),
            clock_drift_min_ms: default_drift_min(),
            retry_count: default_retry_count(),
            retry_delay_min_ms: default_retry_delay_min(),
            retry_delay_max_ms: default_retry_delay_max(),
            extend_ratio: default_extend_ratio(),
            auto_extend: default_auto_extend(),
            max_extensions: 0,
            event_queue_size: default_event_queue_size(),
            quorum: None,
        }
    }
}

impl LockConfig {
    /// Check the settings against a backend set of size `backends`
    pub fn validate(&self, backends: usize) -> Result<()> {
        if backends == 0 {
            return Err(LockError::InvalidConfig(
                "at least one lock backend is required".to_string(),
            ));
        }
        if self.default_ttl_ms == 0 {
            return Err(LockError::InvalidConfig(
                "default_ttl_ms must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.clock_drift_factor) {
            return Err(LockError::InvalidConfig(format!(
                "clock_drift_factor must be in [0, 1), got {}",
                self.clock_drift_factor
            )));
        }
        if !(self.extend_ratio > 0.0 && self.extend_ratio < 1.0) {
            return Err(LockError::InvalidConfig(format!(
                "extend_ratio must be in (0, 1), got {}",
                self.extend_ratio
            )));
        }
        if self.retry_delay_min_ms > self.retry_delay_max_ms {
            return Err(LockError::InvalidConfig(format!(
                "retry_delay_min_ms ({}) exceeds retry_delay_max_ms ({})",
                self.retry_delay_min_ms, self.retry_delay_max_ms
            )));
        }
        if self.event_queue_size == 0 {
            return Err(LockError::InvalidConfig(
                "event_queue_size must be positive".to_string(),
            ));
        }
        if let Some(quorum) = self.quorum
            && (quorum <= backends / 2 || quorum > backends)
        {
            return Err(LockError::InvalidConfig(format!(
                "quorum {} must be a majority of {} backends",
                quorum, backends
            )));
        }
        Ok(())
    }

    /// Successes required out of `backends`
    pub fn quorum_for(&self, backends: usize) -> usize {
        self.quorum.unwrap_or(backends / 2 + 1)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Per-call timeout for a round using `ttl`: TTL/10 capped by `backend_timeout_ms`
    pub fn backend_timeout_for(&self, ttl: Duration) -> Duration {
        (ttl / 10)
            .min(self.backend_timeout())
            .max(MIN_BACKEND_TIMEOUT)
    }

    /// Per-call timeout for rounds that carry no TTL (release, ping)
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms).max(MIN_BACKEND_TIMEOUT)
    }

    /// Drift allowance subtracted from `ttl`
    pub fn drift_for(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.clock_drift_factor) + Duration::from_millis(self.clock_drift_min_ms)
    }

    /// Random delay in `[retry_delay_min, retry_delay_max]`
    pub fn retry_delay(&self) -> Duration {
        let ms = if self.retry_delay_min_ms >= self.retry_delay_max_ms {
            self.retry_delay_min_ms
        } else {
            rand::rng().random_range(self.retry_delay_min_ms..=self.retry_delay_max_ms)
        };
        Duration::from_millis(ms)
    }
}
