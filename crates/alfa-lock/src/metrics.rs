// Metrics for lock lifecycle events
// Counters, gauges and histograms recorded through the `metrics` facade;
// the exporter is installed by the binary

use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::event::{LockEvent, LockEventKind, LockEventListener};

pub const LOCK_EVENTS_TOTAL: &str = "alfa_lock_events_total";
pub const LOCK_BACKEND_SUCCESSES: &str = "alfa_lock_backend_successes";
pub const LOCKS_HELD: &str = "alfa_lock_held";

/// Register metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(
        LOCK_EVENTS_TOTAL,
        "Total number of lock lifecycle events by kind"
    );
    describe_histogram!(
        LOCK_BACKEND_SUCCESSES,
        "Backends confirming each quorum round"
    );
    describe_gauge!(LOCKS_HELD, "Number of leases currently held by this process");

    tracing::info!("Lock metrics initialized");
}

/// Record one lifecycle event
pub fn record_event(event: &LockEvent) {
    let kind = event.kind.as_str();
    counter!(LOCK_EVENTS_TOTAL, "event" => kind).increment(1);
    histogram!(LOCK_BACKEND_SUCCESSES, "event" => kind).record(event.backend_successes as f64);

    match event.kind {
        LockEventKind::Acquired => gauge!(LOCKS_HELD).increment(1.0),
        LockEventKind::Released | LockEventKind::Lost | LockEventKind::Expired => {
            gauge!(LOCKS_HELD).decrement(1.0)
        }
        LockEventKind::Extended | LockEventKind::AcquisitionFailed => {}
    }
}

/// Event listener that feeds every event into the metrics facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsListener;

#[async_trait]
impl LockEventListener for MetricsListener {
    async fn on_event(&self, event: &LockEvent) {
        record_event(event);
    }
}
