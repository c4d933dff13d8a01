//! Fan-out counters.
//!
//! Counters are updated with relaxed atomics from topic tasks and read
//! through [`FanoutMetrics::snapshot`] or the Prometheus text export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Counters for every registry.
pub struct FanoutMetrics {
    started_at: Instant,

    // Transport metrics
    transports_opened: AtomicU64,
    transports_closed: AtomicU64,
    open_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    channel_errors: AtomicU64,

    // Delivery metrics
    events_dispatched: AtomicU64,
    callbacks_invoked: AtomicU64,
    callback_failures: AtomicU64,
    dropped_after_close: AtomicU64,
    duplicates_dropped: AtomicU64,
    normalize_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub transports_opened: u64,
    pub transports_closed: u64,
    pub open_failures: u64,
    pub reconnect_attempts: u64,
    pub channel_errors: u64,
    pub events_dispatched: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
    pub dropped_after_close: u64,
    pub duplicates_dropped: u64,
    pub normalize_failures: u64,
}

impl FanoutMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            transports_opened: AtomicU64::new(0),
            transports_closed: AtomicU64::new(0),
            open_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            channel_errors: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            callbacks_invoked: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            dropped_after_close: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            normalize_failures: AtomicU64::new(0),
        }
    }

    pub fn record_transport_opened(&self) {
        self.transports_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_closed(&self) {
        self.transports_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_error(&self) {
        self.channel_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dispatched event and how its callbacks fared.
    pub fn record_dispatch(&self, invoked: u64, failed: u64) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.callbacks_invoked.fetch_add(invoked, Ordering::Relaxed);
        self.callback_failures.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_dropped_after_close(&self) {
        self.dropped_after_close.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_normalize_failure(&self) {
        self.normalize_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Transports currently open according to the counters.
    pub fn open_transports(&self) -> u64 {
        let opened = self.transports_opened.load(Ordering::Relaxed);
        let closed = self.transports_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            transports_opened: self.transports_opened.load(Ordering::Relaxed),
            transports_closed: self.transports_closed.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            dropped_after_close: self.dropped_after_close.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            normalize_failures: self.normalize_failures.load(Ordering::Relaxed),
        }
    }

    /// Export to Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            (
                "transports_opened_total",
                "Transport channels opened",
                snapshot.transports_opened,
            ),
            (
                "transports_closed_total",
                "Transport channels closed",
                snapshot.transports_closed,
            ),
            ("open_failures_total", "Failed channel opens", snapshot.open_failures),
            ("reconnect_attempts_total", "Reconnect attempts", snapshot.reconnect_attempts),
            (
                "channel_errors_total",
                "Channel errors reported by the transport",
                snapshot.channel_errors,
            ),
            (
                "events_dispatched_total",
                "Events dispatched to callbacks",
                snapshot.events_dispatched,
            ),
            ("callbacks_invoked_total", "Callback invocations", snapshot.callbacks_invoked),
            (
                "callback_failures_total",
                "Callback invocations that failed",
                snapshot.callback_failures,
            ),
            (
                "dropped_after_close_total",
                "Events dropped because the topic was closed",
                snapshot.dropped_after_close,
            ),
            ("duplicates_dropped_total", "Redelivered events dropped", snapshot.duplicates_dropped),
            (
                "normalize_failures_total",
                "Payloads that could not be normalized",
                snapshot.normalize_failures,
            ),
        ];

        let mut out = String::new();
        out.push_str("# HELP relaycast_uptime_seconds Registry uptime in seconds\n");
        out.push_str("# TYPE relaycast_uptime_seconds gauge\n");
        out.push_str(&format!("relaycast_uptime_seconds {}\n\n", snapshot.uptime_secs));

        for (name, help, value) in counters {
            out.push_str(&format!("# HELP relaycast_{} {}\n", name, help));
            out.push_str(&format!("# TYPE relaycast_{} counter\n", name));
            out.push_str(&format!("relaycast_{} {}\n\n", name, value));
        }

        out
    }
}

impl Default for FanoutMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<FanoutMetrics>;

/// Create a new shared metrics handle.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(FanoutMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_counters() {
        let metrics = FanoutMetrics::new();
        metrics.record_dispatch(2, 1);
        metrics.record_dispatch(3, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_dispatched, 2);
        assert_eq!(snapshot.callbacks_invoked, 5);
        assert_eq!(snapshot.callback_failures, 1);
    }

    #[test]
    fn test_open_transports() {
        let metrics = FanoutMetrics::new();
        metrics.record_transport_opened();
        metrics.record_transport_opened();
        metrics.record_transport_closed();
        assert_eq!(metrics.open_transports(), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = FanoutMetrics::new();
        metrics.record_duplicate();

        let text = metrics.to_prometheus();
        assert!(text.contains("relaycast_duplicates_dropped_total 1"));
        assert!(text.contains("# TYPE relaycast_events_dispatched_total counter"));
    }
}
