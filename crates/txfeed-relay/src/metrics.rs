//! Relay metrics.
//!
//! Counters are updated by the dispatcher and broadcaster and exported as
//! JSON (for `/health`) or Prometheus text (for `/metrics`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Counters for one relay instance.
pub struct RelayMetrics {
    started_at: Instant,

    // Dispatch outcomes
    notifications: AtomicU64,
    broadcasts: AtomicU64,
    misses: AtomicU64,
    ignored: AtomicU64,
    failures: AtomicU64,

    // Per-client delivery
    frames_delivered: AtomicU64,
    frames_skipped: AtomicU64,
    send_failures: AtomicU64,
    connections_pruned: AtomicU64,
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub notifications: u64,
    pub broadcasts: u64,
    pub misses: u64,
    pub ignored: u64,
    pub failures: u64,
    pub frames_delivered: u64,
    pub frames_skipped: u64,
    pub send_failures: u64,
    pub connections_pruned: u64,
}

impl RelayMetrics {
    /// Create a zeroed metrics set.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            notifications: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            connections_pruned: AtomicU64::new(0),
        }
    }

    /// Record a notification entering the dispatcher.
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed broadcast pass.
    pub fn record_broadcast(&self, delivered: u64, skipped: u64, failed: u64) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered.fetch_add(delivered, Ordering::Relaxed);
        self.frames_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.send_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a lookup that found no row.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification on an unhandled channel.
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event dropped because of an error.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record connections removed after being found closed.
    pub fn record_pruned(&self, count: u64) {
        self.connections_pruned.fetch_add(count, Ordering::Relaxed);
    }

    /// Uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            notifications: self.notifications.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            connections_pruned: self.connections_pruned.load(Ordering::Relaxed),
        }
    }

    /// Export in Prometheus text format.
    ///
    /// `connections` is the current registry size, reported as a gauge.
    pub fn to_prometheus(&self, connections: usize) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        write_metric(&mut out, "uptime_seconds", "gauge", "Relay uptime in seconds", s.uptime_secs);
        write_metric(
            &mut out,
            "connections",
            "gauge",
            "Registered streaming connections",
            connections as u64,
        );
        write_metric(
            &mut out,
            "notifications_total",
            "counter",
            "Notifications received",
            s.notifications,
        );
        write_metric(
            &mut out,
            "broadcasts_total",
            "counter",
            "Broadcast passes completed",
            s.broadcasts,
        );
        write_metric(
            &mut out,
            "misses_total",
            "counter",
            "Notifications with no matching record",
            s.misses,
        );
        write_metric(
            &mut out,
            "ignored_total",
            "counter",
            "Notifications on unhandled channels",
            s.ignored,
        );
        write_metric(
            &mut out,
            "failures_total",
            "counter",
            "Notifications dropped on error",
            s.failures,
        );
        write_metric(
            &mut out,
            "frames_delivered_total",
            "counter",
            "Frames queued to clients",
            s.frames_delivered,
        );
        write_metric(
            &mut out,
            "frames_skipped_total",
            "counter",
            "Frames skipped for closed clients",
            s.frames_skipped,
        );
        write_metric(
            &mut out,
            "send_failures_total",
            "counter",
            "Frames a client could not accept",
            s.send_failures,
        );
        write_metric(
            &mut out,
            "connections_pruned_total",
            "counter",
            "Closed connections removed",
            s.connections_pruned,
        );

        out
    }
}

fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP txfeed_{name} {help}\n"));
    out.push_str(&format!("# TYPE txfeed_{name} {kind}\n"));
    out.push_str(&format!("txfeed_{name} {value}\n\n"));
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle.
pub type SharedRelayMetrics = Arc<RelayMetrics>;

/// Create a new shared metrics set.
pub fn new_shared_metrics() -> SharedRelayMetrics {
    Arc::new(RelayMetrics::new())
}
