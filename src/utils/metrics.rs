//! Observability and Metrics
//!
//! Pipeline-wide counters for packets moving through handlers, handshake outcomes and DDoS
//! escalations.
//!
//! Uses atomic counters so handlers on different threads can share the global instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for pipeline operations
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams produced by outgoing processing
    pub packets_out: AtomicU64,
    /// Datagrams delivered by incoming processing
    pub packets_in: AtomicU64,
    /// Bytes handed to the low-level send closure
    pub bytes_out: AtomicU64,
    /// Bytes received from the transport
    pub bytes_in: AtomicU64,
    /// Incoming packets dropped without error
    pub silent_drops: AtomicU64,
    /// Incoming packets rejected as malformed or adversarial
    pub hard_errors: AtomicU64,
    /// Outgoing packets buffered before initialisation
    pub packets_buffered: AtomicU64,
    /// Reliability retransmissions
    pub resends: AtomicU64,
    /// Handshakes initiated by clients
    pub handshakes_started: AtomicU64,
    /// Handshakes acknowledged
    pub handshakes_completed: AtomicU64,
    /// Challenge responses rejected by a server
    pub handshakes_rejected: AtomicU64,
    /// DDoS severity escalations
    pub ddos_escalations: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            packets_out: AtomicU64::new(0),
            packets_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            silent_drops: AtomicU64::new(0),
            hard_errors: AtomicU64::new(0),
            packets_buffered: AtomicU64::new(0),
            resends: AtomicU64::new(0),
            handshakes_started: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            ddos_escalations: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a datagram sent
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram received from the transport
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn silent_drop(&self) {
        self.silent_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hard_error(&self) {
        self.hard_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_buffered(&self) {
        self.packets_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resend(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a client starting (or restarting) a handshake
    pub fn handshake_started(&self) {
        self.handshakes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ddos_escalation(&self) {
        self.ddos_escalations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_out: self.packets_out.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            silent_drops: self.silent_drops.load(Ordering::Relaxed),
            hard_errors: self.hard_errors.load(Ordering::Relaxed),
            packets_buffered: self.packets_buffered.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            ddos_escalations: self.ddos_escalations.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_out = snapshot.packets_out,
            packets_in = snapshot.packets_in,
            bytes_out = snapshot.bytes_out,
            bytes_in = snapshot.bytes_in,
            silent_drops = snapshot.silent_drops,
            hard_errors = snapshot.hard_errors,
            packets_buffered = snapshot.packets_buffered,
            resends = snapshot.resends,
            handshakes_started = snapshot.handshakes_started,
            handshakes_completed = snapshot.handshakes_completed,
            handshakes_rejected = snapshot.handshakes_rejected,
            ddos_escalations = snapshot.ddos_escalations,
            uptime_seconds = snapshot.uptime_seconds,
            "Pipeline metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub packets_out: u64,
    pub packets_in: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub silent_drops: u64,
    pub hard_errors: u64,
    pub packets_buffered: u64,
    pub resends: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshakes_rejected: u64,
    pub ddos_escalations: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring how long a pipeline stage takes
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters_and_snapshot() {
        let metrics = Metrics::new();
        metrics.packet_sent(40);
        metrics.packet_sent(2);
        metrics.hard_error();
        metrics.handshake_started();

        let snap = metrics.snapshot();
        assert_eq!(snap.packets_out, 2);
        assert_eq!(snap.bytes_out, 42);
        assert_eq!(snap.hard_errors, 1);
        assert_eq!(snap.handshakes_started, 1);
        assert_eq!(snap.silent_drops, 0);
    }
}
