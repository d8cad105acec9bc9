// src/utils/metrics.rs
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Counters shared by the encoder pump, the channel and the repaint loop.
#[derive(Debug)]
pub struct SessionMetrics {
    start_time: Instant,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    encode_failures: AtomicU64,
    messages_received: AtomicU64,
    protocol_errors: AtomicU64,
    repaints: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub encode_failures: u64,
    pub messages_received: u64,
    pub protocol_errors: u64,
    pub repaints: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            repaints: AtomicU64::new(0),
        }
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_message(&self, valid: bool) {
        self.messages_received.fetch_add(1, Ordering::SeqCst);
        if !valid {
            self.protocol_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn record_repaint(&self) {
        self.repaints.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            encode_failures: self.encode_failures.load(Ordering::SeqCst),
            messages_received: self.messages_received.load(Ordering::SeqCst),
            protocol_errors: self.protocol_errors.load(Ordering::SeqCst),
            repaints: self.repaints.load(Ordering::SeqCst),
        }
    }

    /// Emits the current counters as one structured log line.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            frames_sent = snapshot.frames_sent,
            frames_dropped = snapshot.frames_dropped,
            encode_failures = snapshot.encode_failures,
            messages_received = snapshot.messages_received,
            protocol_errors = snapshot.protocol_errors,
            repaints = snapshot.repaints,
            uptime_ms = self.uptime().as_millis() as u64,
            "Session metrics"
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
