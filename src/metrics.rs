//! Observability counters for an external metrics collector.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared atomic counters updated on the hot per-tick and I/O paths.
///
/// Counters only ever increase (except `last_staleness_ticks`, a gauge).
/// External collectors take a [`MetricsSnapshot`] at their own cadence.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// State snapshots handed to `publish`.
    pub frames_published: AtomicU64,
    /// State frames actually written to the transport.
    pub frames_sent: AtomicU64,
    /// Publishes that never made the wire: session not synchronized, or
    /// overwritten in the outbound slot before the I/O task sent them.
    pub frames_dropped: AtomicU64,
    /// Frames received and decoded from the peer.
    pub frames_received: AtomicU64,
    /// Received buffers that failed to decode.
    pub decode_errors: AtomicU64,
    /// Missing sequence numbers observed on the inbound direction.
    pub sequence_gaps: AtomicU64,
    pub commands_accepted: AtomicU64,
    pub commands_rejected: AtomicU64,
    /// Lockstep ticks that elapsed without a command.
    pub command_timeouts: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    /// Gauge: `tick_now - command.tick_id` of the last applied command.
    pub last_staleness_ticks: AtomicU64,
}

impl BridgeMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set(gauge: &AtomicU64, value: u64) {
        gauge.store(value, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            command_timeouts: self.command_timeouts.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            last_staleness_ticks: self.last_staleness_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`BridgeMetrics`] for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_published: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub sequence_gaps: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub command_timeouts: u64,
    pub reconnect_attempts: u64,
    pub last_staleness_ticks: u64,
}
