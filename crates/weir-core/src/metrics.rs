//! The typed counter record every admission decision updates.
//!
//! The metrics store proper (Prometheus exposition, capture files) is an
//! external collaborator; the gateway's contract with it is this record. All
//! counters are lock-free atomics shared through one `Arc`, so hot paths pay
//! a single relaxed add and the control surface reads a consistent-enough
//! snapshot without stopping the data plane.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

use crate::admission::DropReason;

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Add one.
    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add `n`.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counter record for one gateway process.
///
/// Ingress and egress processes share the type; each side only touches its
/// own counters, and the snapshot reports both groups.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Ingress (S1)
    /// Frames sent across the link.
    pub packets_forwarded: Counter,
    /// Payload bytes sent across the link.
    pub bytes_forwarded: Counter,
    /// Drops: payload matched no allow-listed protocol.
    pub protocol_rejected: Counter,
    /// Drops: per-source packet budget exceeded.
    pub rate_limited: Counter,
    /// Drops: global token bucket empty.
    pub shaped_dropped: Counter,
    /// Drops: breaker rejected the send without attempting it.
    pub breaker_open_rejected: Counter,
    /// UDP sends that were attempted and failed.
    pub send_failed: Counter,
    /// Drops: payload above the configured size limit.
    pub payload_too_large: Counter,
    /// TCP connections accepted.
    pub connections_accepted: Counter,
    /// TCP connections closed by the accept throttle.
    pub connections_throttled: Counter,
    /// Ingress traffic from non-IPv4 peers, dropped.
    pub non_ipv4_rejected: Counter,
    /// Heartbeat beacons emitted.
    pub heartbeats_sent: Counter,

    // Egress (S2)
    /// Frames validated and persisted.
    pub packets_received: Counter,
    /// Payload bytes persisted.
    pub bytes_received: Counter,
    /// Frames failing CRC validation or shorter than the envelope.
    pub integrity_failed: Counter,
    /// Atomic persists that failed (temp file removed).
    pub write_failed: Counter,
    /// Datagrams discarded because the worker pool was saturated.
    pub s2_backpressure_dropped: Counter,
    /// Heartbeat beacons observed.
    pub heartbeats_seen: Counter,
    /// Transitions into the link-dead state.
    pub link_dead_events: Counter,
    /// Recoveries out of the link-dead state.
    pub link_recovered_events: Counter,

    // Supervision
    /// Tasks that ended in a panic, caught at the join point.
    pub handler_panics: Counter,
    /// Component restarts performed by the supervisor.
    pub child_restarts: Counter,
}

impl GatewayMetrics {
    /// Create a zeroed, shareable record.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bump the counter matching a drop reason and return the new count.
    ///
    /// The returned count drives 1-in-100 log sampling at the call sites.
    pub fn record_drop(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::ProtocolRejected => self.protocol_rejected.incr(),
            DropReason::RateLimited => self.rate_limited.incr(),
            DropReason::Shaped => self.shaped_dropped.incr(),
            DropReason::PayloadTooLarge => self.payload_too_large.incr(),
            DropReason::CircuitOpen => self.breaker_open_rejected.incr(),
            DropReason::SendFailed => self.send_failed.incr(),
            DropReason::BackpressureDropped => self.s2_backpressure_dropped.incr(),
            DropReason::IntegrityFailed => self.integrity_failed.incr(),
            DropReason::WriteFailed => self.write_failed.incr(),
        }
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_forwarded: self.packets_forwarded.get(),
            bytes_forwarded: self.bytes_forwarded.get(),
            protocol_rejected: self.protocol_rejected.get(),
            rate_limited: self.rate_limited.get(),
            shaped_dropped: self.shaped_dropped.get(),
            breaker_open_rejected: self.breaker_open_rejected.get(),
            send_failed: self.send_failed.get(),
            payload_too_large: self.payload_too_large.get(),
            connections_accepted: self.connections_accepted.get(),
            connections_throttled: self.connections_throttled.get(),
            non_ipv4_rejected: self.non_ipv4_rejected.get(),
            heartbeats_sent: self.heartbeats_sent.get(),
            packets_received: self.packets_received.get(),
            bytes_received: self.bytes_received.get(),
            integrity_failed: self.integrity_failed.get(),
            write_failed: self.write_failed.get(),
            s2_backpressure_dropped: self.s2_backpressure_dropped.get(),
            heartbeats_seen: self.heartbeats_seen.get(),
            link_dead_events: self.link_dead_events.get(),
            link_recovered_events: self.link_recovered_events.get(),
            handler_panics: self.handler_panics.get(),
            child_restarts: self.child_restarts.get(),
        }
    }
}

/// Plain-data counter snapshot for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub protocol_rejected: u64,
    pub rate_limited: u64,
    pub shaped_dropped: u64,
    pub breaker_open_rejected: u64,
    pub send_failed: u64,
    pub payload_too_large: u64,
    pub connections_accepted: u64,
    pub connections_throttled: u64,
    pub non_ipv4_rejected: u64,
    pub heartbeats_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub integrity_failed: u64,
    pub write_failed: u64,
    pub s2_backpressure_dropped: u64,
    pub heartbeats_seen: u64,
    pub link_dead_events: u64,
    pub link_recovered_events: u64,
    pub handler_panics: u64,
    pub child_restarts: u64,
}
