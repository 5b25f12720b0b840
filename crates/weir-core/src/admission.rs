//! Sum-typed admission outcomes.
//!
//! Expected drops are data, not errors: nothing in the admission pipeline
//! unwinds. Each denied packet is converted to a counter update and, for the
//! high-frequency reasons, a sampled debug log.

/// Outcome of offering a payload to the admission pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    /// The payload was forwarded across the link.
    Admitted,
    /// The payload was dropped; the reason selects the counter to bump.
    Denied(DropReason),
}

/// Why a packet was dropped, on either side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Payload did not match any allow-listed protocol prefix.
    ProtocolRejected,
    /// Source IP exceeded its per-second packet budget.
    RateLimited,
    /// Global token bucket was empty.
    Shaped,
    /// Payload exceeded the configured size limit.
    PayloadTooLarge,
    /// Circuit breaker rejected the send without attempting it.
    CircuitOpen,
    /// The UDP send was attempted and failed.
    SendFailed,
    /// S2 worker pool was saturated; datagram discarded at the listener.
    BackpressureDropped,
    /// Frame failed CRC validation (or was shorter than the envelope).
    IntegrityFailed,
    /// Atomic persist failed; the staged temp file was removed.
    WriteFailed,
}

impl DropReason {
    /// Stable label used in logs and the status surface.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolRejected => "protocol_rejected",
            Self::RateLimited => "rate_limited",
            Self::Shaped => "shaped_dropped",
            Self::PayloadTooLarge => "payload_too_large",
            Self::CircuitOpen => "breaker_open_rejected",
            Self::SendFailed => "send_failed",
            Self::BackpressureDropped => "s2_backpressure_dropped",
            Self::IntegrityFailed => "integrity_failed",
            Self::WriteFailed => "write_failed",
        }
    }
}
