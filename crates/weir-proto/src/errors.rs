//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds the hard frame limit.
    ///
    /// Raised by the encoder before any bytes are written. Receivers cannot
    /// observe this error: a datagram longer than `10 + MAX_PAYLOAD` never
    /// decodes because the sender refuses to build it.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Offered payload length
        size: usize,
        /// Maximum permitted payload length
        max: usize,
    },

    /// Frame is shorter than the 10-byte minimum (empty payload + envelope).
    #[error("frame too short: {actual} bytes, need at least {expected}")]
    TooShort {
        /// Minimum frame length
        expected: usize,
        /// Observed frame length
        actual: usize,
    },

    /// CRC32 recomputed over `ip‖port‖payload` does not match the trailer.
    ///
    /// Covers corruption anywhere in the frame, including the CRC bytes
    /// themselves, and rejects the historical no-CRC frame variant.
    #[error("integrity check failed: expected {expected:#010x}, computed {actual:#010x}")]
    IntegrityCheckFailed {
        /// CRC carried in the frame trailer
        expected: u32,
        /// CRC recomputed by the receiver
        actual: u32,
    },
}
