//! Wire frame codec for the weir one-way gateway.
//!
//! Every datagram crossing the S1→S2 link is a self-describing frame:
//!
//! ```text
//! offset 0  : source IPv4 address     (4 bytes, network order)
//! offset 4  : source port             (2 bytes, big-endian)
//! offset 6  : payload                 (N bytes, 0 ≤ N ≤ MAX_PAYLOAD)
//! offset 6+N: CRC32 over [0 .. 6+N)   (4 bytes, big-endian)
//! ```
//!
//! Total size is `10 + N`. The CRC is CRC-32/ISO-HDLC (the IEEE polynomial
//! 0xEDB88320), computed over the exact concatenation `ip‖port‖payload`.
//! Receivers recompute over the same range and reject on mismatch; there is
//! no frame without a CRC.
//!
//! This crate is pure codec: no sockets, no clocks, no allocation beyond the
//! encode buffer. Decoding borrows the payload from the input.

mod errors;
mod frame;

pub use errors::ProtocolError;
pub use frame::{
    DecodedFrame, HEADER_LEN, HEARTBEAT_MARKER, MAX_PAYLOAD, MIN_FRAME_LEN, decode, encode,
    encode_into, heartbeat_frame,
};
