//! Frame encode/decode.
//!
//! The frame is small enough that parsing is two slice reads and a CRC pass;
//! the payload is returned as a borrow into the input buffer so the receive
//! path copies payload bytes exactly once (into the spool file).

use std::net::Ipv4Addr;

use bytes::BufMut;
use crc::{CRC_32_ISO_HDLC, Crc};

use crate::errors::ProtocolError;

/// Fixed envelope ahead of the payload: 4 bytes IPv4 + 2 bytes port.
pub const HEADER_LEN: usize = 6;

/// CRC32 trailer length.
const TRAILER_LEN: usize = 4;

/// Minimum valid frame: empty payload, envelope + CRC only.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;

/// Maximum payload carried by a single frame (1 MiB).
pub const MAX_PAYLOAD: usize = 1_048_576;

/// In-band liveness beacon payload.
///
/// A beacon is only trusted when it also carries source port 0; the marker
/// alone can be injected by any TCP client and is then treated as data.
pub const HEARTBEAT_MARKER: &[u8] = b"HEARTBEAT";

/// CRC-32/ISO-HDLC, reflected polynomial 0xEDB88320.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A successfully validated frame, borrowing the payload from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    /// Source IPv4 address recorded by the ingress side
    pub src_ip: Ipv4Addr,
    /// Source port recorded by the ingress side (0 for beacons)
    pub src_port: u16,
    /// Payload bytes, borrowed from the receive buffer
    pub payload: &'a [u8],
}

impl DecodedFrame<'_> {
    /// True when this frame is the liveness beacon.
    ///
    /// Requires both the marker payload and source port 0. Port 0 cannot be
    /// produced by a real TCP or UDP peer, so a client pushing the literal
    /// marker bytes through S1 does not spoof liveness at S2.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.src_port == 0 && self.payload == HEARTBEAT_MARKER
    }
}

/// Encode a frame into a fresh buffer.
///
/// # Errors
///
/// `ProtocolError::PayloadTooLarge` if `payload.len() > MAX_PAYLOAD`.
pub fn encode(src_ip: Ipv4Addr, src_port: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    encode_into(&mut buf, src_ip, src_port, payload)?;
    Ok(buf)
}

/// Encode a frame into an existing buffer.
///
/// Writes `ip(4) + port(2) + payload + crc32(4)`. The CRC covers every byte
/// written before it, so the emitted frame always satisfies `decode`.
///
/// # Errors
///
/// `ProtocolError::PayloadTooLarge` if `payload.len() > MAX_PAYLOAD`. Nothing
/// is written on error.
pub fn encode_into(
    dst: &mut impl BufMut,
    src_ip: Ipv4Addr,
    src_port: u16,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: MAX_PAYLOAD });
    }

    let mut digest = CRC32.digest();
    let ip = src_ip.octets();
    let port = src_port.to_be_bytes();
    digest.update(&ip);
    digest.update(&port);
    digest.update(payload);

    dst.put_slice(&ip);
    dst.put_slice(&port);
    dst.put_slice(payload);
    dst.put_u32(digest.finalize());

    Ok(())
}

/// Decode and validate a frame.
///
/// Zero-copy: the returned payload borrows from `frame`.
///
/// # Errors
///
/// - `ProtocolError::TooShort` if `frame.len() < 10`
/// - `ProtocolError::IntegrityCheckFailed` if the recomputed CRC over
///   `ip‖port‖payload` does not match the trailer
pub fn decode(frame: &[u8]) -> Result<DecodedFrame<'_>, ProtocolError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::TooShort { expected: MIN_FRAME_LEN, actual: frame.len() });
    }

    let crc_at = frame.len() - TRAILER_LEN;
    let covered = &frame[..crc_at];

    // INVARIANT: crc_at >= HEADER_LEN (length checked above), so both the
    // trailer read and the header reads below are in bounds.
    let mut trailer = [0u8; TRAILER_LEN];
    trailer.copy_from_slice(&frame[crc_at..]);
    let expected = u32::from_be_bytes(trailer);

    let actual = CRC32.checksum(covered);
    if actual != expected {
        return Err(ProtocolError::IntegrityCheckFailed { expected, actual });
    }

    let src_ip = Ipv4Addr::new(frame[0], frame[1], frame[2], frame[3]);
    let src_port = u16::from_be_bytes([frame[4], frame[5]]);

    Ok(DecodedFrame { src_ip, src_port, payload: &covered[HEADER_LEN..] })
}

/// Build the liveness beacon frame emitted by the encapsulator.
///
/// The beacon carries the ingress host address, source port 0 and the
/// `HEARTBEAT` marker payload.
#[must_use]
pub fn heartbeat_frame(src_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MIN_FRAME_LEN + HEARTBEAT_MARKER.len());

    // INVARIANT: the marker is 9 bytes, far below MAX_PAYLOAD.
    #[allow(clippy::expect_used)]
    encode_into(&mut buf, src_ip, 0, HEARTBEAT_MARKER)
        .expect("invariant: heartbeat marker is below the payload limit");
    buf
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_ip() -> impl Strategy<Value = Ipv4Addr> {
        any::<u32>().prop_map(Ipv4Addr::from)
    }

    proptest! {
        #[test]
        fn frame_round_trip(
            ip in arb_ip(),
            port in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let wire = encode(ip, port, &payload).expect("should encode");
            prop_assert_eq!(wire.len(), MIN_FRAME_LEN + payload.len());

            let parsed = decode(&wire).expect("should decode");
            prop_assert_eq!(parsed.src_ip, ip);
            prop_assert_eq!(parsed.src_port, port);
            prop_assert_eq!(parsed.payload, &payload[..]);
        }

        /// Any single-bit flip anywhere in the frame is detected.
        ///
        /// CRC32 is linear: flipping one bit XORs the expected checksum with a
        /// nonzero constant, so a single-bit flip can never pass verification.
        #[test]
        fn single_bit_flip_is_rejected(
            ip in arb_ip(),
            port in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
            flip in any::<prop::sample::Index>(),
        ) {
            let mut wire = encode(ip, port, &payload).expect("should encode");
            let bit = flip.index(wire.len() * 8);
            wire[bit / 8] ^= 1 << (bit % 8);

            prop_assert!(
                matches!(
                    decode(&wire),
                    Err(ProtocolError::IntegrityCheckFailed { .. })
                ),
                "bit flip should be rejected"
            );
        }
    }

    #[test]
    fn empty_payload_is_a_valid_ten_byte_frame() {
        let wire = encode(Ipv4Addr::new(10, 0, 0, 1), 502, &[]).unwrap();
        assert_eq!(wire.len(), MIN_FRAME_LEN);

        let parsed = decode(&wire).unwrap();
        assert_eq!(parsed.src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(parsed.src_port, 502);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn reject_short_frames() {
        assert_eq!(decode(&[]), Err(ProtocolError::TooShort { expected: 10, actual: 0 }));

        let nine = [0u8; 9];
        assert_eq!(decode(&nine), Err(ProtocolError::TooShort { expected: 10, actual: 9 }));
    }

    #[test]
    fn reject_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let result = encode(Ipv4Addr::LOCALHOST, 80, &payload);
        assert_eq!(
            result,
            Err(ProtocolError::PayloadTooLarge { size: MAX_PAYLOAD + 1, max: MAX_PAYLOAD })
        );
    }

    #[test]
    fn max_payload_is_accepted() {
        let payload = vec![0xA5u8; MAX_PAYLOAD];
        let wire = encode(Ipv4Addr::LOCALHOST, 80, &payload).unwrap();
        let parsed = decode(&wire).unwrap();
        assert_eq!(parsed.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn reject_legacy_frame_without_crc() {
        // Historical emitters wrote ip + port + payload with no trailer. The
        // last four payload bytes are then read as a CRC and cannot match.
        let mut legacy = Vec::new();
        legacy.extend_from_slice(&Ipv4Addr::new(192, 168, 1, 9).octets());
        legacy.extend_from_slice(&502u16.to_be_bytes());
        legacy.extend_from_slice(b"raw modbus registers");

        assert!(matches!(decode(&legacy), Err(ProtocolError::IntegrityCheckFailed { .. })));
    }

    #[test]
    fn heartbeat_recognition_requires_port_zero() {
        let beacon = heartbeat_frame(Ipv4Addr::new(10, 0, 0, 1));
        let parsed = decode(&beacon).unwrap();
        assert!(parsed.is_heartbeat());
        assert_eq!(parsed.src_port, 0);

        // Same marker bytes pushed through S1 by a TCP client: nonzero source
        // port, therefore ordinary data.
        let spoof = encode(Ipv4Addr::new(10, 0, 0, 1), 33000, HEARTBEAT_MARKER).unwrap();
        let parsed = decode(&spoof).unwrap();
        assert!(!parsed.is_heartbeat());
    }

    #[test]
    fn known_wire_layout() {
        // 1.2.3.4:80, payload "X": check exact offsets.
        let wire = encode(Ipv4Addr::new(1, 2, 3, 4), 80, b"X").unwrap();
        assert_eq!(&wire[0..4], &[1, 2, 3, 4]);
        assert_eq!(&wire[4..6], &[0, 80]);
        assert_eq!(&wire[6..7], b"X");
        assert_eq!(wire.len(), 11);

        let crc = u32::from_be_bytes([wire[7], wire[8], wire[9], wire[10]]);
        assert_eq!(crc, CRC32.checksum(&wire[..7]));
    }
}
