//! Fuzz target for frame decoding.
//!
//! Arbitrary byte sequences must never panic the decoder: short buffers,
//! corrupted CRCs and truncated envelopes all return errors. A decoded frame
//! must also re-encode to the identical bytes (the codec has one canonical
//! form).

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = weir_proto::decode(data) {
        let reencoded = weir_proto::encode(frame.src_ip, frame.src_port, frame.payload)
            .expect("decoded payload is within the frame limit");
        assert_eq!(reencoded, data, "decode/encode must be canonical");
    }
});
