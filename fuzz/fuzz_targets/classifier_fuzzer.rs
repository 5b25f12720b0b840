//! Fuzz target for the protocol classifier.
//!
//! The classifier reads untrusted payload prefixes; no payload may panic it,
//! and `any` must dominate every other tag.

#![no_main]

use libfuzzer_sys::fuzz_target;
use weir_core::classify::{Classifier, ProtocolTag};

fuzz_target!(|payload: &[u8]| {
    let tags =
        [ProtocolTag::Any, ProtocolTag::Modbus, ProtocolTag::Dnp3, ProtocolTag::Mqtt, ProtocolTag::Snmp];

    for tag in tags {
        let _ = tag.matches(payload);
    }

    let everything = Classifier::new(tags.to_vec());
    assert!(everything.admits(payload), "a list containing `any` admits all payloads");

    let nothing = Classifier::new(Vec::new());
    assert!(!nothing.admits(payload), "an empty allow-list denies all payloads");
});
