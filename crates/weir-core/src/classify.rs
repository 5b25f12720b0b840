//! Deep-packet-inspection protocol whitelist.
//!
//! The classifier looks only at payload prefixes; it never parses past the
//! bytes needed to recognize a protocol envelope. Unknown tags cannot reach
//! this module: tag names are validated during configuration deserialization,
//! so an allow-list here is always well-formed.

use serde::{Deserialize, Serialize};

/// A recognizable industrial-protocol envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolTag {
    /// Admit everything.
    Any,
    /// Modbus-TCP: MBAP header with protocol identifier 0x0000.
    Modbus,
    /// DNP3: 0x05 0x64 start bytes.
    Dnp3,
    /// MQTT: control packet type nibble in [1, 14].
    Mqtt,
    /// SNMP: BER SEQUENCE followed by an INTEGER version field.
    Snmp,
}

impl ProtocolTag {
    /// True when `payload` carries this protocol's envelope.
    #[must_use]
    pub fn matches(self, payload: &[u8]) -> bool {
        match self {
            Self::Any => true,
            Self::Modbus => payload.len() >= 7 && payload[2] == 0x00 && payload[3] == 0x00,
            Self::Dnp3 => payload.len() >= 2 && payload[0] == 0x05 && payload[1] == 0x64,
            Self::Mqtt => {
                !payload.is_empty() && matches!(payload[0] >> 4, 1..=14)
            },
            Self::Snmp => payload.len() >= 3 && payload[0] == 0x30 && payload[2] == 0x02,
        }
    }
}

/// Allow-list classifier for the admission pipeline.
#[derive(Debug, Clone)]
pub struct Classifier {
    allow: Vec<ProtocolTag>,
}

impl Classifier {
    /// Build a classifier from the configured allow-list.
    #[must_use]
    pub fn new(allow: Vec<ProtocolTag>) -> Self {
        Self { allow }
    }

    /// True if any allow-listed tag matches the payload.
    ///
    /// An empty allow-list denies everything.
    #[must_use]
    pub fn admits(&self, payload: &[u8]) -> bool {
        self.allow.iter().any(|tag| tag.matches(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODBUS_READ: &[u8] = &[0x01, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];

    #[test]
    fn modbus_requires_mbap_protocol_id() {
        assert!(ProtocolTag::Modbus.matches(MODBUS_READ));

        // Nonzero protocol identifier
        assert!(!ProtocolTag::Modbus.matches(&[0x01, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01]));
        // Shorter than an MBAP header
        assert!(!ProtocolTag::Modbus.matches(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x06]));
    }

    #[test]
    fn dnp3_start_bytes() {
        assert!(ProtocolTag::Dnp3.matches(&[0x05, 0x64, 0x0B, 0xC4]));
        assert!(!ProtocolTag::Dnp3.matches(&[0x05]));
        assert!(!ProtocolTag::Dnp3.matches(&[0x64, 0x05, 0x00]));
    }

    #[test]
    fn mqtt_control_nibble_range() {
        // CONNECT (1) through DISCONNECT (14)
        assert!(ProtocolTag::Mqtt.matches(&[0x10, 0x00]));
        assert!(ProtocolTag::Mqtt.matches(&[0xE0, 0x00]));

        // Reserved types 0 and 15
        assert!(!ProtocolTag::Mqtt.matches(&[0x00, 0x00]));
        assert!(!ProtocolTag::Mqtt.matches(&[0xF0, 0x00]));
        assert!(!ProtocolTag::Mqtt.matches(&[]));
    }

    #[test]
    fn snmp_ber_prefix() {
        // SEQUENCE, length, INTEGER tag
        assert!(ProtocolTag::Snmp.matches(&[0x30, 0x26, 0x02, 0x01, 0x01]));
        assert!(!ProtocolTag::Snmp.matches(&[0x30, 0x26]));
        assert!(!ProtocolTag::Snmp.matches(&[0x31, 0x26, 0x02]));
    }

    #[test]
    fn any_admits_everything_including_empty() {
        assert!(ProtocolTag::Any.matches(&[]));
        assert!(ProtocolTag::Any.matches(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn empty_allow_list_denies_everything() {
        let classifier = Classifier::new(Vec::new());
        assert!(!classifier.admits(MODBUS_READ));
        assert!(!classifier.admits(&[]));
    }

    #[test]
    fn first_matching_tag_admits() {
        let classifier = Classifier::new(vec![ProtocolTag::Dnp3, ProtocolTag::Modbus]);
        assert!(classifier.admits(MODBUS_READ));
        assert!(classifier.admits(&[0x05, 0x64, 0x00]));
        assert!(!classifier.admits(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn tag_names_deserialize_lowercase() {
        let tags = deserialize_tags(&["any", "modbus", "dnp3", "mqtt", "snmp"]);
        assert_eq!(
            tags,
            vec![
                ProtocolTag::Any,
                ProtocolTag::Modbus,
                ProtocolTag::Dnp3,
                ProtocolTag::Mqtt,
                ProtocolTag::Snmp,
            ]
        );
    }

    fn deserialize_tags(names: &[&str]) -> Vec<ProtocolTag> {
        use serde::de::{IntoDeserializer, value::StrDeserializer};

        names
            .iter()
            .map(|name| {
                let de: StrDeserializer<'_, serde::de::value::Error> = name.into_deserializer();
                ProtocolTag::deserialize(de).expect("known tag")
            })
            .collect()
    }
}
