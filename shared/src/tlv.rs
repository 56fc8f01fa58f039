//! TLV wire encoding of [`ServiceRecord`].
//!
//! ```text
//! ServiceInfo      := SERVICE-INFO-TYPE TLV-LENGTH
//!                       Name?
//!                       ApplicationPrefix?
//!                       ServiceLifetime
//!                       PublishTimestamp
//!                       ServiceMetaInfo
//! ServiceMetaInfo  := SERVICE-META-INFO-TYPE TLV-LENGTH KeyValuePair*
//! KeyValuePair     := KEY-VALUE-PAIR-TYPE TLV-LENGTH Key Value
//! ```
//!
//! TYPE and LENGTH are NDN VAR-NUMBERs; integers are nonNegativeInteger
//! (1, 2, 4 or 8 bytes, big-endian); names and strings are UTF-8.
//!
//! Decoding is strict: an unrecognized child type is an error.

use std::collections::BTreeMap;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use crate::protocol::tlv_type;
use crate::types::{Name, ServiceRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid envelope type {found}, expected ServiceInfo")]
    InvalidEnvelopeType { found: u64 },

    #[error("unknown TLV type {tag} inside {parent}")]
    UnknownField { tag: u64, parent: &'static str },

    #[error("malformed TLV: {0}")]
    MalformedNesting(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("timestamp {0} is not whole seconds since the epoch")]
    UnrepresentableTimestamp(DateTime<Utc>),
}

impl CodecError {
    fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedNesting(msg.into())
    }
}

/// Encode a record. Both names must be non-empty and the publish timestamp
/// whole seconds at or after the epoch.
pub fn encode(record: &ServiceRecord) -> Result<Vec<u8>, CodecError> {
    if record.service_name.is_empty() {
        return Err(CodecError::MissingField("Name"));
    }
    if record.application_prefix.is_empty() {
        return Err(CodecError::MissingField("ApplicationPrefix"));
    }

    let mut body = Vec::new();
    write_tlv(&mut body, tlv_type::NAME, record.service_name.to_uri().as_bytes());
    write_tlv(
        &mut body,
        tlv_type::APPLICATION_PREFIX,
        record.application_prefix.to_uri().as_bytes(),
    );
    write_tlv(
        &mut body,
        tlv_type::SERVICE_LIFETIME,
        &non_negative_integer(record.service_lifetime),
    );
    let timestamp = wire_timestamp(record.publish_timestamp)?;
    write_tlv(
        &mut body,
        tlv_type::PUBLISH_TIMESTAMP,
        &non_negative_integer(timestamp),
    );

    let mut meta = Vec::new();
    for (key, value) in &record.metadata {
        let mut pair = Vec::new();
        write_tlv(&mut pair, tlv_type::KEY, key.as_bytes());
        write_tlv(&mut pair, tlv_type::VALUE, value.as_bytes());
        write_tlv(&mut meta, tlv_type::KEY_VALUE_PAIR, &pair);
    }
    write_tlv(&mut body, tlv_type::SERVICE_META_INFO, &meta);

    let mut wire = Vec::with_capacity(body.len() + 9);
    write_tlv(&mut wire, tlv_type::SERVICE_INFO, &body);
    Ok(wire)
}

/// Decode a record. Absent Name/ApplicationPrefix decode as empty names.
pub fn decode(wire: &[u8]) -> Result<ServiceRecord, CodecError> {
    let mut input = wire;
    let outer = read_element(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::malformed(format!(
            "{} trailing bytes after ServiceInfo",
            input.len()
        )));
    }
    if outer.tag != tlv_type::SERVICE_INFO {
        return Err(CodecError::InvalidEnvelopeType { found: outer.tag });
    }

    let mut service_name = Name::new();
    let mut application_prefix = Name::new();
    let mut lifetime = None;
    let mut timestamp = None;
    let mut metadata = BTreeMap::new();

    for element in elements(outer.value)? {
        match element.tag {
            tlv_type::NAME => service_name = Name::parse(read_str(element.value)?),
            tlv_type::APPLICATION_PREFIX => {
                application_prefix = Name::parse(read_str(element.value)?)
            }
            tlv_type::SERVICE_LIFETIME => {
                lifetime = Some(read_non_negative_integer(element.value)?)
            }
            tlv_type::PUBLISH_TIMESTAMP => {
                timestamp = Some(read_non_negative_integer(element.value)?)
            }
            tlv_type::SERVICE_META_INFO => {
                for pair in elements(element.value)? {
                    if pair.tag != tlv_type::KEY_VALUE_PAIR {
                        return Err(CodecError::UnknownField {
                            tag: pair.tag,
                            parent: "ServiceMetaInfo",
                        });
                    }
                    let (key, value) = read_key_value(pair.value)?;
                    metadata.insert(key, value);
                }
            }
            tag => {
                return Err(CodecError::UnknownField {
                    tag,
                    parent: "ServiceInfo",
                })
            }
        }
    }

    let service_lifetime = lifetime.ok_or(CodecError::MissingField("ServiceLifetime"))?;
    let secs = timestamp.ok_or(CodecError::MissingField("PublishTimestamp"))?;
    let publish_timestamp = i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| CodecError::malformed(format!("timestamp {} out of range", secs)))?;

    Ok(ServiceRecord {
        service_name,
        application_prefix,
        service_lifetime,
        publish_timestamp,
        metadata,
    })
}

fn wire_timestamp(ts: DateTime<Utc>) -> Result<u64, CodecError> {
    if ts.nanosecond() != 0 {
        return Err(CodecError::UnrepresentableTimestamp(ts));
    }
    u64::try_from(ts.timestamp()).map_err(|_| CodecError::UnrepresentableTimestamp(ts))
}

fn read_key_value(value: &[u8]) -> Result<(String, String), CodecError> {
    let mut key = None;
    let mut val = None;
    for element in elements(value)? {
        match element.tag {
            tlv_type::KEY => key = Some(read_str(element.value)?.to_string()),
            tlv_type::VALUE => val = Some(read_str(element.value)?.to_string()),
            tag => {
                return Err(CodecError::UnknownField {
                    tag,
                    parent: "KeyValuePair",
                })
            }
        }
    }
    Ok((
        key.ok_or(CodecError::MissingField("Key"))?,
        val.ok_or(CodecError::MissingField("Value"))?,
    ))
}

struct Element<'a> {
    tag: u64,
    value: &'a [u8],
}

fn elements(mut value: &[u8]) -> Result<Vec<Element<'_>>, CodecError> {
    let mut out = Vec::new();
    while !value.is_empty() {
        out.push(read_element(&mut value)?);
    }
    Ok(out)
}

fn read_element<'a>(input: &mut &'a [u8]) -> Result<Element<'a>, CodecError> {
    let tag = read_var_number(input)?;
    let len = read_var_number(input)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= input.len())
        .ok_or_else(|| {
            CodecError::malformed(format!(
                "TLV {} claims {} bytes, {} available",
                tag,
                len,
                input.len()
            ))
        })?;
    let (value, rest) = input.split_at(len);
    *input = rest;
    Ok(Element { tag, value })
}

fn read_var_number(input: &mut &[u8]) -> Result<u64, CodecError> {
    let (&first, rest) = input
        .split_first()
        .ok_or_else(|| CodecError::malformed("unexpected end of input"))?;
    let width = match first {
        0..=252 => {
            *input = rest;
            return Ok(u64::from(first));
        }
        253 => 2,
        254 => 4,
        255 => 8,
    };
    if rest.len() < width {
        return Err(CodecError::malformed("truncated VAR-NUMBER"));
    }
    let (bytes, rest) = rest.split_at(width);
    *input = rest;
    Ok(be_u64(bytes))
}

fn read_non_negative_integer(value: &[u8]) -> Result<u64, CodecError> {
    match value.len() {
        1 | 2 | 4 | 8 => Ok(be_u64(value)),
        n => Err(CodecError::malformed(format!(
            "nonNegativeInteger of length {}",
            n
        ))),
    }
}

fn read_str(value: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(value).map_err(|e| CodecError::malformed(format!("invalid UTF-8: {}", e)))
}

fn be_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn write_var_number(buf: &mut Vec<u8>, n: u64) {
    if n < 253 {
        buf.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        buf.push(253);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u64::from(u32::MAX) {
        buf.push(254);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(255);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn write_tlv(buf: &mut Vec<u8>, tag: u64, value: &[u8]) {
    write_var_number(buf, tag);
    write_var_number(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn non_negative_integer(n: u64) -> Vec<u8> {
    if n <= u64::from(u8::MAX) {
        vec![n as u8]
    } else if n <= u64::from(u16::MAX) {
        (n as u16).to_be_bytes().to_vec()
    } else if n <= u64::from(u32::MAX) {
        (n as u32).to_be_bytes().to_vec()
    } else {
        n.to_be_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_record() -> ServiceRecord {
        ServiceRecord::new(
            "/printer1",
            "/node-A",
            3600,
            BTreeMap::from([
                ("make".to_string(), "HP".to_string()),
                ("description".to_string(), "Hp Ledger Jet".to_string()),
            ]),
        )
    }

    #[test]
    fn test_roundtrip() {
        let record = test_record();
        let wire = encode(&record).unwrap();
        assert_eq!(decode(&wire).unwrap(), record);
    }

    #[test]
    fn test_roundtrip_edge_values() {
        // Empty metadata, zero lifetime, large values crossing VAR-NUMBER widths.
        let mut record = test_record();
        record.metadata.clear();
        record.service_lifetime = 0;
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);

        record.service_lifetime = u64::MAX;
        record.metadata.insert("blob".to_string(), "x".repeat(70_000));
        record.service_name = Name::parse("/FlightControl/Takeoff");
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);
    }

    #[test]
    fn test_field_order_on_encode() {
        let wire = encode(&test_record()).unwrap();
        let mut input = wire.as_slice();
        let outer = read_element(&mut input).unwrap();
        let tags: Vec<u64> = elements(outer.value).unwrap().iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            vec![
                tlv_type::NAME,
                tlv_type::APPLICATION_PREFIX,
                tlv_type::SERVICE_LIFETIME,
                tlv_type::PUBLISH_TIMESTAMP,
                tlv_type::SERVICE_META_INFO,
            ]
        );
    }

    #[test]
    fn test_decode_does_not_depend_on_order() {
        let mut body = Vec::new();
        write_tlv(&mut body, tlv_type::SERVICE_META_INFO, &[]);
        write_tlv(&mut body, tlv_type::PUBLISH_TIMESTAMP, &non_negative_integer(1_700_000_000));
        write_tlv(&mut body, tlv_type::SERVICE_LIFETIME, &non_negative_integer(60));
        write_tlv(&mut body, tlv_type::APPLICATION_PREFIX, b"/node-B");
        write_tlv(&mut body, tlv_type::NAME, b"/scanner");
        let mut wire = Vec::new();
        write_tlv(&mut wire, tlv_type::SERVICE_INFO, &body);

        let record = decode(&wire).unwrap();
        assert_eq!(record.service_name, Name::parse("/scanner"));
        assert_eq!(record.application_prefix, Name::parse("/node-B"));
        assert_eq!(record.service_lifetime, 60);
        assert_eq!(record.publish_timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_tolerates_absent_names() {
        let mut body = Vec::new();
        write_tlv(&mut body, tlv_type::SERVICE_LIFETIME, &non_negative_integer(10));
        write_tlv(&mut body, tlv_type::PUBLISH_TIMESTAMP, &non_negative_integer(5));
        write_tlv(&mut body, tlv_type::SERVICE_META_INFO, &[]);
        let mut wire = Vec::new();
        write_tlv(&mut wire, tlv_type::SERVICE_INFO, &body);

        let record = decode(&wire).unwrap();
        assert!(record.service_name.is_empty());
        assert!(record.application_prefix.is_empty());
    }

    #[test]
    fn test_rejects_wrong_envelope() {
        let mut wire = encode(&test_record()).unwrap();
        wire[0] = 128;
        assert_eq!(
            decode(&wire),
            Err(CodecError::InvalidEnvelopeType { found: 128 })
        );
    }

    #[test]
    fn test_rejects_unknown_field() {
        let mut body = Vec::new();
        write_tlv(&mut body, tlv_type::NAME, b"/printer1");
        write_tlv(&mut body, 200, b"future");
        let mut wire = Vec::new();
        write_tlv(&mut wire, tlv_type::SERVICE_INFO, &body);
        assert!(matches!(
            decode(&wire),
            Err(CodecError::UnknownField { tag: 200, .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_input() {
        let wire = encode(&test_record()).unwrap();
        for cut in [1, 2, wire.len() / 2, wire.len() - 1] {
            assert!(
                matches!(decode(&wire[..cut]), Err(CodecError::MalformedNesting(_))),
                "cut at {}",
                cut
            );
        }
        assert!(matches!(decode(&[]), Err(CodecError::MalformedNesting(_))));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut wire = encode(&test_record()).unwrap();
        wire.push(0);
        assert!(matches!(decode(&wire), Err(CodecError::MalformedNesting(_))));
    }

    #[test]
    fn test_rejects_key_without_value() {
        let mut pair = Vec::new();
        write_tlv(&mut pair, tlv_type::KEY, b"make");
        let mut meta = Vec::new();
        write_tlv(&mut meta, tlv_type::KEY_VALUE_PAIR, &pair);
        let mut body = Vec::new();
        write_tlv(&mut body, tlv_type::SERVICE_LIFETIME, &non_negative_integer(1));
        write_tlv(&mut body, tlv_type::PUBLISH_TIMESTAMP, &non_negative_integer(1));
        write_tlv(&mut body, tlv_type::SERVICE_META_INFO, &meta);
        let mut wire = Vec::new();
        write_tlv(&mut wire, tlv_type::SERVICE_INFO, &body);
        assert_eq!(decode(&wire), Err(CodecError::MissingField("Value")));
    }

    #[test]
    fn test_encode_requires_names() {
        let mut record = test_record();
        record.application_prefix = Name::new();
        assert_eq!(
            encode(&record),
            Err(CodecError::MissingField("ApplicationPrefix"))
        );
    }

    #[test]
    fn test_encode_rejects_unrepresentable_timestamps() {
        let mut record = test_record();
        record.publish_timestamp = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(
            encode(&record),
            Err(CodecError::UnrepresentableTimestamp(record.publish_timestamp))
        );

        record.publish_timestamp = Utc.timestamp_opt(-10, 0).unwrap();
        assert!(matches!(
            encode(&record),
            Err(CodecError::UnrepresentableTimestamp(_))
        ));

        record.publish_timestamp = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);
    }

    #[test]
    fn test_var_number_widths() {
        for n in [0u64, 252, 253, 65_535, 65_536, u64::from(u32::MAX) + 1] {
            let mut buf = Vec::new();
            write_var_number(&mut buf, n);
            let mut input = buf.as_slice();
            assert_eq!(read_var_number(&mut input).unwrap(), n);
            assert!(input.is_empty());
        }
    }

    fn name_strategy() -> impl Strategy<Value = Name> {
        prop::collection::vec("[A-Za-z0-9._-]{1,12}", 1..5).prop_map(|components| {
            components
                .into_iter()
                .fold(Name::new(), |name, component| name.child(component))
        })
    }

    prop_compose! {
        fn record_strategy()(
            service_name in name_strategy(),
            application_prefix in name_strategy(),
            service_lifetime in any::<u64>(),
            secs in 0i64..=253_402_300_799,
            metadata in prop::collection::btree_map(".{0,16}", ".{0,32}", 0..8),
        ) -> ServiceRecord {
            ServiceRecord {
                service_name,
                application_prefix,
                service_lifetime,
                publish_timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
                metadata,
            }
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip(record in record_strategy()) {
            let wire = encode(&record).unwrap();
            prop_assert_eq!(decode(&wire).unwrap(), record);
        }

        #[test]
        fn prop_decode_never_panics(wire in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&wire);
        }
    }
}
