use std::collections::BTreeMap;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::ServiceRecord;

/// Stable fields of a record. Status is derived from the clock and left out,
/// so the digest only moves when received data changes.
#[derive(Serialize)]
struct HashView<'a> {
    key: &'a str,
    service_name: String,
    application_prefix: String,
    service_lifetime: u64,
    publish_timestamp: i64,
    metadata: &'a BTreeMap<String, String>,
}

/// SHA-256 over the records, ordered by key. Hex encoded.
pub fn compute_hash(records: &BTreeMap<String, ServiceRecord>) -> String {
    let views: Vec<HashView<'_>> = records
        .iter()
        .map(|(key, r)| HashView {
            key: key.as_str(),
            service_name: r.service_name.to_uri(),
            application_prefix: r.application_prefix.to_uri(),
            service_lifetime: r.service_lifetime,
            publish_timestamp: r.publish_timestamp.timestamp(),
            metadata: &r.metadata,
        })
        .collect();

    // Strings, integers and string maps always serialize.
    let json = serde_json::to_string(&views).unwrap_or_default();

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(name: &str) -> ServiceRecord {
        ServiceRecord::new(
            name,
            "/node-A",
            3600,
            BTreeMap::from([("make".to_string(), "HP".to_string())]),
        )
    }

    fn keyed(records: &[ServiceRecord]) -> BTreeMap<String, ServiceRecord> {
        records.iter().map(|r| (r.received_key(), r.clone())).collect()
    }

    #[test]
    fn test_hash_deterministic() {
        let a = test_record("/printer1");
        let b = test_record("/printer2");

        let hash1 = compute_hash(&keyed(&[a.clone(), b.clone()]));
        let hash2 = compute_hash(&keyed(&[b, a]));

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_changes_on_modification() {
        let a = test_record("/printer1");
        let mut b = a.clone();
        b.metadata.insert("color".to_string(), "yes".to_string());

        assert_ne!(compute_hash(&keyed(&[a])), compute_hash(&keyed(&[b])));
    }

    #[test]
    fn test_empty_cache_has_fixed_hash() {
        assert_eq!(compute_hash(&BTreeMap::new()), compute_hash(&BTreeMap::new()));
    }
}
