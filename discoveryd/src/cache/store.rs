use std::collections::BTreeMap;
use shared::types::ServiceRecord;

/// Records a session has published and received.
///
/// `published` is keyed by service name URI, `received` by
/// [`ServiceRecord::received_key`]. Both are owned by the session loop.
#[derive(Debug, Default)]
pub struct ServiceCache {
    published: BTreeMap<String, ServiceRecord>,
    received: BTreeMap<String, ServiceRecord>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace a record this session serves. Returns true if data changed.
    pub fn publish(&mut self, record: ServiceRecord) -> bool {
        upsert(&mut self.published, record.service_name.to_uri(), record)
    }

    /// Store or replace a fetched record. Returns true if data changed.
    pub fn upsert_received(&mut self, record: ServiceRecord) -> bool {
        upsert(&mut self.received, record.received_key(), record)
    }

    pub fn published(&self) -> &BTreeMap<String, ServiceRecord> {
        &self.published
    }

    pub fn received(&self) -> &BTreeMap<String, ServiceRecord> {
        &self.received
    }
}

fn upsert(map: &mut BTreeMap<String, ServiceRecord>, key: String, record: ServiceRecord) -> bool {
    match map.get(&key) {
        Some(existing) if *existing == record => false,
        _ => {
            map.insert(key, record);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(name: &str, make: &str) -> ServiceRecord {
        ServiceRecord::new(
            name,
            "/node-A",
            3600,
            BTreeMap::from([("make".to_string(), make.to_string())]),
        )
    }

    #[test]
    fn test_publish_keyed_by_service_name() {
        let mut cache = ServiceCache::new();
        assert!(cache.publish(record("/printer1", "HP")));
        assert!(cache.publish(record("/printer1", "Canon")));
        assert_eq!(cache.published().len(), 1);
        assert_eq!(cache.published()["/printer1"].metadata["make"], "Canon");
    }

    #[test]
    fn test_received_keyed_by_prefix_and_name() {
        let mut cache = ServiceCache::new();
        let mut other = record("/printer1", "HP");
        other.application_prefix = "/node-B".into();

        assert!(cache.upsert_received(record("/printer1", "HP")));
        assert!(cache.upsert_received(other));
        let keys: Vec<&String> = cache.received().keys().collect();
        assert_eq!(keys, ["/node-A/printer1", "/node-B/printer1"]);
    }

    #[test]
    fn test_identical_record_is_not_a_change() {
        let mut cache = ServiceCache::new();
        let r = record("/printer1", "HP");
        assert!(cache.upsert_received(r.clone()));
        assert!(!cache.upsert_received(r));
        assert_eq!(cache.received().len(), 1);
    }
}
