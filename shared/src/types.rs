use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Deserialize};

/// Hierarchical name, e.g. `/node-A/printer1/NDNSD/service-info`.
///
/// Components are non-empty strings; the empty name prints as `/`.
/// Serialized as its URI string.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Name {
    components: Vec<String>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URI such as `/a/b`. Empty segments are skipped, so `a//b/`
    /// and `/a/b` are the same name.
    pub fn parse(uri: &str) -> Self {
        Self {
            components: uri
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Append one component. Slashes inside `component` split it.
    pub fn push(&mut self, component: impl AsRef<str>) {
        self.components.extend(
            component
                .as_ref()
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
    }

    /// Builder-style append of a component or URI fragment.
    pub fn child(mut self, component: impl AsRef<str>) -> Self {
        self.push(component);
        self
    }

    /// Builder-style append of every component of another name.
    pub fn join(mut self, other: &Name) -> Self {
        self.components.extend(other.components.iter().cloned());
        self
    }

    /// Append a sequence number as the last component.
    pub fn with_seq(self, seq: u64) -> Self {
        self.child(seq.to_string())
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.components.starts_with(&prefix.components)
    }

    pub fn ends_with(&self, suffix: &[&str]) -> bool {
        self.components.len() >= suffix.len()
            && self.components[self.components.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(a, b)| a == b)
    }

    /// Drop the last `n` components.
    pub fn strip_suffix(&self, n: usize) -> Name {
        let keep = self.components.len().saturating_sub(n);
        Self {
            components: self.components[..keep].to_vec(),
        }
    }

    pub fn to_uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for c in &self.components {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

/// A service advertisement published by a producer.
/// This is the canonical data model carried on the wire and held in the session caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service name, e.g. "/printer1"
    pub service_name: Name,

    /// Application instance that publishes the service, e.g. "/node-A"
    pub application_prefix: Name,

    /// Time-to-live in seconds, counted from `publish_timestamp`
    pub service_lifetime: u64,

    /// When the record was published (whole seconds)
    pub publish_timestamp: DateTime<Utc>,

    /// Free-form key/value details
    pub metadata: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Create a record stamped with the current time, truncated to whole seconds.
    pub fn new(
        service_name: impl Into<Name>,
        application_prefix: impl Into<Name>,
        service_lifetime: u64,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            application_prefix: application_prefix.into(),
            service_lifetime,
            publish_timestamp: whole_seconds(Utc::now()),
            metadata,
        }
    }

    /// Key of this record in a consumer's received cache: application prefix
    /// followed by the service name.
    pub fn received_key(&self) -> String {
        self.application_prefix.clone().join(&self.service_name).to_uri()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = i64::try_from(self.service_lifetime).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(lifetime)
            .and_then(|d| self.publish_timestamp.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ServiceStatus {
        if now < self.expires_at() {
            ServiceStatus::Active
        } else {
            ServiceStatus::Expired
        }
    }
}

/// Truncate to the precision carried on the wire.
pub fn whole_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0)
        .single()
        .unwrap_or(ts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Expired,
    Active,
}

/// What a consumer application sees for each discovered or updated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub status: ServiceStatus,
    pub service_details: BTreeMap<String, String>,
}

impl DiscoveryReply {
    pub fn from_record(record: &ServiceRecord, now: DateTime<Utc>) -> Self {
        Self {
            status: record.status_at(now),
            service_details: record.metadata.clone(),
        }
    }
}

/// Sequence range `[low_seq, high_seq]` newly available under `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpdate {
    pub prefix: Name,
    pub low_seq: u64,
    pub high_seq: u64,
}
