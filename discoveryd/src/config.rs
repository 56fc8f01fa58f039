use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use shared::protocol::{DISCOVERY_DEBOUNCE_SECS, RETRANSMISSION_COUNT};
use shared::types::{Name, ServiceRecord};
use crate::error::ConfigError;
use crate::face::{DataSigner, DigestSha256, NoSigning};
use crate::session::{RoleKind, SessionConfig};
use crate::sync::{SyncOptions, SyncProtocol};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default, rename = "producer")]
    pub producers: Vec<ProducerConfig>,
    #[serde(default, rename = "consumer")]
    pub consumers: Vec<ConsumerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: Name,
    #[serde(default)]
    pub sync_protocol: SyncProtocol,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_retransmissions")]
    pub retransmissions: u32,
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    #[serde(default)]
    pub signing: SigningKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningKind {
    #[default]
    DigestSha256,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub group: Name,
    /// Node identity of this session; derived from `[node].name` if unset.
    #[serde(default)]
    pub node: Option<Name>,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDefinition>,
    /// Standalone service definition files, one service per file.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub group: Name,
    #[serde(default)]
    pub node: Option<Name>,
    #[serde(default = "default_continuous")]
    pub continuous: bool,
}

/// One service, inline under `[[producer.service]]` or in its own file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDefinition {
    pub name: Name,
    pub application_prefix: Name,
    /// Seconds a published record stays active.
    pub lifetime: u64,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

fn default_node_name() -> Name {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    Name::new().child(host)
}

fn default_sync_interval() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    1000
}

fn default_retransmissions() -> u32 {
    RETRANSMISSION_COUNT
}

fn default_debounce() -> u64 {
    DISCOVERY_DEBOUNCE_SECS
}

fn default_listen() -> String {
    "[::]:8054".to_string()
}

fn default_continuous() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            sync_protocol: SyncProtocol::default(),
            sync_interval_ms: default_sync_interval(),
            fetch_timeout_ms: default_fetch_timeout(),
            retransmissions: default_retransmissions(),
            debounce_secs: default_debounce(),
            signing: SigningKind::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl NodeConfig {
    pub fn session_config(&self, group: &Name, node: &Name) -> SessionConfig {
        SessionConfig {
            group: group.clone(),
            node: node.clone(),
            protocol: self.sync_protocol,
            sync: SyncOptions {
                interval: Duration::from_millis(self.sync_interval_ms),
                ..SyncOptions::default()
            },
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            retransmissions: self.retransmissions,
            debounce: Duration::from_secs(self.debounce_secs),
        }
    }

    /// Node identity of the `index`-th session of `kind` with no explicit `node`.
    pub fn session_node(&self, kind: RoleKind, index: usize) -> Name {
        let label = match kind {
            RoleKind::Producer => "producer",
            RoleKind::Consumer => "consumer",
        };
        self.name.clone().child(format!("{}-{}", label, index))
    }
}

impl SigningKind {
    pub fn signer(self) -> Arc<dyn DataSigner> {
        match self {
            SigningKind::DigestSha256 => Arc::new(DigestSha256),
            SigningKind::None => Arc::new(NoSigning),
        }
    }
}

impl ServiceDefinition {
    /// Load a standalone definition file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A record stamped with the current time.
    pub fn to_record(&self) -> ServiceRecord {
        ServiceRecord::new(
            self.name.clone(),
            self.application_prefix.clone(),
            self.lifetime,
            self.details.clone(),
        )
    }

    fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid(format!("{}: service name is empty", origin)));
        }
        if self.application_prefix.is_empty() {
            return Err(ConfigError::invalid(format!(
                "{}: application_prefix of {} is empty",
                origin, self.name
            )));
        }
        if self.lifetime == 0 {
            return Err(ConfigError::invalid(format!(
                "{}: lifetime of {} must be positive",
                origin, self.name
            )));
        }
        Ok(())
    }
}

impl ProducerConfig {
    /// Inline definitions followed by file definitions.
    pub fn definitions(&self) -> Result<Vec<ServiceDefinition>, ConfigError> {
        let mut definitions = self.services.clone();
        for file in &self.files {
            let definition = ServiceDefinition::load(file)?;
            definition.validate(&file.display().to_string())?;
            definitions.push(definition);
        }
        Ok(definitions)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn producer_node(&self, index: usize) -> Name {
        self.producers[index]
            .node
            .clone()
            .unwrap_or_else(|| self.node.session_node(RoleKind::Producer, index))
    }

    pub fn consumer_node(&self, index: usize) -> Name {
        self.consumers[index]
            .node
            .clone()
            .unwrap_or_else(|| self.node.session_node(RoleKind::Consumer, index))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.name.is_empty() {
            return Err(ConfigError::invalid("[node] name is empty"));
        }
        if self.node.sync_interval_ms == 0 {
            return Err(ConfigError::invalid("[node] sync_interval_ms must be positive"));
        }
        if self.node.fetch_timeout_ms == 0 {
            return Err(ConfigError::invalid("[node] fetch_timeout_ms must be positive"));
        }

        let mut nodes = HashSet::new();
        for (i, producer) in self.producers.iter().enumerate() {
            if producer.group.is_empty() {
                return Err(ConfigError::invalid(format!("producer {}: group is empty", i)));
            }
            for service in &producer.services {
                service.validate(&format!("producer {}", i))?;
            }
            if !nodes.insert(self.producer_node(i)) {
                return Err(ConfigError::invalid(format!(
                    "producer {}: node {} is used by another session",
                    i,
                    self.producer_node(i)
                )));
            }
        }
        for (i, consumer) in self.consumers.iter().enumerate() {
            if consumer.group.is_empty() {
                return Err(ConfigError::invalid(format!("consumer {}: group is empty", i)));
            }
            if !nodes.insert(self.consumer_node(i)) {
                return Err(ConfigError::invalid(format!(
                    "consumer {}: node {} is used by another session",
                    i,
                    self.consumer_node(i)
                )));
            }
        }
        Ok(())
    }
}
