//! Discovery sessions.
//!
//! A [`DiscoverySession`] is one producer or consumer bound to one service
//! group. [`DiscoverySession::start`] performs registration synchronously and
//! returns a [`SessionHandle`] for the application plus a [`SessionTask`] that
//! owns all session state and runs the event loop:
//!
//! ```text
//!   commands (mpsc) ──┐
//!   sync packets  ────┤                    ┌─> face.put (served records)
//!   sync tick     ────┼──> select! loop ───┼─> fetches (FuturesUnordered)
//!   update batches ───┤                    └─> DiscoveryCallback
//!   fetch results ────┘
//! ```

pub mod debounce;
mod engine;
pub mod handle;
pub mod retransmit;

use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use shared::protocol::{DISCOVERY, DISCOVERY_DEBOUNCE_SECS, NDNSD, RETRANSMISSION_COUNT, SERVICE_INFO};
use shared::types::{DiscoveryReply, Name, ServiceRecord};
use crate::cache::hash;
use crate::error::RegistrationError;
use crate::face::{DataSigner, DigestSha256, Face};
use crate::sync::{SyncAdapter, SyncOptions, SyncProtocol};

pub use engine::SessionTask;
pub use handle::{SessionCommand, SessionHandle};

/// Invoked on the session loop for every record delivered to the session.
/// Must not block.
pub type DiscoveryCallback = Arc<dyn Fn(&ServiceRecord, &DiscoveryReply) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Role {
    /// Publishes `services` after starting and answers discovery requests.
    Producer { services: Vec<ServiceRecord> },
    /// Delivers arrivals. Stops after the first one unless `continuous`.
    Consumer { continuous: bool },
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Producer { .. } => RoleKind::Producer,
            Role::Consumer { .. } => RoleKind::Consumer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service group, e.g. `/printer`. Sync runs in `<group>/NDNSD`.
    pub group: Name,
    /// Node identity; prefix of every name the session serves.
    pub node: Name,
    pub protocol: SyncProtocol,
    pub sync: SyncOptions,
    pub fetch_timeout: Duration,
    pub retransmissions: u32,
    pub debounce: Duration,
}

impl SessionConfig {
    pub fn new(group: impl Into<Name>, node: impl Into<Name>) -> Self {
        Self {
            group: group.into(),
            node: node.into(),
            protocol: SyncProtocol::default(),
            sync: SyncOptions::default(),
            fetch_timeout: Duration::from_millis(1000),
            retransmissions: RETRANSMISSION_COUNT,
            debounce: Duration::from_secs(DISCOVERY_DEBOUNCE_SECS),
        }
    }

    pub fn with_protocol(mut self, protocol: SyncProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn sync_group(&self) -> Name {
        self.group.clone().child(NDNSD)
    }
}

/// Static description of a session, shared with its handles.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub role: RoleKind,
    pub group: Name,
    pub node: Name,
    pub protocol: SyncProtocol,
}

/// `<node>/<service name>/NDNSD/service-info`
pub fn service_info_prefix(node: &Name, service_name: &Name) -> Name {
    node.clone().join(service_name).child(NDNSD).child(SERVICE_INFO)
}

/// `<node>/NDNSD/discovery`
pub fn discovery_prefix(node: &Name) -> Name {
    node.clone().child(NDNSD).child(DISCOVERY)
}

pub struct DiscoverySession {
    role: Role,
    config: SessionConfig,
    face: Arc<dyn Face>,
    signer: Arc<dyn DataSigner>,
    callback: DiscoveryCallback,
}

impl DiscoverySession {
    /// Data is signed with [`DigestSha256`] unless replaced by
    /// [`with_signer`](Self::with_signer).
    pub fn new(
        role: Role,
        config: SessionConfig,
        face: Arc<dyn Face>,
        callback: DiscoveryCallback,
    ) -> Self {
        Self {
            role,
            config,
            face,
            signer: Arc::new(DigestSha256),
            callback,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn DataSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Join the sync group and register the node prefix.
    ///
    /// On success the returned task must be spawned (or awaited) to run the
    /// session; cancelling `cancel` stops it.
    pub fn start(
        self,
        cancel: CancellationToken,
    ) -> Result<(SessionHandle, SessionTask), RegistrationError> {
        let Self {
            role,
            config,
            face,
            signer,
            callback,
        } = self;

        let (state_tx, state_rx) = watch::channel(SessionState::Starting);
        let sync_group = config.sync_group();
        tracing::info!("Starting {:?} session {} in {}", role.kind(), config.node, sync_group);

        let port = face.join_group(&sync_group, &config.node)?;
        // The port leaves the group when dropped on the error path.
        face.register_prefix(&config.node)?;

        let (mut adapter, updates) =
            SyncAdapter::new(config.protocol, port, config.node.clone(), &config.sync);
        adapter.add_node(&discovery_prefix(&config.node));

        let info = Arc::new(SessionInfo {
            role: role.kind(),
            group: config.group.clone(),
            node: config.node.clone(),
            protocol: config.protocol,
        });
        let (digest_tx, digest_rx) = watch::channel(hash::compute_hash(&Default::default()));
        let (tx, commands) = mpsc::channel(64);

        let handle = SessionHandle::new(info, tx, state_rx, digest_rx, cancel.clone());
        let task = SessionTask::new(engine::Parts {
            role,
            config,
            face,
            signer,
            callback,
            adapter,
            updates,
            commands,
            state_tx,
            digest_tx,
            cancel,
        });
        Ok((handle, task))
    }
}
