//! Dissemination adapter.
//!
//! Tells a session "new data exists at sequence N under prefix X" without the
//! session knowing which reconciliation strategy runs underneath. Two backends
//! are available:
//!
//! - [`SyncProtocol::StateVector`]: every node broadcasts its vector of
//!   `prefix -> latest seq` and peers diff it against their own.
//! - [`SyncProtocol::SetReconciliation`]: every node broadcasts an invertible
//!   Bloom lookup table of its `(prefix, seq)` set; peers subtract, peel the
//!   difference and push back what the sender lacks.
//!
//! Update batches are delivered on a flume channel returned by
//! [`SyncAdapter::new`], which the session drains from its own loop.

mod iblt;
mod set_recon;
mod state_vector;

use std::time::Duration;
use serde::{Deserialize, Serialize};
use shared::types::{Name, SyncUpdate};
use crate::face::GroupPort;

use set_recon::SetReconSync;
use state_vector::StateVectorSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncProtocol {
    #[default]
    StateVector,
    SetReconciliation,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How often reconciliation metadata is exchanged.
    pub interval: Duration,
    /// Sizing hint for the set-reconciliation table.
    pub expected_entries: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            expected_entries: 80,
        }
    }
}

/// Packets exchanged inside a sync group. Only the backends look inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum SyncPacket {
    StateVector { vector: Vec<(Name, u64)> },
    Summary { iblt: iblt::Iblt },
    Delta { entries: Vec<(Name, u64)> },
}

#[derive(Debug, Default)]
struct Received {
    updates: Vec<SyncUpdate>,
    reply: Option<SyncPacket>,
}

trait SyncBackend: Send {
    fn add_node(&mut self, prefix: &Name) -> bool;

    /// Advance `prefix` by one. Returns the new sequence and what to broadcast.
    fn publish(&mut self, prefix: &Name) -> (u64, Option<SyncPacket>);

    /// Periodic reconciliation metadata.
    fn summary(&self) -> Option<SyncPacket>;

    fn receive(&mut self, packet: SyncPacket) -> Received;
}

pub struct SyncAdapter {
    protocol: SyncProtocol,
    node: Name,
    backend: Box<dyn SyncBackend>,
    port: GroupPort,
    updates: flume::Sender<Vec<SyncUpdate>>,
}

impl SyncAdapter {
    pub fn new(
        protocol: SyncProtocol,
        port: GroupPort,
        node: Name,
        options: &SyncOptions,
    ) -> (Self, flume::Receiver<Vec<SyncUpdate>>) {
        let backend: Box<dyn SyncBackend> = match protocol {
            SyncProtocol::StateVector => Box::new(StateVectorSync::new()),
            SyncProtocol::SetReconciliation => {
                Box::new(SetReconSync::new(options.expected_entries))
            }
        };
        tracing::info!("{} using {:?} sync", node, protocol);
        // Batches are only sent from handle_packet, which the session loop
        // calls after draining this channel, so at most one batch per inbound
        // packet is ever queued. The group inbound channel is the bounded one.
        let (tx, rx) = flume::unbounded();
        (
            Self {
                protocol,
                node,
                backend,
                port,
                updates: tx,
            },
            rx,
        )
    }

    pub fn protocol(&self) -> SyncProtocol {
        self.protocol
    }

    /// Register a publishing identity. Idempotent.
    pub fn add_node(&mut self, prefix: &Name) {
        if self.backend.add_node(prefix) {
            tracing::debug!("{} added sync node {}", self.node, prefix);
        }
    }

    /// Advance the sequence number of `prefix` and disseminate it.
    pub fn publish_update(&mut self, prefix: &Name) -> u64 {
        let (seq, packet) = self.backend.publish(prefix);
        tracing::debug!("Publishing update {} seq {}", prefix, seq);
        if let Some(packet) = packet {
            self.send(&packet);
        }
        seq
    }

    /// Packets from other group members, to be passed to [`handle_packet`](Self::handle_packet).
    pub fn inbound(&self) -> flume::Receiver<Vec<u8>> {
        self.port.inbound()
    }

    pub fn handle_packet(&mut self, payload: &[u8]) {
        let packet: SyncPacket = match serde_json::from_slice(payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Dropping undecodable sync packet: {}", e);
                return;
            }
        };
        let Received { updates, reply } = self.backend.receive(packet);
        if let Some(reply) = reply {
            self.send(&reply);
        }
        if !updates.is_empty() {
            tracing::debug!("Sync produced {} update(s)", updates.len());
            // The receiver lives in the session loop; if it is gone the session is stopping.
            let _ = self.updates.send(updates);
        }
    }

    /// Periodic exchange, driven by the session's interval timer.
    pub fn on_tick(&mut self) {
        if let Some(packet) = self.backend.summary() {
            self.send(&packet);
        }
    }

    fn send(&self, packet: &SyncPacket) {
        match serde_json::to_vec(packet) {
            Ok(bytes) => self.port.broadcast(bytes),
            Err(e) => tracing::error!("Failed to serialize sync packet: {}", e),
        }
    }
}
