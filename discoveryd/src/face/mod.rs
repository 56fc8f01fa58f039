//! Named-data substrate used by discovery sessions.
//!
//! A [`Face`] serves data under registered prefixes, fetches data by name and
//! provides a broadcast channel per sync group. [`MemoryNetwork`] implements it
//! in-process; any other transport can be plugged in behind the same trait.

pub mod memory;
pub mod signer;

use std::future::Future;
use std::pin::Pin;
use shared::types::Name;
use crate::error::{FetchError, RegistrationError};

pub use memory::MemoryNetwork;
pub use signer::{DataSigner, DigestSha256, NoSigning};

/// A named, optionally signed, piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Data {
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            content,
            signature: Vec::new(),
        }
    }
}

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Data, FetchError>> + Send>>;

pub trait Face: Send + Sync + 'static {
    /// Claim `prefix` for serving. Two live sessions cannot claim the same prefix.
    fn register_prefix(&self, prefix: &Name) -> Result<(), RegistrationError>;

    fn unregister_prefix(&self, prefix: &Name);

    /// Make `data` available to fetchers.
    fn put(&self, data: Data);

    /// Resolves once data named `name` is available. May never resolve; the
    /// caller bounds it with a timeout.
    fn fetch(&self, name: &Name) -> FetchFuture;

    /// Join the broadcast channel of a sync group as `node`.
    fn join_group(&self, group: &Name, node: &Name) -> Result<GroupPort, RegistrationError>;
}

/// Outbound half of a group membership. Dropping it leaves the group.
pub trait GroupLink: Send {
    fn broadcast(&self, payload: Vec<u8>);
}

/// Membership of one node in one sync group.
pub struct GroupPort {
    link: Box<dyn GroupLink>,
    inbound: flume::Receiver<Vec<u8>>,
}

impl GroupPort {
    pub fn new(link: Box<dyn GroupLink>, inbound: flume::Receiver<Vec<u8>>) -> Self {
        Self { link, inbound }
    }

    /// Send to every other member of the group.
    pub fn broadcast(&self, payload: Vec<u8>) {
        self.link.broadcast(payload);
    }

    /// Packets sent by other members. flume::Receiver is Clone, so the
    /// session loop can own a copy independently of the adapter.
    pub fn inbound(&self) -> flume::Receiver<Vec<u8>> {
        self.inbound.clone()
    }
}
