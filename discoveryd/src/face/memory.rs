use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use shared::types::Name;
use crate::error::{FetchError, RegistrationError};
use super::{Data, Face, FetchFuture, GroupLink, GroupPort};

/// In-process named-data network shared by every session of the daemon.
///
/// Fetches behave like pending interests: they wait until matching data is
/// put. Content outlives the session that produced it, the way a network
/// cache would keep it. Data whose last name component is a sequence number
/// is versioned: only the newest sequence under each prefix is kept, and a
/// fetch of an older one fails with [`FetchError::Superseded`].
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    store: Mutex<Store>,
    arrivals: Notify,
    prefixes: Mutex<HashSet<Name>>,
    groups: Mutex<HashMap<Name, Vec<Member>>>,
    losses: Mutex<HashMap<Name, u32>>,
}

#[derive(Default)]
struct Store {
    data: HashMap<Name, Data>,
    /// Newest sequence stored under each versioned prefix.
    latest: HashMap<Name, u64>,
}

enum Lookup {
    Found(Data),
    Superseded,
    Missing,
}

fn split_seq(name: &Name) -> Option<(Name, u64)> {
    let seq = name.components().last()?.parse().ok()?;
    Some((name.strip_suffix(1), seq))
}

impl Store {
    fn insert(&mut self, data: Data) {
        if let Some((prefix, seq)) = split_seq(&data.name) {
            match self.latest.get(&prefix).copied() {
                Some(latest) if latest > seq => {
                    tracing::trace!("Ignoring superseded {}", data.name);
                    return;
                }
                Some(latest) if latest < seq => {
                    self.data.remove(&prefix.clone().with_seq(latest));
                }
                _ => {}
            }
            self.latest.insert(prefix, seq);
        }
        self.data.insert(data.name.clone(), data);
    }

    fn lookup(&self, name: &Name) -> Lookup {
        if let Some(data) = self.data.get(name) {
            return Lookup::Found(data.clone());
        }
        match split_seq(name) {
            Some((prefix, seq)) if self.latest.get(&prefix).is_some_and(|l| *l > seq) => {
                Lookup::Superseded
            }
            _ => Lookup::Missing,
        }
    }
}

struct Member {
    node: Name,
    tx: flume::Sender<Vec<u8>>,
}

/// Packets buffered per group member before further broadcasts to it are
/// dropped. Reconciliation state is resent every interval, so a dropped
/// packet is recovered on a later tick.
pub const GROUP_INBOUND_CAPACITY: usize = 1024;

/// Poisoning only happens if a holder panicked; the maps stay usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` fetches of `name` go unanswered.
    pub fn lose_fetches(&self, name: &Name, count: u32) {
        *lock(&self.inner.losses).entry(name.clone()).or_default() += count;
    }

    pub fn contains(&self, name: &Name) -> bool {
        lock(&self.inner.store).data.contains_key(name)
    }

    /// Newest sequence number stored under `prefix`.
    pub fn latest_seq(&self, prefix: &Name) -> Option<u64> {
        lock(&self.inner.store).latest.get(prefix).copied()
    }

    /// Number of data packets held.
    pub fn len(&self) -> usize {
        lock(&self.inner.store).data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn group_members(&self, group: &Name) -> Vec<Name> {
        lock(&self.inner.groups)
            .get(group)
            .map(|members| members.iter().map(|m| m.node.clone()).collect())
            .unwrap_or_default()
    }
}

impl Inner {
    fn take_loss(&self, name: &Name) -> bool {
        let mut losses = lock(&self.losses);
        match losses.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                if *remaining == 0 {
                    losses.remove(name);
                }
                true
            }
            _ => false,
        }
    }

    fn lookup(&self, name: &Name) -> Lookup {
        lock(&self.store).lookup(name)
    }
}

impl Face for MemoryNetwork {
    fn register_prefix(&self, prefix: &Name) -> Result<(), RegistrationError> {
        if prefix.is_empty() {
            return Err(RegistrationError::EmptyName("prefix"));
        }
        if !lock(&self.inner.prefixes).insert(prefix.clone()) {
            return Err(RegistrationError::DuplicatePrefix(prefix.clone()));
        }
        tracing::debug!("Registered prefix {}", prefix);
        Ok(())
    }

    fn unregister_prefix(&self, prefix: &Name) {
        if lock(&self.inner.prefixes).remove(prefix) {
            tracing::debug!("Unregistered prefix {}", prefix);
        }
    }

    fn put(&self, data: Data) {
        lock(&self.inner.store).insert(data);
        self.inner.arrivals.notify_waiters();
    }

    fn fetch(&self, name: &Name) -> FetchFuture {
        let inner = Arc::clone(&self.inner);
        let name = name.clone();
        Box::pin(async move {
            if inner.take_loss(&name) {
                tracing::trace!("Dropping fetch of {}", name);
                std::future::pending::<()>().await;
            }
            loop {
                // Register for wakeups before looking, so a put racing with the
                // lookup is not missed.
                let notified = inner.arrivals.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                match inner.lookup(&name) {
                    Lookup::Found(data) => return Ok(data),
                    Lookup::Superseded => return Err(FetchError::Superseded(name)),
                    Lookup::Missing => notified.await,
                }
            }
        })
    }

    fn join_group(&self, group: &Name, node: &Name) -> Result<GroupPort, RegistrationError> {
        if group.is_empty() {
            return Err(RegistrationError::EmptyName("sync group"));
        }
        if node.is_empty() {
            return Err(RegistrationError::EmptyName("node name"));
        }
        let mut groups = lock(&self.inner.groups);
        let members = groups.entry(group.clone()).or_default();
        if members.iter().any(|m| &m.node == node) {
            return Err(RegistrationError::DuplicateNode {
                group: group.clone(),
                node: node.clone(),
            });
        }
        let (tx, rx) = flume::bounded(GROUP_INBOUND_CAPACITY);
        members.push(Member {
            node: node.clone(),
            tx,
        });
        tracing::debug!("{} joined sync group {}", node, group);

        let link = MemoryGroupLink {
            inner: Arc::clone(&self.inner),
            group: group.clone(),
            node: node.clone(),
        };
        Ok(GroupPort::new(Box::new(link), rx))
    }
}

struct MemoryGroupLink {
    inner: Arc<Inner>,
    group: Name,
    node: Name,
}

impl GroupLink for MemoryGroupLink {
    fn broadcast(&self, payload: Vec<u8>) {
        let groups = lock(&self.inner.groups);
        if let Some(members) = groups.get(&self.group) {
            for member in members.iter().filter(|m| m.node != self.node) {
                match member.tx.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(flume::TrySendError::Full(_)) => {
                        tracing::debug!("{} is behind, dropping sync packet", member.node);
                    }
                    // A member that stopped reading is leaving.
                    Err(flume::TrySendError::Disconnected(_)) => {}
                }
            }
        }
    }
}

impl Drop for MemoryGroupLink {
    fn drop(&mut self) {
        let mut groups = lock(&self.inner.groups);
        if let Some(members) = groups.get_mut(&self.group) {
            members.retain(|m| m.node != self.node);
            if members.is_empty() {
                groups.remove(&self.group);
            }
        }
        tracing::debug!("{} left sync group {}", self.node, self.group);
    }
}
