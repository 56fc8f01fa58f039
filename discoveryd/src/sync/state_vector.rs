use std::collections::{BTreeMap, BTreeSet};
use shared::types::{Name, SyncUpdate};
use super::{Received, SyncBackend, SyncPacket};

/// Logical-clock sync: the full `prefix -> seq` vector is the summary.
pub(super) struct StateVectorSync {
    own: BTreeSet<Name>,
    vector: BTreeMap<Name, u64>,
}

impl StateVectorSync {
    pub(super) fn new() -> Self {
        Self {
            own: BTreeSet::new(),
            vector: BTreeMap::new(),
        }
    }

    fn snapshot(&self) -> SyncPacket {
        SyncPacket::StateVector {
            vector: self
                .vector
                .iter()
                .map(|(prefix, seq)| (prefix.clone(), *seq))
                .collect(),
        }
    }
}

impl SyncBackend for StateVectorSync {
    fn add_node(&mut self, prefix: &Name) -> bool {
        self.vector.entry(prefix.clone()).or_insert(0);
        self.own.insert(prefix.clone())
    }

    fn publish(&mut self, prefix: &Name) -> (u64, Option<SyncPacket>) {
        self.own.insert(prefix.clone());
        let seq = self.vector.entry(prefix.clone()).or_insert(0);
        *seq += 1;
        let seq = *seq;
        (seq, Some(self.snapshot()))
    }

    fn summary(&self) -> Option<SyncPacket> {
        Some(self.snapshot())
    }

    fn receive(&mut self, packet: SyncPacket) -> Received {
        let SyncPacket::StateVector { vector: remote } = packet else {
            tracing::debug!("State-vector sync ignoring foreign packet");
            return Received::default();
        };

        let mut updates = Vec::new();
        for (prefix, seq) in &remote {
            let local = self.vector.get(prefix).copied().unwrap_or(0);
            if *seq <= local {
                continue;
            }
            self.vector.insert(prefix.clone(), *seq);
            if self.own.contains(prefix) {
                // A previous incarnation of this node got further; continue after it.
                tracing::warn!("Peer knows {} at seq {}, ahead of local {}", prefix, seq, local);
            } else {
                updates.push(SyncUpdate {
                    prefix: prefix.clone(),
                    low_seq: local + 1,
                    high_seq: *seq,
                });
            }
        }

        let remote: BTreeMap<&Name, u64> = remote.iter().map(|(p, s)| (p, *s)).collect();
        let ahead = self
            .vector
            .iter()
            .any(|(prefix, seq)| remote.get(prefix).map_or(*seq > 0, |theirs| theirs < seq));

        Received {
            updates,
            reply: ahead.then(|| self.snapshot()),
        }
    }
}
