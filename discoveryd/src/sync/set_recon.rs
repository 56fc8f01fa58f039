use std::collections::{BTreeMap, BTreeSet, HashMap};
use shared::types::{Name, SyncUpdate};
use super::iblt::{entry_key, Iblt};
use super::{Received, SyncBackend, SyncPacket};

/// Set-reconciliation sync. The summary is an IBLT holding one key per
/// prefix, for its latest sequence number. Hash collisions can cause
/// redundant deltas; receivers ignore entries they already know.
pub(super) struct SetReconSync {
    own: BTreeSet<Name>,
    seqs: BTreeMap<Name, u64>,
    iblt: Iblt,
    keys: HashMap<u32, (Name, u64)>,
}

impl SetReconSync {
    pub(super) fn new(expected_entries: usize) -> Self {
        Self {
            own: BTreeSet::new(),
            seqs: BTreeMap::new(),
            iblt: Iblt::new(expected_entries),
            keys: HashMap::new(),
        }
    }

    fn set_seq(&mut self, prefix: &Name, seq: u64) {
        if let Some(old) = self.seqs.insert(prefix.clone(), seq) {
            if old > 0 {
                let key = entry_key(prefix, old);
                self.iblt.erase(key);
                self.keys.remove(&key);
            }
        }
        if seq > 0 {
            let key = entry_key(prefix, seq);
            self.iblt.insert(key);
            self.keys.insert(key, (prefix.clone(), seq));
        }
    }

    fn full_state(&self) -> Vec<(Name, u64)> {
        self.seqs
            .iter()
            .filter(|(_, seq)| **seq > 0)
            .map(|(prefix, seq)| (prefix.clone(), *seq))
            .collect()
    }

    /// Answer a peer's summary with the entries it lacks.
    fn answer(&self, theirs: &Iblt) -> Option<SyncPacket> {
        let entries = match self.iblt.difference(theirs).and_then(Iblt::list_entries) {
            Some((ours_only, _theirs_only)) => ours_only
                .iter()
                .filter_map(|key| self.keys.get(key).cloned())
                .collect(),
            None => {
                tracing::debug!("Summary difference did not decode, sending full state");
                self.full_state()
            }
        };
        (!entries.is_empty()).then_some(SyncPacket::Delta { entries })
    }
}

impl SyncBackend for SetReconSync {
    fn add_node(&mut self, prefix: &Name) -> bool {
        self.seqs.entry(prefix.clone()).or_insert(0);
        self.own.insert(prefix.clone())
    }

    fn publish(&mut self, prefix: &Name) -> (u64, Option<SyncPacket>) {
        self.own.insert(prefix.clone());
        let seq = self.seqs.get(prefix).copied().unwrap_or(0) + 1;
        self.set_seq(prefix, seq);
        // Push immediately rather than waiting for the next summary exchange.
        (
            seq,
            Some(SyncPacket::Delta {
                entries: vec![(prefix.clone(), seq)],
            }),
        )
    }

    fn summary(&self) -> Option<SyncPacket> {
        Some(SyncPacket::Summary {
            iblt: self.iblt.clone(),
        })
    }

    fn receive(&mut self, packet: SyncPacket) -> Received {
        match packet {
            SyncPacket::Summary { iblt } => Received {
                updates: Vec::new(),
                reply: self.answer(&iblt),
            },
            SyncPacket::Delta { entries } => {
                let mut updates = Vec::new();
                for (prefix, seq) in entries {
                    let local = self.seqs.get(&prefix).copied().unwrap_or(0);
                    if seq <= local {
                        tracing::trace!("Already at {} for {}", local, prefix);
                        continue;
                    }
                    self.set_seq(&prefix, seq);
                    if self.own.contains(&prefix) {
                        tracing::warn!("Peer knows {} at seq {}, ahead of local {}", prefix, seq, local);
                        continue;
                    }
                    updates.push(SyncUpdate {
                        prefix,
                        low_seq: local + 1,
                        high_seq: seq,
                    });
                }
                Received {
                    updates,
                    reply: None,
                }
            }
            SyncPacket::StateVector { .. } => {
                tracing::debug!("Set-reconciliation sync ignoring foreign packet");
                Received::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(entries: &[(&str, u64)]) -> SyncPacket {
        SyncPacket::Delta {
            entries: entries.iter().map(|(p, s)| (Name::parse(p), *s)).collect(),
        }
    }

    #[test]
    fn test_summary_answer_contains_missing_entries() {
        let mut a = SetReconSync::new(80);
        let b = SetReconSync::new(80);
        a.publish(&Name::parse("/a/x"));
        a.publish(&Name::parse("/a/x"));
        a.publish(&Name::parse("/a/y"));

        let Some(SyncPacket::Summary { iblt }) = b.summary() else {
            panic!("expected summary");
        };
        let reply = a.answer(&iblt).expect("a is ahead of b");
        let SyncPacket::Delta { mut entries } = reply else {
            panic!("expected delta");
        };
        entries.sort();
        assert_eq!(entries, vec![(Name::parse("/a/x"), 2), (Name::parse("/a/y"), 1)]);
    }

    #[test]
    fn test_in_sync_peers_send_nothing() {
        let mut a = SetReconSync::new(80);
        let mut b = SetReconSync::new(80);
        a.publish(&Name::parse("/a/x"));
        b.receive(delta(&[("/a/x", 1)]));
        assert!(a.answer(&b.iblt).is_none());
        assert!(b.answer(&a.iblt).is_none());
    }

    #[test]
    fn test_duplicate_delta_is_idempotent() {
        let mut b = SetReconSync::new(80);
        let first = b.receive(delta(&[("/a/x", 3)]));
        assert_eq!(
            first.updates,
            vec![SyncUpdate { prefix: Name::parse("/a/x"), low_seq: 1, high_seq: 3 }]
        );
        assert!(b.receive(delta(&[("/a/x", 3)])).updates.is_empty());
        assert!(b.receive(delta(&[("/a/x", 2)])).updates.is_empty());
    }

    #[test]
    fn test_undecodable_difference_falls_back_to_full_state() {
        let mut a = SetReconSync::new(1);
        for i in 0..20 {
            a.publish(&Name::parse(&format!("/a/{}", i)));
        }
        let b = SetReconSync::new(1);
        let Some(SyncPacket::Delta { entries }) = a.answer(&b.iblt) else {
            panic!("expected delta");
        };
        assert_eq!(entries.len(), 20);
    }

    #[test]
    fn test_old_sequence_key_is_replaced() {
        let mut a = SetReconSync::new(80);
        let prefix = Name::parse("/a/x");
        a.publish(&prefix);
        a.publish(&prefix);
        assert_eq!(a.keys.len(), 1);
        assert!(a.keys.contains_key(&entry_key(&prefix, 2)));
    }
}
