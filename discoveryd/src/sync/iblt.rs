//! Invertible Bloom lookup table over 32-bit keys.

use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::types::Name;

const N_HASH: usize = 3;
const CHECK_SEED: u32 = 11;

/// Counts wrap; a table received from a peer may hold any value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Cell {
    count: i32,
    key_sum: u32,
    check_sum: u32,
}

impl Cell {
    fn is_empty(&self) -> bool {
        self.count == 0 && self.key_sum == 0 && self.check_sum == 0
    }

    fn is_pure(&self) -> bool {
        (self.count == 1 || self.count == -1) && hash_u32(CHECK_SEED, self.key_sum) == self.check_sum
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Iblt {
    cells: Vec<Cell>,
}

/// Keys decoded from a table difference: present only on the left side, and
/// present only on the right side.
pub(crate) type Peeled = (BTreeSet<u32>, BTreeSet<u32>);

impl Iblt {
    /// Sized at 1.5x the expected number of entries, rounded up to a multiple
    /// of the hash count so each hash function owns an equal sub-table.
    pub(crate) fn new(expected_entries: usize) -> Self {
        let n = (expected_entries + expected_entries / 2).max(N_HASH);
        let n = n.div_ceil(N_HASH) * N_HASH;
        Self {
            cells: vec![Cell::default(); n],
        }
    }

    pub(crate) fn insert(&mut self, key: u32) {
        self.update(key, 1);
    }

    pub(crate) fn erase(&mut self, key: u32) {
        self.update(key, -1);
    }

    fn update(&mut self, key: u32, delta: i32) {
        let sub = self.cells.len() / N_HASH;
        let check = hash_u32(CHECK_SEED, key);
        for i in 0..N_HASH {
            let idx = i * sub + hash_u32(i as u32, key) as usize % sub;
            let cell = &mut self.cells[idx];
            cell.count = cell.count.wrapping_add(delta);
            cell.key_sum ^= key;
            cell.check_sum ^= check;
        }
    }

    /// `self - other`, or `None` when the tables are not the same size.
    pub(crate) fn difference(&self, other: &Iblt) -> Option<Iblt> {
        if self.cells.len() != other.cells.len() {
            return None;
        }
        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(a, b)| Cell {
                count: a.count.wrapping_sub(b.count),
                key_sum: a.key_sum ^ b.key_sum,
                check_sum: a.check_sum ^ b.check_sum,
            })
            .collect();
        Some(Iblt { cells })
    }

    /// Peel pure cells until nothing changes. `None` if the table could not be
    /// fully decoded (too many differences for its size).
    pub(crate) fn list_entries(mut self) -> Option<Peeled> {
        let mut positive = BTreeSet::new();
        let mut negative = BTreeSet::new();

        // Every genuine peel empties at least one cell; bound the passes.
        for _ in 0..=self.cells.len() {
            let mut progressed = false;
            for idx in 0..self.cells.len() {
                let cell = self.cells[idx];
                if !cell.is_pure() {
                    continue;
                }
                if cell.count == 1 {
                    positive.insert(cell.key_sum);
                    self.update(cell.key_sum, -1);
                } else {
                    negative.insert(cell.key_sum);
                    self.update(cell.key_sum, 1);
                }
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        self.cells
            .iter()
            .all(Cell::is_empty)
            .then_some((positive, negative))
    }
}

fn hash_u32(seed: u32, key: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(key.to_be_bytes());
    first_u32(&hasher.finalize())
}

/// Table key of the latest sequence number published under `prefix`.
pub(crate) fn entry_key(prefix: &Name, seq: u64) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(prefix.to_uri().as_bytes());
    hasher.update(b"/");
    hasher.update(seq.to_be_bytes());
    first_u32(&hasher.finalize())
}

fn first_u32(digest: &[u8]) -> u32 {
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
