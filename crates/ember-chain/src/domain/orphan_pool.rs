//! Orphan pool: blocks whose parent has not arrived yet.
//!
//! Typical during initial download, or when a peer sends blocks out of
//! order. Entries keep their arrival order so replay attempts are fair,
//! and the pool is capacity-capped with oldest-first eviction so a hostile
//! peer cannot exhaust memory.

use std::collections::{HashMap, HashSet, VecDeque};

use ember_types::{Block, Hash, Transaction};

/// Default maximum number of held orphans. Orphans are rare and bounded in
/// honest operation.
pub const DEFAULT_ORPHAN_CAPACITY: usize = 50;

/// A disconnected block, with the Bloom context it arrived with when it
/// came in as a filtered block.
#[derive(Debug, Clone)]
pub struct OrphanBlock {
    pub block: Block,
    pub filtered_hashes: Option<HashSet<Hash>>,
    pub filtered_txns: Option<Vec<Transaction>>,
}

/// Insertion-ordered map of orphans keyed by their own hash.
#[derive(Debug)]
pub struct OrphanPool {
    entries: HashMap<Hash, OrphanBlock>,
    arrival_order: VecDeque<Hash>,
    capacity: usize,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ORPHAN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            arrival_order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&OrphanBlock> {
        self.entries.get(hash)
    }

    /// Insert an orphan, keeping arrival order. Re-inserting an existing
    /// hash replaces the entry without changing its position. Returns the
    /// hash of the evicted oldest entry when the pool was full.
    pub fn insert(&mut self, hash: Hash, orphan: OrphanBlock) -> Option<Hash> {
        if self.entries.insert(hash, orphan).is_some() {
            return None;
        }
        self.arrival_order.push_back(hash);

        if self.entries.len() > self.capacity {
            while let Some(oldest) = self.arrival_order.pop_front() {
                if self.entries.remove(&oldest).is_some() {
                    return Some(oldest);
                }
            }
        }
        None
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<OrphanBlock> {
        let removed = self.entries.remove(hash)?;
        self.arrival_order.retain(|h| h != hash);
        Some(removed)
    }

    /// Snapshot of the held hashes in arrival order, for replay sweeps.
    pub fn hashes_in_arrival_order(&self) -> Vec<Hash> {
        self.arrival_order
            .iter()
            .filter(|h| self.entries.contains_key(*h))
            .copied()
            .collect()
    }

    /// Walk the `prev_hash` links within the pool and return the earliest
    /// ancestor of `hash` still held here, which is the block to request
    /// from the network first. `None` if `hash` is not an orphan.
    pub fn root_of(&self, hash: &Hash) -> Option<&Block> {
        let mut cursor = self.entries.get(hash)?;
        // Bounded by pool size; protects against a malicious prev-hash cycle.
        for _ in 0..self.entries.len() {
            match self.entries.get(&cursor.block.header.prev_hash) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        Some(&cursor.block)
    }
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new()
    }
}
