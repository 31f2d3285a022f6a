//! Stored blocks: a header annotated with its position in the work tree.
//!
//! The chain is a tree. Cumulative work, not height, decides which leaf
//! is the best head.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use ember_types::{work_for_bits, BlockHeader, Hash};

use crate::error::ChainError;
use crate::ports::store::{BlockStore, StoreError};

/// A block header plus the cumulative work and height of its chain
/// position. What the block store persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub header: BlockHeader,
    /// Total work of the chain from genesis up to and including this
    /// block: sum of `2^256 / (target + 1)` per header.
    pub chain_work: U256,
    pub height: u64,
}

impl StoredBlock {
    /// The genesis stored block: height zero, its own work.
    pub fn genesis(header: BlockHeader) -> Result<Self, ChainError> {
        let hash = header.hash();
        let chain_work = work_for_bits(header.bits)
            .map_err(|e| ChainError::verification(hash, e.to_string()))?;
        Ok(Self { header, chain_work, height: 0 })
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Build the stored block for a child header of this one.
    pub fn build_next(&self, header: &BlockHeader) -> Result<StoredBlock, ChainError> {
        let hash = header.hash();
        let work = work_for_bits(header.bits)
            .map_err(|e| ChainError::verification(hash, e.to_string()))?;
        let chain_work = self
            .chain_work
            .checked_add(work)
            .ok_or_else(|| ChainError::verification(hash, "cumulative work overflows 256 bits"))?;
        Ok(StoredBlock { header: header.clone(), chain_work, height: self.height + 1 })
    }

    /// Strict comparison: equal work is not "more", so the first-seen head
    /// wins ties.
    pub fn more_work_than(&self, other: &StoredBlock) -> bool {
        self.chain_work > other.chain_work
    }

    /// Parent lookup through the store.
    pub fn prev(&self, store: &dyn BlockStore) -> Result<Option<StoredBlock>, StoreError> {
        store.get(&self.header.prev_hash)
    }
}
