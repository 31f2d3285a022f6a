//! Block store port.
//!
//! The engine owns no persistence. Everything it knows about blocks lives
//! behind this trait: keyed stored blocks, an authoritative chain-head
//! pointer, and (in full-verification mode) block bodies with the UTXO
//! deltas their connection produced.
//!
//! Stored blocks are never deleted; a store may prune bodies and deltas
//! (the undo data) while keeping header, work and height.

use thiserror::Error;

use ember_types::{Hash, Transaction};

use crate::domain::stored_block::StoredBlock;
use crate::domain::utxo::UtxoDelta;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("block store i/o failure: {message}")]
    Io { message: String },

    #[error("block store has no chain head")]
    HeadMissing,

    #[error("block store is inconsistent: {reason}")]
    Inconsistent { reason: String },
}

/// A stored block together with whatever undo data the store still holds.
///
/// `transactions` and `delta` are both `None` once the store has pruned
/// the block; callers needing them raise `Pruned`.
#[derive(Debug, Clone)]
pub struct UndoableBlock {
    pub stored: StoredBlock,
    pub transactions: Option<Vec<Transaction>>,
    pub delta: Option<UtxoDelta>,
}

/// Keyed persistence of stored blocks plus the durable chain-head pointer.
///
/// Implementations are shared between one writer (the block-processing
/// thread) and many readers, so methods take `&self`; interior mutability
/// and durability are the store's concern. Any method may block on I/O.
pub trait BlockStore: Send + Sync {
    fn get(&self, hash: &Hash) -> Result<Option<StoredBlock>, StoreError>;

    /// Persist a header-level stored block.
    fn put(&self, stored: &StoredBlock) -> Result<(), StoreError>;

    /// Persist a stored block with its body and, when it was connected,
    /// the delta its connection produced (full-verification mode).
    fn put_with_undo(
        &self,
        stored: &StoredBlock,
        transactions: &[Transaction],
        delta: Option<&UtxoDelta>,
    ) -> Result<(), StoreError>;

    /// Fetch a block with its undo data. `None` when the block was never
    /// stored undoably or has been pruned away entirely.
    fn get_undoable(&self, hash: &Hash) -> Result<Option<UndoableBlock>, StoreError>;

    fn get_head(&self) -> Result<StoredBlock, StoreError>;

    /// Durably move the chain-head pointer. This is the commit point: a
    /// transactional store must also commit any delta writes opened since
    /// the last head update.
    fn put_head(&self, stored: &StoredBlock) -> Result<(), StoreError>;
}
