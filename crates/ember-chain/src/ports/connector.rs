//! Transaction-connector port.
//!
//! The engine runs in one of two modes, header-only (SPV) or full
//! transaction verification with UTXO bookkeeping, which differ only in
//! "do I verify transactions" and "do I keep undo data". Rather than two
//! engines, one engine is parameterized by this capability.

use ember_types::{Block, Hash};

use crate::domain::stored_block::StoredBlock;
use crate::domain::utxo::UtxoDelta;
use crate::error::ChainError;
use crate::ports::store::StoreError;

pub trait TransactionConnector: Send + Sync {
    /// Whether this mode validates transactions and maintains a UTXO set.
    /// When true, every block handed to `add` must carry its body.
    fn verifies_transactions(&self) -> bool;

    /// Look up a stored block in the scope this mode can build upon (the
    /// undoable store in full mode).
    fn stored_in_scope(&self, hash: &Hash) -> Result<Option<StoredBlock>, StoreError>;

    /// Validate and apply a freshly received block's transactions at the
    /// given height, returning the delta the application produced.
    ///
    /// Full mode only; header-only mode returns `Argument`.
    fn connect(&self, height: u64, block: &Block) -> Result<UtxoDelta, ChainError>;

    /// Re-apply a previously stored block during a re-organization,
    /// loading its body from the store. `Pruned` if the body is gone.
    fn connect_stored(&self, stored: &StoredBlock) -> Result<UtxoDelta, ChainError>;

    /// Revert a connected block during a re-organization. `Pruned` if its
    /// undo delta is gone.
    fn disconnect(&self, stored: &StoredBlock) -> Result<(), ChainError>;

    /// Persist a block that is not being connected (a side-chain block or
    /// a header-only extension). Returns the built stored block.
    fn add_to_store(&self, prev: &StoredBlock, block: &Block) -> Result<StoredBlock, ChainError>;

    /// Persist a block together with the delta its connection produced.
    fn add_to_store_with_undo(
        &self,
        prev: &StoredBlock,
        block: &Block,
        delta: UtxoDelta,
    ) -> Result<StoredBlock, ChainError>;

    /// Commit point: durably record the new head and close any open delta
    /// transaction.
    fn set_chain_head(&self, head: &StoredBlock) -> Result<(), StoreError>;

    /// A block failed verification after connect/disconnect work started;
    /// roll back anything uncommitted.
    fn not_setting_chain_head(&self) -> Result<(), StoreError>;
}
