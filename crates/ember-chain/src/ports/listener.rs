//! Listener port: how wallets and other observers hear about the chain.
//!
//! Callbacks run on the block-processing thread while the engine lock is
//! held. A callback that blocks stalls block processing, and a callback
//! that calls back into `add` or the orphan-pool queries will deadlock;
//! both are documented hazards, not enforced ones.

use thiserror::Error;

use ember_types::{Hash, Transaction};

use crate::domain::stored_block::StoredBlock;
use crate::ports::store::StoreError;

/// Where a block sits relative to the best chain at notification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewBlockKind {
    BestChain,
    SideChain,
}

/// Failures a listener may report back to the engine.
///
/// `Script` is a parse-level problem in the listener's own data; the
/// engine logs it and moves on, because one misbehaving wallet must not
/// break the chain. `Store` propagates and fails the whole operation.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("script parse failure: {0}")]
    Script(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An observer of chain events. Wallets implement this.
///
/// Per-role delivery is at-most-once per transaction: a listener sees a
/// given transaction's best-chain inclusion once, its side-chain sighting
/// once, and re-orgs as a single `reorganize` call.
pub trait ChainListener: Send + Sync {
    /// Whether the listener wants `receive_from_block` for this
    /// transaction. An `Err` is treated as "not relevant" and logged.
    fn is_transaction_relevant(&self, tx: &Transaction) -> Result<bool, ListenerError>;

    /// A relevant transaction appeared in a block. Each listener receives
    /// its own copy of the transaction.
    fn receive_from_block(
        &self,
        tx: Transaction,
        block: &StoredBlock,
        kind: NewBlockKind,
    ) -> Result<(), ListenerError>;

    /// A transaction matched the remote Bloom filter, but its body was
    /// not attached to the filtered block.
    fn notify_transaction_in_block(
        &self,
        tx_hash: &Hash,
        block: &StoredBlock,
        kind: NewBlockKind,
    ) -> Result<(), ListenerError>;

    /// The best chain gained a block. Fires after the per-transaction
    /// callbacks for that block.
    fn notify_new_best_block(&self, block: &StoredBlock) -> Result<(), ListenerError>;

    /// The best chain switched branches through `split`. `old_blocks` and
    /// `new_blocks` run from each former/new head down to (exclusive) the
    /// split, in descending height.
    fn reorganize(
        &self,
        split: &StoredBlock,
        old_blocks: &[StoredBlock],
        new_blocks: &[StoredBlock],
    ) -> Result<(), ListenerError>;
}
