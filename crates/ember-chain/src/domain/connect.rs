//! The two verification modes behind the [`TransactionConnector`] seam.
//!
//! [`HeaderOnlyConnector`] is SPV: trust is placed in proof-of-work and
//! checkpoints, blocks persist as bare stored blocks.
//!
//! [`FullConnector`] validates every transaction against a maintained
//! UTXO set and keeps undoable bodies and deltas in the store so the
//! chain can re-organize. Uncommitted deltas are journaled; a failed
//! verification rolls them back so the live set always matches the head
//! the store points at.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use ember_types::{short_hex, Block, Hash, Transaction};

use crate::domain::stored_block::StoredBlock;
use crate::domain::utxo::{UtxoDelta, UtxoSet};
use crate::error::ChainError;
use crate::ports::connector::TransactionConnector;
use crate::ports::script::{AcceptAllScripts, ScriptPredicate};
use crate::ports::store::{BlockStore, StoreError};

/// Header-only (SPV) mode.
pub struct HeaderOnlyConnector {
    store: Arc<dyn BlockStore>,
}

impl HeaderOnlyConnector {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }
}

impl TransactionConnector for HeaderOnlyConnector {
    fn verifies_transactions(&self) -> bool {
        false
    }

    fn stored_in_scope(&self, hash: &Hash) -> Result<Option<StoredBlock>, StoreError> {
        self.store.get(hash)
    }

    fn connect(&self, _height: u64, _block: &Block) -> Result<UtxoDelta, ChainError> {
        Err(ChainError::Argument(
            "transaction connection is not available in header-only mode".into(),
        ))
    }

    fn connect_stored(&self, _stored: &StoredBlock) -> Result<UtxoDelta, ChainError> {
        Err(ChainError::Argument(
            "transaction connection is not available in header-only mode".into(),
        ))
    }

    fn disconnect(&self, _stored: &StoredBlock) -> Result<(), ChainError> {
        Err(ChainError::Argument(
            "transaction disconnection is not available in header-only mode".into(),
        ))
    }

    fn add_to_store(&self, prev: &StoredBlock, block: &Block) -> Result<StoredBlock, ChainError> {
        let stored = prev.build_next(&block.header)?;
        self.store.put(&stored)?;
        Ok(stored)
    }

    fn add_to_store_with_undo(
        &self,
        prev: &StoredBlock,
        block: &Block,
        _delta: UtxoDelta,
    ) -> Result<StoredBlock, ChainError> {
        self.add_to_store(prev, block)
    }

    fn set_chain_head(&self, head: &StoredBlock) -> Result<(), StoreError> {
        self.store.put_head(head)
    }

    fn not_setting_chain_head(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A delta applied or reverted since the last commit point.
enum PendingOp {
    Applied(UtxoDelta),
    Reverted(UtxoDelta),
}

/// Full-verification mode with UTXO bookkeeping.
pub struct FullConnector {
    store: Arc<dyn BlockStore>,
    scripts: Arc<dyn ScriptPredicate>,
    utxo: Mutex<UtxoSet>,
    pending: Mutex<Vec<PendingOp>>,
}

impl FullConnector {
    /// Full verification with script checking delegated to an
    /// accept-everything predicate.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self::with_script_predicate(store, Arc::new(AcceptAllScripts))
    }

    pub fn with_script_predicate(
        store: Arc<dyn BlockStore>,
        scripts: Arc<dyn ScriptPredicate>,
    ) -> Self {
        Self {
            store,
            scripts,
            utxo: Mutex::new(UtxoSet::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// A copy of the current UTXO set, for hosts that need to inspect it.
    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.utxo.lock().clone()
    }

    /// Validate the transactions of a block and apply them to the live
    /// set, journaling the delta until the next commit point.
    fn connect_body(
        &self,
        block_hash: Hash,
        height: u64,
        transactions: &[Transaction],
    ) -> Result<UtxoDelta, ChainError> {
        let mut utxo = self.utxo.lock();
        let mut delta = UtxoDelta::default();

        match apply_transactions(&mut utxo, &mut delta, block_hash, transactions, &*self.scripts) {
            Ok(()) => {
                debug!(
                    hash = %short_hex(&block_hash),
                    height,
                    added = delta.added.len(),
                    spent = delta.spent.len(),
                    "connected block transactions"
                );
                self.pending.lock().push(PendingOp::Applied(delta.clone()));
                Ok(delta)
            }
            Err(e) => {
                // Partial application must not leak into the live set.
                utxo.revert(&delta);
                Err(e)
            }
        }
    }
}

fn apply_transactions(
    utxo: &mut UtxoSet,
    delta: &mut UtxoDelta,
    block_hash: Hash,
    transactions: &[Transaction],
    scripts: &dyn ScriptPredicate,
) -> Result<(), ChainError> {
    for tx in transactions {
        let txid = tx.hash();

        if !tx.is_coinbase() {
            let mut input_total: u64 = 0;
            for (index, input) in tx.inputs.iter().enumerate() {
                // Removing as we validate also catches a double spend
                // within this block.
                let spent = utxo.remove(&input.outpoint).ok_or_else(|| {
                    ChainError::verification(
                        block_hash,
                        format!(
                            "input {index} of transaction {} spends a missing or already-spent output",
                            short_hex(&txid)
                        ),
                    )
                })?;
                if !scripts.spend_allowed(tx, index, &spent) {
                    return Err(ChainError::verification(
                        block_hash,
                        format!(
                            "script evaluation rejected input {index} of transaction {}",
                            short_hex(&txid)
                        ),
                    ));
                }
                input_total = input_total.saturating_add(spent.value);
                delta.spent.push((input.outpoint, spent));
            }
            if tx.total_output_value() > input_total {
                return Err(ChainError::verification(
                    block_hash,
                    format!("transaction {} spends more than its inputs", short_hex(&txid)),
                ));
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = ember_types::OutPoint::new(txid, index as u32);
            utxo.insert(outpoint, output.clone());
            delta.added.push((outpoint, output.clone()));
        }
    }
    Ok(())
}

impl TransactionConnector for FullConnector {
    fn verifies_transactions(&self) -> bool {
        true
    }

    fn stored_in_scope(&self, hash: &Hash) -> Result<Option<StoredBlock>, StoreError> {
        // Full mode can only build on blocks it could still re-org through.
        Ok(self.store.get_undoable(hash)?.map(|undoable| undoable.stored))
    }

    fn connect(&self, height: u64, block: &Block) -> Result<UtxoDelta, ChainError> {
        let transactions = block.transactions.as_ref().ok_or_else(|| {
            ChainError::Argument("connect called with a header-only block".into())
        })?;
        self.connect_body(block.hash(), height, transactions)
    }

    fn connect_stored(&self, stored: &StoredBlock) -> Result<UtxoDelta, ChainError> {
        let hash = stored.hash();
        let undoable = self
            .store
            .get_undoable(&hash)?
            .ok_or(ChainError::Pruned { hash })?;
        let transactions = undoable.transactions.ok_or(ChainError::Pruned { hash })?;

        let delta = self.connect_body(hash, stored.height, &transactions)?;
        self.store.put_with_undo(stored, &transactions, Some(&delta))?;
        Ok(delta)
    }

    fn disconnect(&self, stored: &StoredBlock) -> Result<(), ChainError> {
        let hash = stored.hash();
        let delta = self
            .store
            .get_undoable(&hash)?
            .and_then(|undoable| undoable.delta)
            .ok_or(ChainError::Pruned { hash })?;

        self.utxo.lock().revert(&delta);
        debug!(hash = %short_hex(&hash), height = stored.height, "disconnected block");
        self.pending.lock().push(PendingOp::Reverted(delta));
        Ok(())
    }

    fn add_to_store(&self, prev: &StoredBlock, block: &Block) -> Result<StoredBlock, ChainError> {
        let stored = prev.build_next(&block.header)?;
        let transactions = block.transactions.as_ref().ok_or_else(|| {
            ChainError::Argument("full-verification store of a header-only block".into())
        })?;
        self.store.put_with_undo(&stored, transactions, None)?;
        Ok(stored)
    }

    fn add_to_store_with_undo(
        &self,
        prev: &StoredBlock,
        block: &Block,
        delta: UtxoDelta,
    ) -> Result<StoredBlock, ChainError> {
        let stored = prev.build_next(&block.header)?;
        let transactions = block.transactions.as_ref().ok_or_else(|| {
            ChainError::Argument("full-verification store of a header-only block".into())
        })?;
        self.store.put_with_undo(&stored, transactions, Some(&delta))?;
        Ok(stored)
    }

    fn set_chain_head(&self, head: &StoredBlock) -> Result<(), StoreError> {
        self.pending.lock().clear();
        self.store.put_head(head)
    }

    fn not_setting_chain_head(&self) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();
        let mut utxo = self.utxo.lock();
        for op in pending.drain(..).rev() {
            match op {
                PendingOp::Applied(delta) => utxo.revert(&delta),
                PendingOp::Reverted(delta) => utxo.apply(&delta),
            }
        }
        Ok(())
    }
}
