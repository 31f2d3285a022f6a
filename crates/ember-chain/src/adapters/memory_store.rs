//! In-memory block store, seeded with the network's genesis block.
//!
//! The reference store for unit and integration tests; durable stores
//! implement the same port over a database. `prune` drops a block's body
//! and delta the way a bounded production store eventually would, so the
//! pruned-re-org path is testable.

use std::collections::HashMap;

use parking_lot::RwLock;

use ember_types::{Hash, Transaction};

use crate::domain::stored_block::StoredBlock;
use crate::domain::utxo::UtxoDelta;
use crate::params::NetworkParameters;
use crate::ports::store::{BlockStore, StoreError, UndoableBlock};

#[derive(Clone)]
struct Record {
    stored: StoredBlock,
    transactions: Option<Vec<Transaction>>,
    delta: Option<UtxoDelta>,
}

struct Inner {
    records: HashMap<Hash, Record>,
    head: StoredBlock,
}

pub struct MemoryBlockStore {
    inner: RwLock<Inner>,
}

impl MemoryBlockStore {
    /// A fresh store containing only the genesis block, which is also the
    /// head.
    pub fn new(params: &NetworkParameters) -> Result<Self, StoreError> {
        let genesis = StoredBlock::genesis(params.genesis.header.clone()).map_err(|e| {
            StoreError::Inconsistent { reason: format!("genesis block is invalid: {e}") }
        })?;
        let mut records = HashMap::new();
        records.insert(
            genesis.hash(),
            Record {
                stored: genesis.clone(),
                transactions: params.genesis.transactions.clone(),
                delta: None,
            },
        );
        Ok(Self { inner: RwLock::new(Inner { records, head: genesis }) })
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Drop a block's body and undo delta, keeping header, work and
    /// height. Returns whether the block was present.
    pub fn prune(&self, hash: &Hash) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(hash) {
            Some(record) => {
                record.transactions = None;
                record.delta = None;
                true
            }
            None => false,
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, hash: &Hash) -> Result<Option<StoredBlock>, StoreError> {
        Ok(self.inner.read().records.get(hash).map(|r| r.stored.clone()))
    }

    fn put(&self, stored: &StoredBlock) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner
            .records
            .entry(stored.hash())
            .and_modify(|record| record.stored = stored.clone())
            .or_insert_with(|| Record {
                stored: stored.clone(),
                transactions: None,
                delta: None,
            });
        Ok(())
    }

    fn put_with_undo(
        &self,
        stored: &StoredBlock,
        transactions: &[Transaction],
        delta: Option<&UtxoDelta>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner.records.entry(stored.hash()).or_insert_with(|| Record {
            stored: stored.clone(),
            transactions: None,
            delta: None,
        });
        record.stored = stored.clone();
        record.transactions = Some(transactions.to_vec());
        if let Some(delta) = delta {
            record.delta = Some(delta.clone());
        }
        Ok(())
    }

    fn get_undoable(&self, hash: &Hash) -> Result<Option<UndoableBlock>, StoreError> {
        Ok(self.inner.read().records.get(hash).map(|record| UndoableBlock {
            stored: record.stored.clone(),
            transactions: record.transactions.clone(),
            delta: record.delta.clone(),
        }))
    }

    fn get_head(&self) -> Result<StoredBlock, StoreError> {
        Ok(self.inner.read().head.clone())
    }

    fn put_head(&self, stored: &StoredBlock) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.records.contains_key(&stored.hash()) {
            return Err(StoreError::Inconsistent {
                reason: "chain head must reference a stored block".into(),
            });
        }
        inner.head = stored.clone();
        Ok(())
    }
}
