//! Shared test harness: recording listeners and chain builders.

use std::sync::Arc;

use parking_lot::Mutex;

use ember_chain::{
    ChainEngine, ChainListener, ListenerError, NewBlockKind, StoredBlock,
};
use ember_types::{Hash, Transaction};

/// Everything a listener can observe, flattened for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Received { tx: Hash, block: Hash, kind: NewBlockKind },
    HashSeen { tx: Hash, block: Hash, kind: NewBlockKind },
    NewBestBlock { block: Hash },
    Reorganized { split: Hash, old: Vec<Hash>, new: Vec<Hash> },
}

/// A listener that records every callback in order.
#[derive(Default)]
pub struct RecordingListener {
    /// When false, no transaction is relevant and `receive_from_block`
    /// never fires.
    pub relevant: bool,
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { relevant: true, events: Mutex::new(Vec::new()) })
    }

    pub fn indifferent() -> Arc<Self> {
        Arc::new(Self { relevant: false, events: Mutex::new(Vec::new()) })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn best_block_hashes(&self) -> Vec<Hash> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::NewBestBlock { block } => Some(block),
                _ => None,
            })
            .collect()
    }

    pub fn received(&self, kind: NewBlockKind) -> Vec<Hash> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Received { tx, kind: k, .. } if k == kind => Some(tx),
                _ => None,
            })
            .collect()
    }

    pub fn reorganizations(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Reorganized { .. }))
            .collect()
    }
}

impl ChainListener for RecordingListener {
    fn is_transaction_relevant(&self, _tx: &Transaction) -> Result<bool, ListenerError> {
        Ok(self.relevant)
    }

    fn receive_from_block(
        &self,
        tx: Transaction,
        block: &StoredBlock,
        kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        self.events.lock().push(Event::Received { tx: tx.hash(), block: block.hash(), kind });
        Ok(())
    }

    fn notify_transaction_in_block(
        &self,
        tx_hash: &Hash,
        block: &StoredBlock,
        kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        self.events.lock().push(Event::HashSeen { tx: *tx_hash, block: block.hash(), kind });
        Ok(())
    }

    fn notify_new_best_block(&self, block: &StoredBlock) -> Result<(), ListenerError> {
        self.events.lock().push(Event::NewBestBlock { block: block.hash() });
        Ok(())
    }

    fn reorganize(
        &self,
        split: &StoredBlock,
        old_blocks: &[StoredBlock],
        new_blocks: &[StoredBlock],
    ) -> Result<(), ListenerError> {
        self.events.lock().push(Event::Reorganized {
            split: split.hash(),
            old: old_blocks.iter().map(StoredBlock::hash).collect(),
            new: new_blocks.iter().map(StoredBlock::hash).collect(),
        });
        Ok(())
    }
}

/// A listener that always fails with a parse-level error, to prove one
/// broken wallet cannot take the chain down.
#[derive(Default)]
pub struct BrokenScriptListener {
    pub calls: Mutex<usize>,
}

impl ChainListener for BrokenScriptListener {
    fn is_transaction_relevant(&self, _tx: &Transaction) -> Result<bool, ListenerError> {
        *self.calls.lock() += 1;
        Err(ListenerError::Script("unparseable script".into()))
    }

    fn receive_from_block(
        &self,
        _tx: Transaction,
        _block: &StoredBlock,
        _kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        Err(ListenerError::Script("unparseable script".into()))
    }

    fn notify_transaction_in_block(
        &self,
        _tx_hash: &Hash,
        _block: &StoredBlock,
        _kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    fn notify_new_best_block(&self, _block: &StoredBlock) -> Result<(), ListenerError> {
        Ok(())
    }

    fn reorganize(
        &self,
        _split: &StoredBlock,
        _old_blocks: &[StoredBlock],
        _new_blocks: &[StoredBlock],
    ) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// A listener that removes itself from the engine during the re-org
/// callback.
#[derive(Default)]
pub struct SelfRemovingListener {
    pub wiring: Mutex<Option<(Arc<ChainEngine>, Arc<dyn ChainListener>)>>,
    pub reorg_calls: Mutex<usize>,
}

impl SelfRemovingListener {
    /// Hook the listener up to the engine and hand it its own handle so
    /// it can deregister itself.
    pub fn wire(self: &Arc<Self>, engine: Arc<ChainEngine>) {
        let as_listener: Arc<dyn ChainListener> = self.clone();
        engine.add_listener(as_listener.clone());
        *self.wiring.lock() = Some((engine, as_listener));
    }
}

impl ChainListener for SelfRemovingListener {
    fn is_transaction_relevant(&self, _tx: &Transaction) -> Result<bool, ListenerError> {
        Ok(false)
    }

    fn receive_from_block(
        &self,
        _tx: Transaction,
        _block: &StoredBlock,
        _kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    fn notify_transaction_in_block(
        &self,
        _tx_hash: &Hash,
        _block: &StoredBlock,
        _kind: NewBlockKind,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    fn notify_new_best_block(&self, _block: &StoredBlock) -> Result<(), ListenerError> {
        Ok(())
    }

    fn reorganize(
        &self,
        _split: &StoredBlock,
        _old_blocks: &[StoredBlock],
        _new_blocks: &[StoredBlock],
    ) -> Result<(), ListenerError> {
        *self.reorg_calls.lock() += 1;
        if let Some((engine, me)) = self.wiring.lock().take() {
            engine.remove_listener(&me);
        }
        Ok(())
    }
}
