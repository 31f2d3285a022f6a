//! The chain engine: the state machine that links arriving blocks into a
//! tree, tracks the most-work branch, re-organizes when a side branch
//! overtakes, and fans events out to listeners.
//!
//! One mutex serializes all mutation (`add`, orphan replay, re-org) for
//! the single block-processing writer. The chain-head pointer sits behind
//! its own short-critical-section latch so wallets, UIs and RPC threads
//! read the head without ever waiting behind a long `add`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use ember_types::{hash_hex, short_hex, Block, FilteredBlock, Hash, Transaction};

use crate::domain::difficulty::check_difficulty_transition;
use crate::domain::orphan_pool::{OrphanBlock, OrphanPool};
use crate::domain::stored_block::StoredBlock;
use crate::domain::verify::{verify_body, verify_header};
use crate::domain::HeaderOnlyConnector;
use crate::error::ChainError;
use crate::params::NetworkParameters;
use crate::ports::connector::TransactionConnector;
use crate::ports::listener::{ChainListener, ListenerError, NewBlockKind};
use crate::ports::store::{BlockStore, StoreError};
use crate::ports::time::{SystemTimeSource, TimeSource};

struct EngineState {
    orphans: OrphanPool,
    stats_window_start: u64,
    stats_blocks_added: u64,
}

/// The block-chain engine. See the crate docs for the security model of
/// the two verification modes.
pub struct ChainEngine {
    params: NetworkParameters,
    store: Arc<dyn BlockStore>,
    connector: Arc<dyn TransactionConnector>,
    /// The engine mutex: held across one entire `add`, including orphan
    /// replay and re-organization.
    state: Mutex<EngineState>,
    /// The head latch: written only at the commit point, read lock-free
    /// of the engine mutex.
    head: RwLock<StoredBlock>,
    listeners: RwLock<Vec<Arc<dyn ChainListener>>>,
    time: Arc<dyn TimeSource>,
}

impl ChainEngine {
    /// Build an engine over a store and a verification mode. The store
    /// must already contain a chain head (stores seed themselves with
    /// genesis).
    pub fn new(
        params: NetworkParameters,
        store: Arc<dyn BlockStore>,
        connector: Arc<dyn TransactionConnector>,
    ) -> Result<Self, ChainError> {
        let head = store.get_head()?;
        info!(
            height = head.height,
            hash = %hash_hex(&head.hash()),
            "chain head loaded"
        );
        Ok(Self {
            params,
            store,
            connector,
            state: Mutex::new(EngineState {
                orphans: OrphanPool::new(),
                stats_window_start: 0,
                stats_blocks_added: 0,
            }),
            head: RwLock::new(head),
            listeners: RwLock::new(Vec::new()),
            time: Arc::new(SystemTimeSource),
        })
    }

    /// An SPV engine: header verification only.
    pub fn new_header_only(
        params: NetworkParameters,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self, ChainError> {
        let connector = Arc::new(HeaderOnlyConnector::new(store.clone()));
        Self::new(params, store, connector)
    }

    /// Replace the clock, for tests of the timestamp rules.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    // -----------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn ChainListener>) {
        self.listeners.write().push(listener);
    }

    /// Wallets are listeners; this alias exists so call sites read
    /// naturally.
    pub fn add_wallet(&self, wallet: Arc<dyn ChainListener>) {
        self.add_listener(wallet);
    }

    /// Remove a listener by identity. Safe to call from inside a
    /// callback; the current dispatch keeps its snapshot.
    pub fn remove_listener(&self, listener: &Arc<dyn ChainListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|held| !Arc::ptr_eq(held, listener));
        listeners.len() != before
    }

    fn listener_snapshot(&self) -> Vec<Arc<dyn ChainListener>> {
        self.listeners.read().clone()
    }

    fn is_registered(&self, listener: &Arc<dyn ChainListener>) -> bool {
        self.listeners.read().iter().any(|held| Arc::ptr_eq(held, listener))
    }

    // -----------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------

    /// The stored block with the most cumulative work currently known.
    pub fn chain_head(&self) -> StoredBlock {
        self.head.read().clone()
    }

    pub fn best_height(&self) -> u64 {
        self.head.read().height
    }

    /// Estimate when the given height will be (or was) reached, assuming
    /// the network's mean inter-block interval from the current head's
    /// timestamp. Useful for turning lock times into human-readable
    /// times; heights in the past are still extrapolated, not looked up.
    pub fn estimate_block_time(&self, height: u64) -> SystemTime {
        let head = self.head.read();
        let offset = height as i64 - head.height as i64;
        let secs =
            head.header.timestamp as i64 + self.params.target_spacing as i64 * offset;
        if secs <= 0 {
            return UNIX_EPOCH;
        }
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    }

    /// Whether the given hash is currently held in the orphan pool.
    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.state.lock().orphans.contains(hash)
    }

    /// The earliest ancestor of `hash` that is itself still an orphan;
    /// the network layer should request that block first. `None` if `hash`
    /// is not an orphan.
    pub fn orphan_root(&self, hash: &Hash) -> Option<Block> {
        self.state.lock().orphans.root_of(hash).cloned()
    }

    // -----------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------

    /// Process a received block and try to add it to the chain.
    ///
    /// `Ok(true)` if the block connected (or was the head already);
    /// `Ok(false)` if it is valid so far but cannot connect yet and was
    /// put aside as an orphan. Accessing the block's transactions from
    /// another thread while this runs is undefined.
    pub fn add(&self, block: Block) -> Result<bool, ChainError> {
        let mut state = self.state.lock();
        let result = self.add_inner(&mut state, block, None, None, true);
        self.abort_on_failure(result)
    }

    /// Process a block received through a Bloom filter.
    ///
    /// The partial tree is verified against the header's Merkle root, and
    /// every attached transaction must appear in the matched set. Matched
    /// hashes whose bodies were attached are delivered through
    /// `receive_from_block`; the rest through `notify_transaction_in_block`.
    pub fn add_filtered(&self, block: FilteredBlock) -> Result<bool, ChainError> {
        let mut state = self.state.lock();
        let result = self.prepare_filtered(&block).and_then(|(hashes, txns)| {
            self.add_inner(&mut state, block.header_block(), Some(hashes), Some(txns), true)
        });
        self.abort_on_failure(result)
    }

    /// Give the store its abort hook when a block fails verification or a
    /// re-org dies on pruned data, so open delta transactions roll back.
    fn abort_on_failure(&self, result: Result<bool, ChainError>) -> Result<bool, ChainError> {
        if matches!(
            &result,
            Err(ChainError::Verification { .. }) | Err(ChainError::Pruned { .. })
        ) {
            self.connector.not_setting_chain_head()?;
        }
        result
    }

    fn prepare_filtered(
        &self,
        block: &FilteredBlock,
    ) -> Result<(HashSet<Hash>, Vec<Transaction>), ChainError> {
        let hash = block.hash();
        let matched = block
            .transaction_hashes()
            .map_err(|e| ChainError::verification(hash, e.to_string()))?;
        let mut hashes: HashSet<Hash> = matched.into_iter().collect();

        // Bodies may be fewer than matched hashes (a transaction seen in
        // loose broadcast is not re-sent), but never outside the set.
        for tx in &block.transactions {
            if !hashes.remove(&tx.hash()) {
                return Err(ChainError::verification(
                    hash,
                    "attached transaction is not in the filtered set",
                ));
            }
        }
        Ok((hashes, block.transactions.clone()))
    }

    fn add_inner(
        &self,
        state: &mut EngineState,
        block: Block,
        filtered_hashes: Option<HashSet<Hash>>,
        filtered_txns: Option<Vec<Transaction>>,
        try_connecting: bool,
    ) -> Result<bool, ChainError> {
        let now = self.time.now();
        self.log_throughput(state, now);

        let hash = block.hash();

        // Quick duplicate checks before the expensive work.
        if hash == self.chain_head().hash() {
            return Ok(true);
        }
        if try_connecting && state.orphans.contains(&hash) {
            return Ok(false);
        }

        if self.connector.verifies_transactions() && block.transactions.is_none() {
            return Err(ChainError::verification(
                hash,
                "received a bare header while running in full-verification mode",
            ));
        }

        // Defer the Merkle check unless somebody cares about the
        // contents; this saves a lot of hashing on uninteresting blocks.
        let contents_important = self.connector.verifies_transactions()
            || block
                .transactions
                .as_deref()
                .is_some_and(|txns| self.contains_relevant_transactions(txns));

        if let Err(e) = self.verify_block(&block, now, contents_important) {
            error!(hash = %hash_hex(&hash), "failed to verify block: {e}");
            return Err(e);
        }

        // Try linking it to a place in the currently known blocks.
        let Some(prev) = self.connector.stored_in_scope(&block.header.prev_hash)? else {
            if !try_connecting {
                return Err(ChainError::Argument(
                    "orphan replay reached a block whose parent vanished".into(),
                ));
            }
            warn!(
                hash = %short_hex(&hash),
                prev = %short_hex(&block.header.prev_hash),
                "block does not connect, holding as orphan"
            );
            let orphan = OrphanBlock { block, filtered_hashes, filtered_txns };
            if let Some(evicted) = state.orphans.insert(hash, orphan) {
                warn!(hash = %short_hex(&evicted), "orphan pool full, evicted oldest entry");
            }
            return Ok(false);
        };

        check_difficulty_transition(&self.params, &*self.store, &prev, &block.header)?;
        self.connect_block(block, prev, filtered_hashes, filtered_txns)?;

        if try_connecting {
            self.try_connecting_orphans(state)?;
        }
        state.stats_blocks_added += 1;
        Ok(true)
    }

    fn log_throughput(&self, state: &mut EngineState, now: u64) {
        if now.saturating_sub(state.stats_window_start) >= 1 {
            if state.stats_blocks_added > 1 {
                info!("{} blocks per second", state.stats_blocks_added);
            }
            state.stats_window_start = now;
            state.stats_blocks_added = 0;
        }
    }

    fn contains_relevant_transactions(&self, transactions: &[Transaction]) -> bool {
        let listeners = self.listener_snapshot();
        for tx in transactions {
            for listener in &listeners {
                match listener.is_transaction_relevant(tx) {
                    Ok(true) => return true,
                    Ok(false) => {}
                    Err(e) => {
                        // A script one wallet cannot parse must not break
                        // the chain; treat as not relevant.
                        warn!("failed to check transaction relevance: {e}");
                    }
                }
            }
        }
        false
    }

    fn verify_block(
        &self,
        block: &Block,
        now: u64,
        contents_important: bool,
    ) -> Result<(), ChainError> {
        verify_header(&self.params, &block.header, now)?;
        if contents_important {
            if let Some(txns) = block.transactions.as_deref() {
                verify_body(&block.header, txns)?;
            }
        }
        Ok(())
    }

    fn connect_block(
        &self,
        block: Block,
        prev: StoredBlock,
        filtered_hashes: Option<HashSet<Hash>>,
        filtered_txns: Option<Vec<Transaction>>,
    ) -> Result<(), ChainError> {
        let hash = block.hash();
        let height = prev.height + 1;
        let verifying = self.connector.verifies_transactions();

        if !self.params.passes_checkpoint(height, &hash) {
            return Err(ChainError::verification(
                hash,
                format!("failed checkpoint lock-in at height {height}"),
            ));
        }

        if verifying {
            if let Some(txns) = block.transactions.as_deref() {
                for tx in txns {
                    if !tx.is_final(height, block.header.timestamp) {
                        return Err(ChainError::verification(
                            hash,
                            "block contains a non-final transaction",
                        ));
                    }
                }
            }
        }

        let head = self.chain_head();
        if prev.hash() == head.hash() {
            // A normal continuation of the chain.
            if verifying && block.header.timestamp <= self.median_time_past(&prev)? {
                return Err(ChainError::verification(hash, "timestamp is too early"));
            }

            let new_head = if verifying {
                let delta = self.connector.connect(height, &block)?;
                self.connector.add_to_store_with_undo(&prev, &block, delta)?
            } else {
                self.connector.add_to_store(&prev, &block)?
            };
            self.set_chain_head(new_head.clone())?;
            debug!("chain is now {} blocks high", new_head.height);

            self.dispatch_connected(
                &new_head,
                NewBlockKind::BestChain,
                &block,
                filtered_hashes.as_ref(),
                filtered_txns.as_deref(),
            )?;
        } else {
            // Connects somewhere other than the top of the best chain.
            let new_block = prev.build_next(&block.header)?;
            let overtakes = new_block.more_work_than(&head);

            if overtakes {
                info!(hash = %short_hex(&hash), "block is causing a re-organize");
            } else {
                let split = self.find_split(&new_block, &head)?.ok_or_else(|| {
                    ChainError::verification(hash, "block forks the chain but the split point is missing")
                })?;
                if split.hash() == new_block.hash() {
                    // A re-seen main-chain block; re-processing it would
                    // only confuse the wallets.
                    warn!(
                        height = new_block.height,
                        hash = %short_hex(&hash),
                        "saw a duplicated block in the main chain"
                    );
                    return Ok(());
                }
                self.connector.add_to_store(&prev, &block)?;
                info!(
                    split_height = split.height,
                    split = %short_hex(&split.hash()),
                    hash = %short_hex(&hash),
                    "block forks the chain but did not cause a re-organize"
                );
            }

            // Side-chain notifications go out before any re-org work in
            // this same call; that keeps listener accounting simple.
            if block.transactions.is_some() || filtered_txns.is_some() {
                self.dispatch_connected(
                    &new_block,
                    NewBlockKind::SideChain,
                    &block,
                    filtered_hashes.as_ref(),
                    filtered_txns.as_deref(),
                )?;
            }

            if overtakes {
                self.handle_new_best_chain(prev, new_block, block)?;
            }
        }
        Ok(())
    }

    /// Switch the best chain to `new_head`, which has overtaken the
    /// current head.
    fn handle_new_best_chain(
        &self,
        stored_prev: StoredBlock,
        new_head: StoredBlock,
        block: Block,
    ) -> Result<(), ChainError> {
        let head = self.chain_head();
        let split = self.find_split(&new_head, &head)?.ok_or_else(|| {
            ChainError::verification(
                new_head.hash(),
                "block forks the chain but the split point is missing",
            )
        })?;
        info!(
            split_height = split.height,
            old_head = %short_hex(&head.hash()),
            new_head = %short_hex(&new_head.hash()),
            "re-organize after split"
        );

        let old_blocks = self.partial_chain(&head, &split)?;
        let new_blocks = self.partial_chain(&new_head, &split)?;

        if self.connector.verifies_transactions() {
            // Unwind the abandoned branch newest-first.
            for old in &old_blocks {
                self.connector.disconnect(old)?;
            }
            // Then play the new branch oldest-first.
            for cursor in new_blocks.iter().rev() {
                let parent = self.store.get(&cursor.header.prev_hash)?.ok_or_else(|| {
                    StoreError::Inconsistent { reason: "re-org parent missing from store".into() }
                })?;
                if cursor.header.timestamp <= self.median_time_past(&parent)? {
                    return Err(ChainError::verification(
                        cursor.hash(),
                        "timestamp is too early during re-organize",
                    ));
                }
                if cursor.hash() == new_head.hash() {
                    let delta = self.connector.connect(cursor.height, &block)?;
                    self.connector.add_to_store_with_undo(&stored_prev, &block, delta)?;
                } else {
                    self.connector.connect_stored(cursor)?;
                }
            }
        } else {
            // Header-only mode: the rest of the branch is already stored.
            self.connector.add_to_store(&stored_prev, &block)?;
        }

        self.set_chain_head(new_head)?;

        // One re-org callback per listener, in registration order. A
        // listener may remove itself during the callback; the snapshot
        // keeps iteration sane and the registry check skips the removed.
        let snapshot = self.listener_snapshot();
        for listener in &snapshot {
            if !self.is_registered(listener) {
                continue;
            }
            match listener.reorganize(&split, &old_blocks, &new_blocks) {
                Ok(()) => {}
                Err(ListenerError::Script(msg)) => {
                    warn!("listener failed during re-organize: {msg}");
                }
                Err(ListenerError::Store(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Commit point: the store durably records the head, then the latch
    /// flips so readers see it.
    fn set_chain_head(&self, stored: StoredBlock) -> Result<(), ChainError> {
        self.connector.set_chain_head(&stored)?;
        *self.head.write() = stored;
        Ok(())
    }

    /// The deepest common ancestor of two heads. Steps the deeper cursor
    /// until heights match, then both until they meet. `None` means the
    /// store lost part of a chain; the caller treats that as a
    /// verification failure.
    fn find_split(
        &self,
        new_head: &StoredBlock,
        old_head: &StoredBlock,
    ) -> Result<Option<StoredBlock>, StoreError> {
        let mut current = old_head.clone();
        let mut new = new_head.clone();
        while current.hash() != new.hash() {
            let stepping = if current.height > new.height { &mut current } else { &mut new };
            match self.store.get(&stepping.header.prev_hash)? {
                Some(parent) => *stepping = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Contiguous blocks from `higher` (inclusive) down to `lower`
    /// (exclusive), in descending height.
    fn partial_chain(
        &self,
        higher: &StoredBlock,
        lower: &StoredBlock,
    ) -> Result<Vec<StoredBlock>, ChainError> {
        let mut blocks = Vec::with_capacity((higher.height - lower.height) as usize);
        let mut cursor = higher.clone();
        while cursor.hash() != lower.hash() {
            let prev_hash = cursor.header.prev_hash;
            blocks.push(cursor);
            cursor = self.store.get(&prev_hash)?.ok_or(StoreError::Inconsistent {
                reason: "ran off the end of the chain".into(),
            })?;
        }
        Ok(blocks)
    }

    /// Median timestamp of the last up-to-eleven blocks ending at
    /// `stored`. Connecting blocks must move past it.
    fn median_time_past(&self, stored: &StoredBlock) -> Result<u64, ChainError> {
        let mut timestamps = Vec::with_capacity(11);
        let mut cursor = Some(stored.clone());
        while let Some(block) = cursor {
            timestamps.push(block.header.timestamp);
            if timestamps.len() == 11 {
                break;
            }
            cursor = self.store.get(&block.header.prev_hash)?;
        }
        timestamps.sort_unstable();
        Ok(timestamps[timestamps.len() / 2])
    }

    /// Deliver one connected block to every listener: relevant
    /// transactions, filtered-hash sightings, and (for extensions) the
    /// new-best-block signal, in that order per listener.
    fn dispatch_connected(
        &self,
        stored: &StoredBlock,
        kind: NewBlockKind,
        block: &Block,
        filtered_hashes: Option<&HashSet<Hash>>,
        filtered_txns: Option<&[Transaction]>,
    ) -> Result<(), ChainError> {
        let snapshot = self.listener_snapshot();
        for listener in &snapshot {
            let txns: Option<&[Transaction]> = block.transactions.as_deref().or(filtered_txns);
            if let Some(txns) = txns {
                self.send_transactions_to_listener(listener, stored, kind, txns)?;
            }
            if let Some(hashes) = filtered_hashes {
                for tx_hash in hashes {
                    self.swallow_script_error(
                        listener.notify_transaction_in_block(tx_hash, stored, kind),
                    )?;
                }
            }
            if kind == NewBlockKind::BestChain {
                self.swallow_script_error(listener.notify_new_best_block(stored))?;
            }
        }
        Ok(())
    }

    /// Each listener gets its own clone of a relevant transaction, so no
    /// two listeners ever share mutable per-transaction state.
    fn send_transactions_to_listener(
        &self,
        listener: &Arc<dyn ChainListener>,
        stored: &StoredBlock,
        kind: NewBlockKind,
        transactions: &[Transaction],
    ) -> Result<(), ChainError> {
        for tx in transactions {
            match listener.is_transaction_relevant(tx) {
                Ok(true) => {
                    self.swallow_script_error(listener.receive_from_block(tx.clone(), stored, kind))?;
                }
                Ok(false) => {}
                Err(ListenerError::Script(msg)) => {
                    warn!("failed to parse a script: {msg}");
                }
                Err(ListenerError::Store(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Parse-level listener failures are logged and swallowed; the chain
    /// must not break because one wallet misbehaves. Store failures
    /// propagate.
    fn swallow_script_error(&self, result: Result<(), ListenerError>) -> Result<(), ChainError> {
        match result {
            Ok(()) => Ok(()),
            Err(ListenerError::Script(msg)) => {
                warn!("listener failed on a parse-level issue: {msg}");
                Ok(())
            }
            Err(ListenerError::Store(e)) => Err(e.into()),
        }
    }

    /// For each orphan, see if its parent has shown up, and if so connect
    /// it; repeat to a fixed point. Brute force is fine here, as orphans
    /// are rare and the pool is capped.
    fn try_connecting_orphans(&self, state: &mut EngineState) -> Result<(), ChainError> {
        loop {
            let mut connected_this_round = 0usize;
            for hash in state.orphans.hashes_in_arrival_order() {
                let parent_known = match state.orphans.get(&hash) {
                    Some(entry) => self
                        .connector
                        .stored_in_scope(&entry.block.header.prev_hash)?
                        .is_some(),
                    None => false,
                };
                if !parent_known {
                    debug!(hash = %short_hex(&hash), "orphan is not connectable yet");
                    continue;
                }
                let Some(entry) = state.orphans.remove(&hash) else { continue };
                debug!(hash = %short_hex(&hash), "connecting orphan");
                // `false` keeps the replay from recursing a new sweep.
                self.add_inner(
                    state,
                    entry.block,
                    entry.filtered_hashes,
                    entry.filtered_txns,
                    false,
                )?;
                connected_this_round += 1;
            }
            if connected_this_round == 0 {
                break;
            }
            info!("connected {connected_this_round} orphan blocks");
        }
        Ok(())
    }
}
