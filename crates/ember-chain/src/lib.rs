//! # Ember Chain - SPV Block-Chain Engine
//!
//! Holds a tree of block headers, links arriving blocks (full, filtered
//! or header-only) into it, verifies them against the network's consensus
//! rules, tracks the branch with the greatest cumulative proof-of-work,
//! and re-organizes when a competing branch overtakes the best one.
//! Wallets and other observers attach as listeners and see a consistent,
//! totally ordered stream of inclusion, side-chain and re-org events.
//!
//! ## Theory
//!
//! The "chain" is actually a tree. In normal operation it behaves as a
//! list, but when two miners solve within seconds of each other (or when
//! the chain is under attack) competing branches exist until one
//! accumulates more work. Adding to the top of the best chain is not a
//! re-organization; a re-org happens only when a block connects to some
//! other branch and pushes its total work past the current head's.
//!
//! ## Modes
//!
//! - **Header-only (SPV)**, [`domain::HeaderOnlyConnector`]: headers are
//!   verified, trust is placed in proof-of-work plus checkpoints.
//! - **Full verification**, [`domain::FullConnector`]: every transaction
//!   is validated against a maintained UTXO set, with undoable deltas so
//!   re-orgs can rewind.
//!
//! One engine serves both; the mode is a capability
//! ([`ports::TransactionConnector`]), not a subclass.
//!
//! ## Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | `domain` | Stored blocks, orphan pool, header/difficulty rules, UTXO deltas, the two connectors |
//! | `ports` | Host-provided seams: block store, listeners, script predicate, clock |
//! | `adapters` | In-memory block store |
//! | `service` | The [`ChainEngine`] state machine |
//! | `params` | Per-network consensus constants |

pub mod adapters;
pub mod domain;
pub mod error;
pub mod params;
pub mod ports;
pub mod service;
pub mod test_utils;

pub use adapters::MemoryBlockStore;
pub use domain::{
    FullConnector, HeaderOnlyConnector, OrphanPool, StoredBlock, UtxoDelta, UtxoSet,
};
pub use error::ChainError;
pub use params::{Network, NetworkParameters};
pub use ports::{
    AcceptAllScripts, BlockStore, ChainListener, FixedTimeSource, ListenerError, NewBlockKind,
    ScriptPredicate, StoreError, SystemTimeSource, TimeSource, TransactionConnector,
    UndoableBlock,
};
pub use service::ChainEngine;
