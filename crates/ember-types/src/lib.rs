//! # Ember Types - Core Chain Entities
//!
//! Shared entity types and consensus codecs used by every other crate in
//! the workspace.
//!
//! ## Clusters
//!
//! - **Identity**: [`Hash`], double-SHA-256 hashing, Merkle roots
//! - **Chain**: [`BlockHeader`], [`Block`], [`Transaction`] and the UTXO
//!   entity types ([`OutPoint`], [`TxOutput`])
//! - **Difficulty**: compact-target ("nBits") codec and per-header work
//! - **Wire**: the little-endian consensus encodings (80-byte headers,
//!   transactions, var-ints, filtered-block payloads)
//!
//! The wire formats here are normative for the peer protocol, so they are
//! hand-coded byte codecs rather than serde formats; serde derives on the
//! entities exist for hosts that persist them.

pub mod entities;
pub mod filtered;
pub mod hashing;
pub mod merkle;
pub mod target;
pub mod wire;

// Re-export U256 so downstream crates share one big-integer type.
pub use primitive_types::U256;

pub use entities::{
    Block, BlockHeader, Hash, OutPoint, Transaction, TxInput, TxOutput, ZERO_HASH,
};
pub use filtered::{FilteredBlock, PartialMerkleTree};
pub use hashing::{double_sha256, double_sha256_pair};
pub use merkle::merkle_root;
pub use target::{compact_to_target, target_to_compact, work_for_bits, work_for_target};
pub use wire::WireError;

/// Lowercase hex of a full hash, for diagnostics.
pub fn hash_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Abbreviated hex of a hash, for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}
