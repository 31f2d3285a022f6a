//! Core chain entities.
//!
//! A block is identified by the double-SHA-256 of its 80-byte header
//! encoding. Transactions are owned, immutable values; cloning one is how
//! independent consumers get independent copies.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::hashing::double_sha256;
use crate::wire;

/// A 32-byte hash. The derived array ordering (byte-lexicographic) is used
/// for tie-breaking only; everywhere else a hash is an opaque identity.
pub type Hash = [u8; 32];

/// The all-zero hash, used as the previous-hash of a genesis header and as
/// the out-point txid of a coinbase input.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Transactions with a lock time at or above this value are locked until a
/// wall-clock timestamp rather than a block height.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// The header of a block: everything that is hashed.
///
/// Immutable once constructed (by convention; mutating a header after
/// computing its hash gives a different block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Protocol version of this block.
    pub version: u32,
    /// Hash of the parent block header (the chain linkage).
    pub prev_hash: Hash,
    /// Merkle root over the block's transaction hashes.
    pub merkle_root: Hash,
    /// Unix timestamp in seconds. Encoded as 32 bits on the wire.
    pub timestamp: u64,
    /// Compact ("nBits") encoding of the difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// The block identity: double-SHA-256 of the 80-byte wire encoding.
    pub fn hash(&self) -> Hash {
        let mut buf = [0u8; wire::HEADER_LEN];
        wire::encode_header_into(self, &mut buf);
        double_sha256(&buf)
    }

    /// The header hash interpreted as a big-endian integer, for comparison
    /// against the difficulty target.
    pub fn hash_as_integer(&self) -> U256 {
        U256::from_big_endian(&self.hash())
    }
}

/// A block: header plus, optionally, the full list of transactions.
///
/// A header-only block (`transactions == None`) is what an SPV node
/// normally processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Option<Vec<Transaction>>,
}

impl Block {
    /// Wrap a bare header as a block without transactions.
    pub fn from_header(header: BlockHeader) -> Self {
        Self { header, transactions: None }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// A copy of this block with the transaction data dropped, so the body
    /// can be reclaimed once only the header is needed.
    pub fn as_header_only(&self) -> Block {
        Block::from_header(self.header.clone())
    }
}

/// Reference to a specific output of a specific transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    /// The sentinel out-point used by coinbase inputs.
    pub fn coinbase() -> Self {
        Self { txid: ZERO_HASH, index: u32::MAX }
    }
}

/// A transaction input: the output it spends plus an unparsed unlocking
/// script. Script contents are opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// A transaction output: a value in base units and an unparsed locking
/// script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A transaction. Hashing covers the full wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// The transaction identity: double-SHA-256 of the wire encoding.
    pub fn hash(&self) -> Hash {
        double_sha256(&wire::encode_transaction(self))
    }

    /// A coinbase transaction has exactly one input spending the sentinel
    /// out-point.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].outpoint == OutPoint::coinbase()
    }

    /// Whether this transaction is final at the given chain height and
    /// block timestamp.
    ///
    /// A transaction is final when its lock time is zero, when the lock
    /// time is strictly below the selected threshold value (height for
    /// small lock times, timestamp otherwise), or when every input has
    /// opted out of lock-time enforcement with a maximal sequence number.
    pub fn is_final(&self, height: u64, block_timestamp: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            block_timestamp
        };
        if u64::from(self.lock_time) < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.sequence == u32::MAX)
    }

    /// Sum of the output values, saturating on (invalid) overflow.
    pub fn total_output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.value))
    }
}
