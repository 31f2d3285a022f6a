//! Builders for test chains: coinbases, spends, and solved blocks.
//!
//! Everything here targets the unit-test network parameters, whose easy
//! proof-of-work limit lets `solve` finish in a handful of nonce
//! increments.

use ember_types::{
    compact_to_target, double_sha256, merkle_root, Block, BlockHeader, OutPoint, Transaction,
    TxInput, TxOutput, U256,
};

use crate::domain::stored_block::StoredBlock;

/// Grind the nonce until the header satisfies its own compact target.
pub fn solve(header: &mut BlockHeader) {
    let target = compact_to_target(header.bits).expect("test header carries a valid target");
    while U256::from_big_endian(&header.hash()) > target {
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// A coinbase paying `value`, made unique by `tag`.
pub fn coinbase(value: u64, tag: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            outpoint: OutPoint::coinbase(),
            script_sig: tag.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput { value, script_pubkey: tag.to_le_bytes().to_vec() }],
        lock_time: 0,
    }
}

/// A transaction spending output `index` of `prev` into a single output
/// of `value`.
pub fn spend(prev: &Transaction, index: u32, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            outpoint: OutPoint::new(prev.hash(), index),
            script_sig: vec![0x51],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput { value, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

/// A solved header-only child of `parent`. The merkle root is synthesized
/// from the parent hash and timestamp so sibling test blocks stay
/// distinct.
pub fn next_header_block(parent: &StoredBlock, timestamp: u64) -> Block {
    let mut seed = Vec::with_capacity(40);
    seed.extend_from_slice(&parent.hash());
    seed.extend_from_slice(&timestamp.to_le_bytes());

    let mut header = BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        merkle_root: double_sha256(&seed),
        timestamp,
        bits: parent.header.bits,
        nonce: 0,
    };
    solve(&mut header);
    Block::from_header(header)
}

/// A solved child of `parent` carrying the given transactions.
pub fn next_full_block(parent: &StoredBlock, timestamp: u64, txns: Vec<Transaction>) -> Block {
    assert!(!txns.is_empty(), "a full block needs at least a coinbase");
    let tx_hashes: Vec<_> = txns.iter().map(Transaction::hash).collect();

    let mut header = BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        merkle_root: merkle_root(&tx_hashes).expect("non-empty"),
        timestamp,
        bits: parent.header.bits,
        nonce: 0,
    };
    solve(&mut header);
    Block { header, transactions: Some(txns) }
}
