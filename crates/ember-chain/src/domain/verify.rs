//! Internal block validity: proof-of-work, timestamp sanity, version
//! bounds, and (when the contents matter) transaction well-formedness
//! against the Merkle root.
//!
//! Context-dependent rules (difficulty transitions, checkpoints, median
//! time, finality) live with the engine; everything here needs only the
//! block and the network's proof-of-work limit.

use ember_types::{compact_to_target, merkle_root, BlockHeader, Transaction, U256};

use crate::error::ChainError;
use crate::params::NetworkParameters;

/// How far into the future a header timestamp may run ahead of our clock.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Verify a header in isolation: well-formed version, a target within the
/// network's range, a hash at or below that target, and a timestamp not
/// absurdly in the future.
pub fn verify_header(
    params: &NetworkParameters,
    header: &BlockHeader,
    now: u64,
) -> Result<(), ChainError> {
    let hash = header.hash();

    if header.version == 0 {
        return Err(ChainError::verification(hash, "block version 0 is not valid"));
    }

    let target = compact_to_target(header.bits)
        .map_err(|e| ChainError::verification(hash, e.to_string()))?;
    if target.is_zero() || target > params.pow_limit {
        return Err(ChainError::verification(
            hash,
            "difficulty target is outside the allowed range",
        ));
    }

    if U256::from_big_endian(&hash) > target {
        return Err(ChainError::verification(
            hash,
            "hash is higher than the difficulty target",
        ));
    }

    if header.timestamp > now.saturating_add(MAX_FUTURE_DRIFT_SECS) {
        return Err(ChainError::verification(
            hash,
            format!("timestamp {} is too far in the future", header.timestamp),
        ));
    }

    Ok(())
}

/// Verify a block body: exactly one leading coinbase and a transaction
/// list that hashes to the header's Merkle root.
pub fn verify_body(header: &BlockHeader, transactions: &[Transaction]) -> Result<(), ChainError> {
    let hash = header.hash();

    if transactions.is_empty() {
        return Err(ChainError::verification(hash, "block has no transactions"));
    }
    if !transactions[0].is_coinbase() {
        return Err(ChainError::verification(hash, "first transaction is not a coinbase"));
    }
    for (index, tx) in transactions.iter().enumerate().skip(1) {
        if tx.is_coinbase() {
            return Err(ChainError::verification(
                hash,
                format!("unexpected coinbase at index {index}"),
            ));
        }
    }

    let tx_hashes: Vec<_> = transactions.iter().map(Transaction::hash).collect();
    if merkle_root(&tx_hashes) != Some(header.merkle_root) {
        return Err(ChainError::verification(
            hash,
            "merkle root does not match the transactions",
        ));
    }

    Ok(())
}
