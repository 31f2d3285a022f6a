//! Difficulty-transition verification.
//!
//! At every `interval`-th height the target retargets from the elapsed
//! time of the previous window; everywhere else a block must repeat its
//! parent's target. Testnets additionally allow minimum-difficulty blocks
//! after a long inter-block gap, so that an abandoned testnet remains
//! minable.

use primitive_types::{U256, U512};
use tracing::{debug, info};

use ember_types::{compact_to_target, short_hex, target_to_compact, BlockHeader};

use crate::domain::stored_block::StoredBlock;
use crate::error::ChainError;
use crate::params::NetworkParameters;
use crate::ports::store::BlockStore;

/// Check that `next`'s difficulty target is the one the rules derive from
/// `prev` and the chain behind it.
pub fn check_difficulty_transition(
    params: &NetworkParameters,
    store: &dyn BlockStore,
    prev: &StoredBlock,
    next: &BlockHeader,
) -> Result<(), ChainError> {
    let height = prev.height + 1;

    if !params.is_difficulty_transition(height) {
        if params.allow_min_difficulty_blocks
            && next.timestamp > params.easy_block_activation_time
        {
            return check_testnet_difficulty(params, store, prev, next);
        }
        if next.bits != prev.header.bits {
            return Err(ChainError::verification(
                next.hash(),
                format!(
                    "unexpected change in difficulty at height {}: {:#010x} vs {:#010x}",
                    height, next.bits, prev.header.bits
                ),
            ));
        }
        return Ok(());
    }

    // Retarget. Walking the whole window back is fine; it happens once per
    // interval after initial download.
    let mut cursor = prev.clone();
    for _ in 0..params.interval() - 1 {
        cursor = cursor.prev(store)?.ok_or_else(|| {
            ChainError::verification(
                next.hash(),
                "difficulty transition point but no path back to the genesis block",
            )
        })?;
    }
    debug!(
        from = %short_hex(&cursor.hash()),
        height,
        "retarget window anchored"
    );

    let prev_target = compact_to_target(prev.header.bits)
        .map_err(|e| ChainError::verification(next.hash(), e.to_string()))?;

    let actual_timespan = prev.header.timestamp.saturating_sub(cursor.header.timestamp);
    // Limit the adjustment step.
    let timespan = actual_timespan.clamp(params.target_timespan / 4, params.target_timespan * 4);

    let wide = prev_target.full_mul(U256::from(timespan)) / U512::from(params.target_timespan);
    let mut new_target = if wide > widen(params.pow_limit) {
        params.pow_limit
    } else {
        narrow(wide)
    };
    if new_target > params.pow_limit {
        info!("difficulty hit proof-of-work limit");
        new_target = params.pow_limit;
    }

    // The calculated target has more precision than the header carries, so
    // compare both at compact precision.
    let expected_bits = target_to_compact(new_target);
    if expected_bits != next.bits {
        return Err(ChainError::verification(
            next.hash(),
            format!(
                "network-provided difficulty bits do not match what was calculated: {:#010x} vs {:#010x}",
                next.bits, expected_bits
            ),
        ));
    }
    Ok(())
}

/// After the activation time, testnet allows a minimum-difficulty block
/// once twenty minutes (twice the target spacing) have passed without one.
/// Inside that window, the target must equal that of the last block that
/// was not minimum-difficulty.
fn check_testnet_difficulty(
    params: &NetworkParameters,
    store: &dyn BlockStore,
    prev: &StoredBlock,
    next: &BlockHeader,
) -> Result<(), ChainError> {
    let time_delta = next.timestamp as i64 - prev.header.timestamp as i64;
    // Blocks whose time runs backwards also get the relaxed rule; the
    // original chain accepted them due to an underflow and the network
    // rules inherited that behavior.
    if time_delta < 0 || time_delta > (params.target_spacing * 2) as i64 {
        return Ok(());
    }

    let genesis_hash = params.genesis_hash();
    let mut cursor = prev.clone();
    loop {
        if cursor.hash() == genesis_hash || params.is_difficulty_transition(cursor.height) {
            break;
        }
        let target = compact_to_target(cursor.header.bits)
            .map_err(|e| ChainError::verification(next.hash(), e.to_string()))?;
        if target != params.pow_limit {
            break;
        }
        cursor = cursor.prev(store)?.ok_or_else(|| {
            ChainError::verification(next.hash(), "no path back while scanning for real difficulty")
        })?;
    }

    if cursor.header.bits != next.bits {
        return Err(ChainError::verification(
            next.hash(),
            format!(
                "testnet difficulty transition that is not allowed: {:#010x} vs {:#010x}",
                cursor.header.bits, next.bits
            ),
        ));
    }
    Ok(())
}

fn widen(value: U256) -> U512 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes[32..]);
    U512::from_big_endian(&bytes)
}

/// Truncate a U512 known to fit into 256 bits.
fn narrow(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}
