//! Network parameters: the per-network consensus constants the engine
//! verifies blocks against.
//!
//! The engine never proposes difficulty targets; it only checks that a
//! block's target matches what these parameters derive.

use std::collections::HashMap;

use primitive_types::U256;

use ember_types::{compact_to_target, Block, BlockHeader, Hash, ZERO_HASH};

/// Which chain these parameters describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Main,
    Test,
    /// Trivially easy proof-of-work for tests.
    UnitTest,
}

/// Consensus constants for one network.
#[derive(Debug, Clone)]
pub struct NetworkParameters {
    pub network: Network,
    /// The well-known block every chain is rooted at.
    pub genesis: Block,
    /// Easiest allowed difficulty target.
    pub pow_limit: U256,
    /// Intended seconds between blocks.
    pub target_spacing: u64,
    /// Seconds per difficulty-adjustment window.
    pub target_timespan: u64,
    /// Hard-coded `(height, hash)` pairs a candidate chain must match.
    pub checkpoints: HashMap<u64, Hash>,
    /// Testnet relaxation: minimum-difficulty blocks are allowed after a
    /// long inter-block gap.
    pub allow_min_difficulty_blocks: bool,
    /// Timestamp from which the minimum-difficulty relaxation applies.
    pub easy_block_activation_time: u64,
}

/// Compact target used by the unit-test network; nearly every hash
/// satisfies it, so test blocks solve in a handful of nonce increments.
pub const EASY_BITS: u32 = 0x207f_ffff;

impl NetworkParameters {
    /// Blocks per difficulty-adjustment window.
    pub fn interval(&self) -> u64 {
        self.target_timespan / self.target_spacing
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis.hash()
    }

    /// Whether a block at this height must carry a retargeted difficulty.
    pub fn is_difficulty_transition(&self, height: u64) -> bool {
        height % self.interval() == 0
    }

    /// Checkpoint gate: heights without an entry always pass; heights with
    /// one must match exactly.
    pub fn passes_checkpoint(&self, height: u64, hash: &Hash) -> bool {
        self.checkpoints.get(&height).map_or(true, |expected| expected == hash)
    }

    /// Parameters for an isolated test network: easy proof-of-work, no
    /// checkpoints, standard spacing.
    pub fn unit_test() -> Self {
        let genesis = Block::from_header(BlockHeader {
            version: 1,
            prev_hash: ZERO_HASH,
            merkle_root: ZERO_HASH,
            timestamp: 1_296_688_602,
            bits: EASY_BITS,
            nonce: 2,
        });
        Self {
            network: Network::UnitTest,
            genesis,
            pow_limit: compact_to_target(EASY_BITS).expect("constant is a valid compact target"),
            target_spacing: 600,
            target_timespan: 14 * 24 * 60 * 60,
            checkpoints: HashMap::new(),
            allow_min_difficulty_blocks: false,
            easy_block_activation_time: 0,
        }
    }
}
