//! # Integration Tests
//!
//! Cross-crate tests that drive the whole engine the way a node host
//! would: blocks arriving in awkward orders, forks, re-organizations,
//! filtered blocks, and misbehaving listeners.
//!
//! ## Structure
//!
//! - `harness`: recording listeners and small scenario builders
//! - `scenarios`: concrete end-to-end scenarios (linear growth, orphan
//!   deferral, side chains, re-orgs, pruned re-orgs, duplicates,
//!   filtered delivery)
//! - `properties`: universal invariants such as head monotonicity,
//!   arrival-order determinism, orphan-pool completeness, UTXO re-org
//!   symmetry, exactly-once listener delivery, Bloom filter laws

pub mod harness;

#[cfg(test)]
mod properties;
#[cfg(test)]
mod scenarios;
