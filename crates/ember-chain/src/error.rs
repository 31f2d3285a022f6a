//! Error types for the chain engine.
//!
//! Four kinds, with different caller contracts: `Verification` drops the
//! offending block and leaves the store untouched; `Pruned` abandons a
//! re-organization that needs discarded undo data; `Store` is a fatal
//! persistence failure; `Argument` is API misuse.

use thiserror::Error;

use ember_types::{hash_hex, Hash};

use crate::ports::store::StoreError;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The block violates consensus rules. Carries the offending block's
    /// hash for diagnostics.
    #[error("block {} failed verification: {reason}", hash_hex(.hash))]
    Verification { hash: Hash, reason: String },

    /// A re-organization needs undo data for this block, but the store
    /// has pruned it. The caller can fetch full blocks and retry.
    #[error("re-org requires undo data for block {} that the store no longer has", hash_hex(.hash))]
    Pruned { hash: Hash },

    /// Underlying persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Misuse of the API; a programmer error, not a chain condition.
    #[error("invalid use of the chain engine: {0}")]
    Argument(String),
}

impl ChainError {
    pub fn verification(hash: Hash, reason: impl Into<String>) -> Self {
        ChainError::Verification { hash, reason: reason.into() }
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, ChainError::Verification { .. })
    }
}
