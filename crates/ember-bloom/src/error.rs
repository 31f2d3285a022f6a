//! Error types for the Bloom filter crate.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Merging requires identical size, hash-function count and tweak.
    #[error("filters are incompatible: size {our_size}/{their_size}, k {our_k}/{their_k}, tweak {our_tweak:#x}/{their_tweak:#x}")]
    IncompatibleFilters {
        our_size: usize,
        their_size: usize,
        our_k: u32,
        their_k: u32,
        our_tweak: u32,
        their_tweak: u32,
    },

    #[error("filter size {size} bytes exceeds maximum {max}")]
    FilterTooLarge { size: usize, max: usize },

    #[error("hash function count {count} exceeds maximum {max}")]
    TooManyHashFuncs { count: u32, max: u32 },

    #[error("false positive rate {fpr} is not in (0, 1)")]
    InvalidRate { fpr: f64 },

    #[error("unknown update policy byte {0:#04x}")]
    UnknownUpdatePolicy(u8),

    #[error("filter payload truncated")]
    Truncated,

    #[error("filter payload has {0} trailing bytes")]
    TrailingBytes(usize),
}
