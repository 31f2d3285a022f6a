//! The Murmur3 hash family used by consensus Bloom filters.
//!
//! Hash function `i` of a filter is MurmurHash3 (x86, 32-bit) seeded with
//! `i * 0xFBA4C795 + tweak`, reduced modulo the filter's bit count. The
//! multiplier decorrelates the functions; the per-filter tweak keeps
//! remote peers from precomputing collisions.

use std::io::Cursor;

const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// Bit index selected by hash function `index` for `data`.
pub fn bit_index(index: u32, tweak: u32, data: &[u8], bit_count: usize) -> usize {
    let seed = index.wrapping_mul(SEED_MULTIPLIER).wrapping_add(tweak);
    // Reading from an in-memory cursor cannot fail.
    let hash = murmur3::murmur3_32(&mut Cursor::new(data), seed).unwrap_or(0);
    (hash as usize) % bit_count
}
