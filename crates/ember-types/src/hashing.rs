//! Double-SHA-256, the hash family used for block, transaction and Merkle
//! identities.

use sha2::{Digest, Sha256};

use crate::entities::Hash;

/// `SHA256(SHA256(data))`.
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Double-SHA-256 over the concatenation of two hashes, the inner node
/// combinator of the Merkle tree.
pub fn double_sha256_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let first = hasher.finalize();
    Sha256::digest(first).into()
}
