//! Filtered blocks: a header plus a partial Merkle tree proving which
//! transaction hashes in the block matched a remote Bloom filter.
//!
//! The partial tree is a depth-first serialization. One flag bit per
//! visited node says whether the node is an ancestor of a match; hashes
//! are included for leaves and for subtrees that contain no match.
//! Traversal reconstructs the Merkle root and the list of matched leaves.

use serde::{Deserialize, Serialize};

use crate::entities::{Block, BlockHeader, Hash, Transaction};
use crate::hashing::double_sha256_pair;
use crate::wire::{self, Reader, WireError};

/// A connected subset of a block's Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMerkleTree {
    /// Number of transactions in the full block.
    pub total_transactions: u32,
    /// Node hashes in depth-first order.
    pub hashes: Vec<Hash>,
    /// Flag bits in depth-first order, least-significant bit first within
    /// each byte.
    pub bits: Vec<u8>,
}

/// Upper bound on the transaction count of a block we will traverse.
const MAX_TOTAL_TRANSACTIONS: u32 = 1_000_000;

struct Cursor {
    bit: usize,
    hash: usize,
}

impl PartialMerkleTree {
    /// Build the partial tree for a block whose transaction hashes are
    /// `txids`, marking the leaves where `matched` is true.
    pub fn from_txids(txids: &[Hash], matched: &[bool]) -> Self {
        assert_eq!(txids.len(), matched.len(), "one match flag per txid");
        let total = txids.len() as u32;
        let mut height = 0;
        while tree_width(total, height) > 1 {
            height += 1;
        }
        let mut tree = PartialMerkleTree {
            total_transactions: total,
            hashes: Vec::new(),
            bits: Vec::new(),
        };
        let mut bit_count = 0usize;
        tree.build(height, 0, txids, matched, &mut bit_count);
        tree
    }

    fn build(
        &mut self,
        height: u32,
        pos: u32,
        txids: &[Hash],
        matched: &[bool],
        bit_count: &mut usize,
    ) {
        let first_leaf = (pos << height) as usize;
        let last_leaf = (((pos + 1) << height) as usize).min(txids.len());
        let parent_of_match = matched[first_leaf..last_leaf].iter().any(|&m| m);

        if self.bits.len() * 8 == *bit_count {
            self.bits.push(0);
        }
        if parent_of_match {
            self.bits[*bit_count / 8] |= 1 << (*bit_count % 8);
        }
        *bit_count += 1;

        if height == 0 || !parent_of_match {
            self.hashes.push(self.node_hash(height, pos, txids));
        } else {
            self.build(height - 1, pos * 2, txids, matched, bit_count);
            if pos * 2 + 1 < tree_width(self.total_transactions, height - 1) {
                self.build(height - 1, pos * 2 + 1, txids, matched, bit_count);
            }
        }
    }

    fn node_hash(&self, height: u32, pos: u32, txids: &[Hash]) -> Hash {
        if height == 0 {
            return txids[pos as usize];
        }
        let left = self.node_hash(height - 1, pos * 2, txids);
        let right = if pos * 2 + 1 < tree_width(self.total_transactions, height - 1) {
            self.node_hash(height - 1, pos * 2 + 1, txids)
        } else {
            left
        };
        double_sha256_pair(&left, &right)
    }

    /// Traverse the tree, returning the reconstructed Merkle root and the
    /// matched transaction hashes in block order.
    ///
    /// Rejects malformed trees: unconsumed hashes or flag bits, non-zero
    /// padding, out-of-range counts, and the duplicated-subtree trick.
    pub fn extract_matches(&self) -> Result<(Hash, Vec<Hash>), WireError> {
        if self.total_transactions == 0 {
            return Err(WireError::BadPartialTree("tree has no transactions"));
        }
        if self.total_transactions > MAX_TOTAL_TRANSACTIONS {
            return Err(WireError::BadPartialTree("transaction count out of range"));
        }
        if self.hashes.len() > self.total_transactions as usize {
            return Err(WireError::BadPartialTree("more hashes than transactions"));
        }
        if self.bits.len() * 8 < self.hashes.len() {
            return Err(WireError::BadPartialTree("fewer flag bits than hashes"));
        }

        let mut height = 0;
        while tree_width(self.total_transactions, height) > 1 {
            height += 1;
        }

        let mut cursor = Cursor { bit: 0, hash: 0 };
        let mut matched = Vec::new();
        let root = self.traverse(height, 0, &mut cursor, &mut matched)?;

        if cursor.hash != self.hashes.len() {
            return Err(WireError::BadPartialTree("unconsumed hashes"));
        }
        if (cursor.bit + 7) / 8 != self.bits.len() {
            return Err(WireError::BadPartialTree("unconsumed flag bytes"));
        }
        for bit in cursor.bit..self.bits.len() * 8 {
            if self.bits[bit / 8] >> (bit % 8) & 1 != 0 {
                return Err(WireError::BadPartialTree("non-zero padding bits"));
            }
        }
        Ok((root, matched))
    }

    fn traverse(
        &self,
        height: u32,
        pos: u32,
        cursor: &mut Cursor,
        matched: &mut Vec<Hash>,
    ) -> Result<Hash, WireError> {
        if cursor.bit >= self.bits.len() * 8 {
            return Err(WireError::BadPartialTree("overflowed the flag bits"));
        }
        let parent_of_match = self.bits[cursor.bit / 8] >> (cursor.bit % 8) & 1 != 0;
        cursor.bit += 1;

        if height == 0 || !parent_of_match {
            let hash = *self
                .hashes
                .get(cursor.hash)
                .ok_or(WireError::BadPartialTree("overflowed the hash list"))?;
            cursor.hash += 1;
            if height == 0 && parent_of_match {
                matched.push(hash);
            }
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2, cursor, matched)?;
        let right = if pos * 2 + 1 < tree_width(self.total_transactions, height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1, cursor, matched)?;
            if right == left {
                // A duplicated right subtree can forge alternate trees
                // with the same root.
                return Err(WireError::BadPartialTree("duplicate subtree hashes"));
            }
            right
        } else {
            left
        };
        Ok(double_sha256_pair(&left, &right))
    }
}

/// Number of nodes at the given height of a tree over `total` leaves.
fn tree_width(total: u32, height: u32) -> u32 {
    (total + (1 << height) - 1) >> height
}

/// A block received through a Bloom filter: the header, the matched-hash
/// proof, and whichever matched transactions the network layer attached.
///
/// The transaction list may be shorter than the matched-hash set; a
/// transaction already seen in loose broadcast is not re-sent with the
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredBlock {
    pub header: BlockHeader,
    pub partial_tree: PartialMerkleTree,
    pub transactions: Vec<Transaction>,
}

impl FilteredBlock {
    pub fn new(
        header: BlockHeader,
        partial_tree: PartialMerkleTree,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self { header, partial_tree, transactions }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The header as a transaction-less block.
    pub fn header_block(&self) -> Block {
        Block::from_header(self.header.clone())
    }

    /// Extract the matched transaction hashes, verifying the partial tree
    /// against the header's Merkle root.
    pub fn transaction_hashes(&self) -> Result<Vec<Hash>, WireError> {
        let (root, matched) = self.partial_tree.extract_matches()?;
        if root != self.header.merkle_root {
            return Err(WireError::BadPartialTree("root does not match the header"));
        }
        Ok(matched)
    }

    /// Encode the wire payload: header ‖ total-tx-count ‖ hashes ‖ flag
    /// bits. Attached transactions travel as separate messages.
    pub fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        out.extend_from_slice(&wire::encode_header(&self.header)?);
        out.extend_from_slice(&self.partial_tree.total_transactions.to_le_bytes());
        wire::write_varint(&mut out, self.partial_tree.hashes.len() as u64);
        for hash in &self.partial_tree.hashes {
            out.extend_from_slice(hash);
        }
        wire::write_varint(&mut out, self.partial_tree.bits.len() as u64);
        out.extend_from_slice(&self.partial_tree.bits);
        Ok(out)
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(payload);
        let header = wire::decode_header(&mut reader)?;
        let total_transactions = reader.read_u32()?;

        let hash_count = reader.read_length()?;
        let mut hashes = Vec::with_capacity(hash_count.min(1024));
        for _ in 0..hash_count {
            hashes.push(reader.read_hash()?);
        }

        let flag_len = reader.read_length()?;
        let bits = reader.read_bytes(flag_len)?;
        reader.expect_end()?;

        Ok(Self {
            header,
            partial_tree: PartialMerkleTree { total_transactions, hashes, bits },
            transactions: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ZERO_HASH;
    use crate::merkle::merkle_root;

    fn txids(n: usize) -> Vec<Hash> {
        (0..n)
            .map(|i| {
                let mut h = [0u8; 32];
                h[0] = i as u8;
                h[1] = 0xC0;
                h
            })
            .collect()
    }

    #[test]
    fn test_round_trip_various_shapes() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let ids = txids(n);
            for matched_index in 0..n {
                let mut matched = vec![false; n];
                matched[matched_index] = true;

                let tree = PartialMerkleTree::from_txids(&ids, &matched);
                let (root, found) = tree.extract_matches().unwrap();

                assert_eq!(Some(root), merkle_root(&ids), "n={n}");
                assert_eq!(found, vec![ids[matched_index]], "n={n}");
            }
        }
    }

    #[test]
    fn test_no_matches_still_proves_root() {
        let ids = txids(7);
        let tree = PartialMerkleTree::from_txids(&ids, &vec![false; 7]);
        let (root, found) = tree.extract_matches().unwrap();
        assert_eq!(Some(root), merkle_root(&ids));
        assert!(found.is_empty());
    }

    #[test]
    fn test_all_matched_returns_block_order() {
        let ids = txids(4);
        let tree = PartialMerkleTree::from_txids(&ids, &[true; 4]);
        let (_, found) = tree.extract_matches().unwrap();
        assert_eq!(found, ids);
    }

    #[test]
    fn test_empty_tree_rejected() {
        let tree = PartialMerkleTree { total_transactions: 0, hashes: vec![], bits: vec![] };
        assert!(tree.extract_matches().is_err());
    }

    #[test]
    fn test_tampered_padding_rejected() {
        let ids = txids(3);
        let mut tree = PartialMerkleTree::from_txids(&ids, &[true, false, false]);
        let last = tree.bits.len() - 1;
        tree.bits[last] |= 0x80;
        assert_eq!(
            tree.extract_matches(),
            Err(WireError::BadPartialTree("non-zero padding bits"))
        );
    }

    #[test]
    fn test_filtered_block_payload_round_trip() {
        let ids = txids(5);
        let tree = PartialMerkleTree::from_txids(&ids, &[false, true, false, false, true]);
        let header = BlockHeader {
            version: 1,
            prev_hash: ZERO_HASH,
            merkle_root: merkle_root(&ids).unwrap(),
            timestamp: 1_000,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        let block = FilteredBlock::new(header, tree, Vec::new());

        let payload = block.encode_payload().unwrap();
        let decoded = FilteredBlock::decode_payload(&payload).unwrap();
        assert_eq!(decoded.partial_tree, block.partial_tree);
        assert_eq!(decoded.header, block.header);

        assert_eq!(decoded.transaction_hashes().unwrap(), vec![ids[1], ids[4]]);
    }

    #[test]
    fn test_root_mismatch_rejected() {
        let ids = txids(2);
        let tree = PartialMerkleTree::from_txids(&ids, &[true, false]);
        let header = BlockHeader {
            version: 1,
            prev_hash: ZERO_HASH,
            merkle_root: [0xEE; 32],
            timestamp: 1_000,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        let block = FilteredBlock::new(header, tree, Vec::new());
        assert!(block.transaction_hashes().is_err());
    }
}
