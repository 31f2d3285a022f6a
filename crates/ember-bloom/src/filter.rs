//! Core Bloom filter implementation.
//!
//! No false negatives: once inserted, `contains` always reports true.
//! False positives occur at a configurable rate.

use bitvec::prelude::*;

use ember_types::wire::{write_varint, Reader};

use crate::error::FilterError;
use crate::hashing::bit_index;

/// Largest filter a peer will accept, in bytes. A filter of 20,000 items
/// at a 0.1% false-positive rate fits just under this.
pub const MAX_FILTER_SIZE: usize = 36_000;

/// More hash functions than this buy nothing at the size cap above.
pub const MAX_HASH_FUNCS: u32 = 50;

/// Controls when the remote peer auto-inserts outpoints of matched
/// transactions back into the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Never update the filter.
    None,
    /// Insert the outpoint of every matched output.
    All,
    /// Insert outpoints only for pay-to-pubkey / multisig outputs.
    #[default]
    P2PubkeyOnly,
}

impl UpdatePolicy {
    fn to_byte(self) -> u8 {
        match self {
            UpdatePolicy::None => 0,
            UpdatePolicy::All => 1,
            UpdatePolicy::P2PubkeyOnly => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, FilterError> {
        match byte {
            0 => Ok(UpdatePolicy::None),
            1 => Ok(UpdatePolicy::All),
            2 => Ok(UpdatePolicy::P2PubkeyOnly),
            other => Err(FilterError::UnknownUpdatePolicy(other)),
        }
    }
}

/// A Bloom filter: a bit array probed by `k` tweaked Murmur3 functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    hash_funcs: u32,
    tweak: u32,
    policy: UpdatePolicy,
}

impl BloomFilter {
    /// Construct a filter sized for `elements` insertions at roughly the
    /// given false-positive rate.
    ///
    /// Size and hash-function count come from the textbook formulas,
    /// clamped to the protocol maxima; a filter that would round to zero
    /// size or zero hash functions is clamped up to the minimum instead.
    pub fn new(
        elements: usize,
        false_positive_rate: f64,
        tweak: u32,
        policy: UpdatePolicy,
    ) -> Result<Self, FilterError> {
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(FilterError::InvalidRate { fpr: false_positive_rate });
        }
        let n = elements.max(1) as f64;

        let ideal_bits = -1.0 / (std::f64::consts::LN_2.powi(2)) * n * false_positive_rate.ln();
        let size_bytes = ((ideal_bits as usize) / 8)
            .clamp(1, MAX_FILTER_SIZE);

        let ideal_k = (size_bytes * 8) as f64 / n * std::f64::consts::LN_2;
        let hash_funcs = (ideal_k as u32).clamp(1, MAX_HASH_FUNCS);

        Ok(Self {
            bits: bitvec![u8, Lsb0; 0; size_bytes * 8],
            hash_funcs,
            tweak,
            policy,
        })
    }

    /// Size of the bit array in bytes.
    pub fn size(&self) -> usize {
        self.bits.len() / 8
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    /// Insert arbitrary bytes into the filter.
    pub fn insert(&mut self, data: &[u8]) {
        for i in 0..self.hash_funcs {
            let index = bit_index(i, self.tweak, data, self.bits.len());
            self.bits.set(index, true);
        }
    }

    /// Whether the bytes match the filter: either inserted, or a false
    /// positive.
    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs)
            .all(|i| self.bits[bit_index(i, self.tweak, data, self.bits.len())])
    }

    /// OR another filter into this one.
    ///
    /// Both filters must have the same size, hash-function count and
    /// tweak, otherwise their bit positions are unrelated.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<(), FilterError> {
        if self.size() != other.size()
            || self.hash_funcs != other.hash_funcs
            || self.tweak != other.tweak
        {
            return Err(FilterError::IncompatibleFilters {
                our_size: self.size(),
                their_size: other.size(),
                our_k: self.hash_funcs,
                their_k: other.hash_funcs,
                our_tweak: self.tweak,
                their_tweak: other.tweak,
            });
        }
        for (ours, theirs) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *ours |= *theirs;
        }
        Ok(())
    }

    /// Theoretical false-positive rate once `elements` items have been
    /// inserted: `(1 - e^(-kn/m))^k`.
    pub fn false_positive_rate(&self, elements: usize) -> f64 {
        let k = f64::from(self.hash_funcs);
        let exponent = -k * elements as f64 / self.bits.len() as f64;
        (1.0 - exponent.exp()).powf(k)
    }

    /// Wire form: varint-prefixed bit array ‖ hash-function count (u32 LE)
    /// ‖ tweak (u32 LE) ‖ update-policy byte.
    pub fn encode_payload(&self) -> Vec<u8> {
        let data = self.bits.as_raw_slice();
        let mut out = Vec::with_capacity(data.len() + 12);
        write_varint(&mut out, data.len() as u64);
        out.extend_from_slice(data);
        out.extend_from_slice(&self.hash_funcs.to_le_bytes());
        out.extend_from_slice(&self.tweak.to_le_bytes());
        out.push(self.policy.to_byte());
        out
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, FilterError> {
        let mut reader = Reader::new(payload);

        let len = reader.read_varint().map_err(|_| FilterError::Truncated)? as usize;
        if len > MAX_FILTER_SIZE {
            return Err(FilterError::FilterTooLarge { size: len, max: MAX_FILTER_SIZE });
        }
        let data = reader.read_bytes(len).map_err(|_| FilterError::Truncated)?;

        let hash_funcs = reader.read_u32().map_err(|_| FilterError::Truncated)?;
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(FilterError::TooManyHashFuncs { count: hash_funcs, max: MAX_HASH_FUNCS });
        }

        let tweak = reader.read_u32().map_err(|_| FilterError::Truncated)?;
        let policy = UpdatePolicy::from_byte(reader.read_u8().map_err(|_| FilterError::Truncated)?)?;

        if reader.remaining() != 0 {
            return Err(FilterError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            bits: BitVec::from_vec(data),
            hash_funcs,
            tweak,
            policy,
        })
    }
}
