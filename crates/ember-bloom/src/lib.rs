//! # Ember Bloom - Probabilistic Relevance Filters
//!
//! A Bloom filter a light client sends to a peer so the peer can withhold
//! transactions that are not relevant to the client's keys. False
//! positives are possible (and are a privacy feature; the rate is
//! tunable); false negatives are not.
//!
//! The chain engine consumes these filters only to interpret
//! filtered-block payloads; construction from wallet keys is the client's
//! concern.

pub mod error;
pub mod filter;
pub mod hashing;

pub use error::FilterError;
pub use filter::{BloomFilter, UpdatePolicy};
