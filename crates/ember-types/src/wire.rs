//! Little-endian consensus wire codecs.
//!
//! Formats:
//! - header (80 bytes): version (4) ‖ prev-hash (32) ‖ merkle-root (32) ‖
//!   timestamp (4) ‖ compact target (4) ‖ nonce (4)
//! - var-int: `< 0xfd` one byte; `0xfd` + u16; `0xfe` + u32; `0xff` + u64
//! - transaction: version ‖ varint(inputs) ‖ inputs ‖ varint(outputs) ‖
//!   outputs ‖ lock-time

use thiserror::Error;

use crate::entities::{Block, BlockHeader, Hash, OutPoint, Transaction, TxInput, TxOutput};

/// Wire size of a block header.
pub const HEADER_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload truncated: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("var-int is not minimally encoded")]
    NonMinimalVarInt,

    #[error("length {len} exceeds sanity limit {max}")]
    OversizedLength { len: u64, max: u64 },

    #[error("timestamp {0} does not fit the 32-bit wire field")]
    TimestampRange(u64),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("invalid partial merkle tree: {0}")]
    BadPartialTree(&'static str),
}

/// Upper bound on decoded collection lengths, against memory-exhaustion
/// payloads.
const MAX_VEC_LEN: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Byte-slice reader used by all decoders in this crate.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_hash(&mut self) -> Result<Hash, WireError> {
        let b = self.take(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(b);
        Ok(hash)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, WireError> {
        Ok(self.take(n)?.to_vec())
    }

    /// Decode a var-int, rejecting non-minimal encodings.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let first = self.read_u8()?;
        let value = match first {
            0xfd => {
                let v = u64::from(self.read_u16()?);
                if v < 0xfd {
                    return Err(WireError::NonMinimalVarInt);
                }
                v
            }
            0xfe => {
                let v = u64::from(self.read_u32()?);
                if v <= u64::from(u16::MAX) {
                    return Err(WireError::NonMinimalVarInt);
                }
                v
            }
            0xff => {
                let v = self.read_u64()?;
                if v <= u64::from(u32::MAX) {
                    return Err(WireError::NonMinimalVarInt);
                }
                v
            }
            small => u64::from(small),
        };
        Ok(value)
    }

    /// A var-int used as a collection length, bounded by `MAX_VEC_LEN`.
    pub fn read_length(&mut self) -> Result<usize, WireError> {
        let len = self.read_varint()?;
        if len > MAX_VEC_LEN {
            return Err(WireError::OversizedLength { len, max: MAX_VEC_LEN });
        }
        Ok(len as usize)
    }

    pub fn expect_end(&self) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}

pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Encode a header into an exact 80-byte buffer. Timestamps beyond 32 bits
/// cannot occur on the wire; such a header is truncated here and rejected
/// by [`encode_header`].
pub fn encode_header_into(header: &BlockHeader, buf: &mut [u8; HEADER_LEN]) {
    buf[0..4].copy_from_slice(&header.version.to_le_bytes());
    buf[4..36].copy_from_slice(&header.prev_hash);
    buf[36..68].copy_from_slice(&header.merkle_root);
    buf[68..72].copy_from_slice(&(header.timestamp as u32).to_le_bytes());
    buf[72..76].copy_from_slice(&header.bits.to_le_bytes());
    buf[76..80].copy_from_slice(&header.nonce.to_le_bytes());
}

pub fn encode_header(header: &BlockHeader) -> Result<[u8; HEADER_LEN], WireError> {
    if header.timestamp > u64::from(u32::MAX) {
        return Err(WireError::TimestampRange(header.timestamp));
    }
    let mut buf = [0u8; HEADER_LEN];
    encode_header_into(header, &mut buf);
    Ok(buf)
}

pub fn decode_header(reader: &mut Reader<'_>) -> Result<BlockHeader, WireError> {
    Ok(BlockHeader {
        version: reader.read_u32()?,
        prev_hash: reader.read_hash()?,
        merkle_root: reader.read_hash()?,
        timestamp: u64::from(reader.read_u32()?),
        bits: reader.read_u32()?,
        nonce: reader.read_u32()?,
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + 64 * tx.inputs.len() + 40 * tx.outputs.len());
    out.extend_from_slice(&tx.version.to_le_bytes());
    write_varint(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        out.extend_from_slice(&input.outpoint.txid);
        out.extend_from_slice(&input.outpoint.index.to_le_bytes());
        write_varint(&mut out, input.script_sig.len() as u64);
        out.extend_from_slice(&input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_varint(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_varint(&mut out, output.script_pubkey.len() as u64);
        out.extend_from_slice(&output.script_pubkey);
    }
    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

pub fn decode_transaction(reader: &mut Reader<'_>) -> Result<Transaction, WireError> {
    let version = reader.read_u32()?;

    let input_count = reader.read_length()?;
    let mut inputs = Vec::with_capacity(input_count.min(1024));
    for _ in 0..input_count {
        let txid = reader.read_hash()?;
        let index = reader.read_u32()?;
        let script_len = reader.read_length()?;
        let script_sig = reader.read_bytes(script_len)?;
        let sequence = reader.read_u32()?;
        inputs.push(TxInput { outpoint: OutPoint { txid, index }, script_sig, sequence });
    }

    let output_count = reader.read_length()?;
    let mut outputs = Vec::with_capacity(output_count.min(1024));
    for _ in 0..output_count {
        let value = reader.read_u64()?;
        let script_len = reader.read_length()?;
        let script_pubkey = reader.read_bytes(script_len)?;
        outputs.push(TxOutput { value, script_pubkey });
    }

    let lock_time = reader.read_u32()?;
    Ok(Transaction { version, inputs, outputs, lock_time })
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Encode a full block: header followed by varint-prefixed transactions.
/// Header-only blocks encode as just the 80 header bytes.
pub fn encode_block(block: &Block) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.extend_from_slice(&encode_header(&block.header)?);
    if let Some(txns) = &block.transactions {
        write_varint(&mut out, txns.len() as u64);
        for tx in txns {
            out.extend_from_slice(&encode_transaction(tx));
        }
    }
    Ok(out)
}

/// Decode a block. An 80-byte payload is a header-only block.
pub fn decode_block(payload: &[u8]) -> Result<Block, WireError> {
    let mut reader = Reader::new(payload);
    let header = decode_header(&mut reader)?;
    if reader.remaining() == 0 {
        return Ok(Block { header, transactions: None });
    }
    let count = reader.read_length()?;
    let mut txns = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        txns.push(decode_transaction(&mut reader)?);
    }
    reader.expect_end()?;
    Ok(Block { header, transactions: Some(txns) })
}
