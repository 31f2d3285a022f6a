//! Compact difficulty-target ("nBits") codec and per-header work.
//!
//! A compact target packs a 256-bit threshold into 32 bits as a base-256
//! floating point number: one exponent byte followed by a three-byte
//! mantissa. `value = mantissa * 256^(exponent - 3)`. Bit 23 of the
//! mantissa is a sign bit; a negative or overflowing target is invalid.

use primitive_types::U256;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("compact target {bits:#010x} is negative")]
    Negative { bits: u32 },

    #[error("compact target {bits:#010x} overflows 256 bits")]
    Overflow { bits: u32 },
}

/// Decode a compact target into its 256-bit threshold value.
pub fn compact_to_target(bits: u32) -> Result<U256, TargetError> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return Err(TargetError::Negative { bits });
    }

    if exponent <= 3 {
        return Ok(U256::from(mantissa >> (8 * (3 - exponent))));
    }

    // Overflow when the mantissa's top byte would shift past bit 255.
    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));
    if overflow {
        return Err(TargetError::Overflow { bits });
    }

    Ok(U256::from(mantissa) << (8 * (exponent - 3)))
}

/// Encode a 256-bit threshold into its canonical compact form.
///
/// This is lossy: the mantissa keeps only the top three bytes of the
/// value. Comparing two targets at compact precision means comparing
/// `target_to_compact` of both.
pub fn target_to_compact(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    // If the top mantissa bit is set the number would read as negative;
    // shift the mantissa down and bump the exponent.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// The expected amount of hashing a header with the given target
/// represents: `2^256 / (target + 1)`.
pub fn work_for_target(target: U256) -> U256 {
    if target == U256::MAX {
        return U256::one();
    }
    // floor((2^256 - (t+1)) / (t+1)) + 1 == floor(2^256 / (t+1)), avoiding
    // 512-bit arithmetic.
    (!target / (target + U256::one())) + U256::one()
}

/// Work for a compact-encoded target. Invalid encodings count as no work.
pub fn work_for_bits(bits: u32) -> Result<U256, TargetError> {
    compact_to_target(bits).map(work_for_target)
}
