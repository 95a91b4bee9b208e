// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first.
// Each byte has bit 7 set except the final byte.
// Identical to xdelta3's `xd3_read_size`, with an explicit length bound so
// a run of continuation bytes can never keep the reader spinning.

use std::io::{self, Read};

use thiserror::Error;

use super::decoder::DecodeError;

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// Overflow guard for the 64-bit accumulator: if these bits are set before a
/// shift, the next `<< 7` would overflow.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarIntError {
    /// Input ended (or the length bound was hit) before a byte with bit 7 clear.
    #[error("variable-length integer never terminates")]
    Unterminated,
    /// Value does not fit in 64 bits.
    #[error("variable-length integer overflows 64 bits")]
    Overflow,
}

/// Fold one encoded byte into the accumulator.
///
/// Returns `Ok(true)` when `byte` terminates the integer.
#[inline]
fn accumulate(val: &mut u64, byte: u8) -> Result<bool, VarIntError> {
    if *val & U64_OVERFLOW_MASK != 0 {
        return Err(VarIntError::Overflow);
    }
    *val = (*val << 7) | u64::from(byte & 0x7F);
    Ok(byte & 0x80 == 0)
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a `u64` from the front of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        if accumulate(&mut val, byte)? {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Unterminated)
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (streaming)
// ---------------------------------------------------------------------------

/// Read a `u64` varint from a sequential stream.
///
/// End of input before the first byte is reported as I/O `UnexpectedEof`
/// (truncated file); end of input after a continuation byte is a format
/// error, the same as a never-terminating integer.
pub fn stream_read_u64<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    let mut val: u64 = 0;
    let mut buf = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        match r.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if i > 0 && e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(VarIntError::Unterminated.into());
            }
            Err(e) => return Err(e.into()),
        }
        if accumulate(&mut val, buf[0])? {
            return Ok(val);
        }
    }
    Err(VarIntError::Unterminated.into())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return the encoded byte-length of a `u64` value.
/// Matches xdelta3 `xd3_sizeof_uint64_t`.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
