//! Prefix-length varint codec.
//!
//! Unsigned integers are written in the SQLite4 varint layout: the first byte
//! selects the encoding band and the number of trailing bytes. The band
//! boundaries are part of the wire format and must match byte-for-byte on
//! every peer.
//!
//! ```text
//! first byte   value range                 total bytes
//! 0..=240      first byte itself           1
//! 241..=248    240 + 256*(A0-241) + A1     2
//! 249          2288 + 256*A1 + A2          3
//! 250          A1..A3 big-endian           4
//! 251          A1..A4 big-endian           5
//! 252          A1..A5 big-endian           6
//! 253          A1..A6 big-endian           7
//! 254          A1..A7 big-endian           8
//! 255          A1..A8 big-endian           9
//! ```

use bytes::BufMut;

use crate::error::WireError;

/// The longest possible encoding, in bytes.
pub const MAX_VARINT_LEN: usize = 9;

/// Largest value stored in a single byte.
const ONE_BYTE_MAX: u64 = 240;

/// Largest value stored in the two-byte band.
const TWO_BYTE_MAX: u64 = 2287;

/// Largest value stored in the three-byte band.
const THREE_BYTE_MAX: u64 = 67823;

/// First-byte marker of the three-byte band.
const THREE_BYTE_MARKER: u8 = 249;

/// Added to the tail length to form the first byte of the big-endian bands.
const TAIL_MARKER_BASE: u8 = 247;

/// Returns the number of bytes [`write_varint`] produces for `value`.
#[must_use]
pub const fn encoded_len(value: u64) -> usize {
    match value {
        0..=ONE_BYTE_MAX => 1,
        241..=TWO_BYTE_MAX => 2,
        2288..=THREE_BYTE_MAX => 3,
        _ => 1 + tail_len(value),
    }
}

/// Number of big-endian tail bytes needed for values above the three-byte band.
const fn tail_len(value: u64) -> usize {
    let significant = (u64::BITS - value.leading_zeros()) as usize;
    let bytes = significant.div_ceil(8);
    if bytes < 3 { 3 } else { bytes }
}

/// Append the varint encoding of `value` to `buf`.
pub fn write_varint<B: BufMut>(buf: &mut B, value: u64) {
    match value {
        0..=ONE_BYTE_MAX => buf.put_u8(value as u8),
        241..=TWO_BYTE_MAX => {
            let rest = value - 240;
            buf.put_u8((rest / 256 + 241) as u8);
            buf.put_u8((rest % 256) as u8);
        }
        2288..=THREE_BYTE_MAX => {
            let rest = value - 2288;
            buf.put_u8(THREE_BYTE_MARKER);
            buf.put_u8((rest / 256) as u8);
            buf.put_u8((rest % 256) as u8);
        }
        _ => {
            let tail = tail_len(value);
            buf.put_u8(TAIL_MARKER_BASE + tail as u8);
            buf.put_uint(value, tail);
        }
    }
}

/// Encode `value` into a freshly allocated byte vector.
#[must_use]
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    write_varint(&mut out, value);
    out
}

/// Decode a varint starting at `offset` in `bytes`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] if the first byte announces more trailing
/// bytes than the buffer holds, or if `offset` is at or past the end.
pub fn decode_varint(bytes: &[u8], offset: usize) -> Result<(u64, usize), WireError> {
    let input = bytes.get(offset..).unwrap_or_default();
    let Some(&first) = input.first() else {
        return Err(WireError::Truncated {
            needed: 1,
            remaining: 0,
        });
    };

    let needed = match first {
        0..=240 => 1,
        241..=248 => 2,
        THREE_BYTE_MARKER => 3,
        _ => 1 + usize::from(first - TAIL_MARKER_BASE),
    };
    if input.len() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: input.len(),
        });
    }

    let value = match first {
        0..=240 => u64::from(first),
        241..=248 => 240 + 256 * u64::from(first - 241) + u64::from(input[1]),
        THREE_BYTE_MARKER => 2288 + 256 * u64::from(input[1]) + u64::from(input[2]),
        _ => input[1..needed]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
    };
    Ok((value, needed))
}
