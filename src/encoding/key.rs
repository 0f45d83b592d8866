//! # Byte-Comparable Value Encoding
//!
//! Encoded keys compare with a single `memcmp`: for any two rows of the
//! same schema, the encoded primary keys order exactly like the logical
//! values. This is what lets typed tables share one B+ tree.
//!
//! ## Integers
//!
//! Signed 64-bit integers are written big-endian with the sign bit
//! flipped (logical value plus 2^63):
//!
//! ```text
//! -2        -> 0x7FFF_FFFF_FFFF_FFFE
//! -1        -> 0x7FFF_FFFF_FFFF_FFFF
//!  0        -> 0x8000_0000_0000_0000
//!  1        -> 0x8000_0000_0000_0001
//! ```
//!
//! so unsigned byte order equals signed numeric order.
//!
//! ## Byte Strings
//!
//! Strings are null-terminated, so shorter strings sort before their
//! extensions. Embedded low bytes are escaped to keep the terminator
//! unambiguous without breaking relative order:
//!
//! ```text
//! 0x00 -> 0x01 0x01
//! 0x01 -> 0x01 0x02
//! ```
//!
//! ## Keys
//!
//! A primary key is the 4-byte big-endian table prefix followed by the
//! encoded key columns, which keeps each table's rows in their own
//! contiguous key range.

use eyre::{bail, ensure, Result};

use crate::records::{Value, ValueType};

/// Escapes 0x00 and 0x01 so the encoded string contains no terminator
/// byte. Returns the input unchanged when nothing needs escaping.
pub fn escape_bytes(input: &[u8]) -> Vec<u8> {
    let escapes = input.iter().filter(|&&b| b <= 1).count();
    if escapes == 0 {
        return input.to_vec();
    }
    let mut out = Vec::with_capacity(input.len() + escapes);
    for &b in input {
        if b <= 1 {
            out.push(0x01);
            out.push(b + 1);
        } else {
            out.push(b);
        }
    }
    out
}

/// Inverts [`escape_bytes`].
pub fn unescape_bytes(input: &[u8]) -> Result<Vec<u8>> {
    if !input.contains(&1) {
        return Ok(input.to_vec());
    }
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == 0x01 {
            i += 1;
            ensure!(
                i < input.len() && input[i] >= 1,
                "truncated escape sequence"
            );
            out.push(input[i] - 1);
        } else {
            out.push(input[i]);
        }
        i += 1;
    }
    Ok(out)
}

/// Appends the order-preserving encoding of `vals` to `out`.
pub fn encode_values(out: &mut Vec<u8>, vals: &[Value]) {
    for val in vals {
        match val {
            Value::Int64(v) => {
                let shifted = (*v as u64).wrapping_add(1 << 63);
                out.extend_from_slice(&shifted.to_be_bytes());
            }
            Value::Bytes(b) => {
                out.extend_from_slice(&escape_bytes(b));
                out.push(0); // terminator
            }
        }
    }
}

/// Encodes a primary key: table prefix, then the key columns.
pub fn encode_key(prefix: u32, vals: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&prefix.to_be_bytes());
    encode_values(&mut out, vals);
    out
}

/// Decodes a value list of known types, consuming the entire input.
pub fn decode_values(input: &[u8], types: &[ValueType]) -> Result<Vec<Value>> {
    let mut input = input;
    let mut out = Vec::with_capacity(types.len());
    for &ty in types {
        match ty {
            ValueType::Int64 => {
                ensure!(input.len() >= 8, "truncated integer value");
                let raw = u64::from_be_bytes(input[..8].try_into().unwrap());
                out.push(Value::Int64(raw.wrapping_sub(1 << 63) as i64));
                input = &input[8..];
            }
            ValueType::Bytes => {
                let Some(end) = input.iter().position(|&b| b == 0) else {
                    bail!("unterminated byte-string value");
                };
                out.push(Value::Bytes(unescape_bytes(&input[..end])?));
                input = &input[end + 1..];
            }
        }
    }
    ensure!(input.is_empty(), "trailing bytes after the last value");
    Ok(out)
}
