//! # Order-Preserving Encoding
//!
//! Byte-comparable serialization for primary keys and row payloads.

mod key;

pub use key::{decode_values, encode_key, encode_values, escape_bytes, unescape_bytes};
