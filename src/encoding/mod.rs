//! # Encoding Module
//!
//! Byte-level encoding primitives shared by the page codec: variable-length
//! integers for counts, identifiers, and lengths. The page codec composes
//! these into full page bodies; nothing in this module knows about pages.

pub mod varint;

pub use varint::{get_varint, put_varint, put_zigzag, get_zigzag, varint_len};
