//! # Encoding Module
//!
//! Binary encoding helpers shared by the document log and the hash table.
//!
//! - **Varint encoding**: unsigned LEB128 in fixed-width slots for document
//!   room, hash keys, hash values and chain pointers

pub mod varint;

pub use varint::{decode_varint, encode_varint, read_varint, varint_len, write_varint_slot};
