//! # Variable-Length Integer Encoding
//!
//! Unsigned LEB128 varints, used for the document room, hash keys, hash
//! values and bucket chain pointers.
//!
//! ## Encoding Format
//!
//! Each byte carries 7 value bits, least significant group first. The high
//! bit is set on every byte except the last:
//!
//! | Value Range                | Bytes |
//! |----------------------------|-------|
//! | 0 - 127                    | 1     |
//! | 128 - 16383                | 2     |
//! | 16384 - 2097151            | 3     |
//! | ...                        | ...   |
//! | 2^63 - u64::MAX            | 10    |
//!
//! ## Fixed Slots
//!
//! On disk every varint sits in a [`MAX_VARINT_LEN`]-byte slot so records,
//! entries and buckets keep a fixed size. Decoding stops at the first byte
//! without the continuation bit, so whatever fills the rest of the slot is
//! ignored.
//!
//! ## Error Handling
//!
//! `decode_varint` fails on:
//! - Empty buffer: "empty buffer for varint decode"
//! - Truncated encoding: "truncated varint after N bytes"
//! - Encodings wider than 64 bits: "varint overflows u64"
//!
//! Corrupted slots therefore decode to an error instead of a wild value.
//! Scans that probe many candidate headers use `read_varint`, which reports
//! the same failures as `None` without building a report.

use eyre::{eyre, Result};

use crate::config::MAX_VARINT_LEN;

pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Writes `value` at the start of `buf`, returning the bytes written.
///
/// Panics if `buf` is shorter than `varint_len(value)`.
pub fn encode_varint(mut value: u64, buf: &mut [u8]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8 & 0x7F) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

enum VarintError {
    Empty,
    Truncated(usize),
    Overflow,
}

fn decode_raw(buf: &[u8]) -> std::result::Result<(u64, usize), VarintError> {
    if buf.is_empty() {
        return Err(VarintError::Empty);
    }

    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        let group = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(VarintError::Overflow);
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if buf.len() >= MAX_VARINT_LEN {
        return Err(VarintError::Overflow);
    }
    Err(VarintError::Truncated(buf.len()))
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    decode_raw(buf).map_err(|err| match err {
        VarintError::Empty => eyre!("empty buffer for varint decode"),
        VarintError::Truncated(len) => eyre!("truncated varint after {} bytes", len),
        VarintError::Overflow => eyre!("varint overflows u64"),
    })
}

/// Allocation-free decode for self-consistency checks, where a failure is
/// an expected outcome rather than an error to report.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    decode_raw(buf).ok()
}

/// Encodes `value` into a fixed slot, filling the unused tail with `filler`.
pub fn write_varint_slot(value: u64, slot: &mut [u8], filler: u8) {
    let written = encode_varint(value, slot);
    slot[written..].fill(filler);
}
