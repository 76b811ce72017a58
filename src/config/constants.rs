//! # turdoc Layout and Default Constants
//!
//! This module collects the fixed on-disk layout sizes and the default tuning
//! values. Layout sizes are part of the file format and never change for an
//! existing file; the defaults only seed a new [`Config`](super::Config).
//!
//! ## Dependency Graph
//!
//! ```text
//! MAX_VARINT_LEN (10)
//!       │
//!       ├─> DOC_HEADER   = 1 (validity) + MAX_VARINT_LEN (room)
//!       │
//!       ├─> ENTRY_SIZE   = 1 (validity) + MAX_VARINT_LEN (key) + MAX_VARINT_LEN (value)
//!       │
//!       └─> BUCKET_HEADER = MAX_VARINT_LEN (next bucket pointer)
//!
//! BOUNDARY_SENTINEL_LEN (20)
//!       │
//!       └─> must exceed MAX_VARINT_LEN, otherwise an unused room field could
//!           be mistaken for the end of the document log
//! ```

/// Widest encoding of a `u64` as an unsigned LEB128 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Document record header: validity byte followed by the room varint slot.
pub const DOC_HEADER: usize = 1 + MAX_VARINT_LEN;

/// Hash table entry: validity byte, key varint slot, value varint slot.
pub const ENTRY_SIZE: usize = 1 + MAX_VARINT_LEN + MAX_VARINT_LEN;

/// Hash table bucket header: the next-bucket pointer varint slot.
pub const BUCKET_HEADER: usize = MAX_VARINT_LEN;

/// Length of the zero run that marks the end of meaningful content in a
/// mapped file.
pub const BOUNDARY_SENTINEL_LEN: usize = 20;

/// Filler written after a document payload and into unused room-field bytes.
pub const PADDING_BYTE: u8 = b' ';

/// Validity byte of a live document or hash entry.
pub const VALID: u8 = 1;

/// Validity byte of a deleted document.
pub const DELETED: u8 = 0;

/// Validity byte of a removed hash entry. Distinct from zero so a removed
/// entry never looks like a slot that was never written.
pub const REMOVED: u8 = 2;

pub const DEFAULT_DOC_MAX_ROOM: u64 = 2 * 1024 * 1024;
pub const DEFAULT_COL_FILE_GROWTH: u64 = 32 * 1024 * 1024;
pub const DEFAULT_PER_BUCKET: u64 = 16;
pub const DEFAULT_HT_FILE_GROWTH: u64 = 16 * 1024 * 1024;
pub const DEFAULT_HASH_BITS: u32 = 16;

/// Name of the persisted configuration file inside a data directory.
pub const CONFIG_FILE_NAME: &str = "data-config.json";

const _: () = assert!(BOUNDARY_SENTINEL_LEN > MAX_VARINT_LEN);
const _: () = assert!(DOC_HEADER == 11);
const _: () = assert!(ENTRY_SIZE == 21);
