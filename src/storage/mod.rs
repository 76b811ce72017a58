//! # Storage Module
//!
//! The on-disk layer: one memory-mapped file type and the two structures
//! built on it.
//!
//! ```text
//! GrowableMappedFile      mapped file with used/size bookkeeping
//!   ├── Collection        append-only document log, offset = physical ID
//!   └── HashTable         u64 -> u64 multimap with chained overflow buckets
//! ```
//!
//! ## Data Directory Layout
//!
//! A partition keeps its files side by side; secondary indexes are further
//! hash tables named by the caller:
//!
//! ```text
//! data_dir/
//! ├── data-config.json    # Config, see crate::config
//! ├── 0.col               # Collection (documents)
//! ├── 0.lookup            # HashTable (logical ID -> physical ID)
//! └── 0.idx.a.b           # HashTable (value hash -> logical ID), optional
//! ```
//!
//! ## Safety Model
//!
//! All three types require `&mut self` for any mutation that may remap the
//! file, so no borrowed slice survives a grow. None of them lock internally;
//! [`crate::partition::Partition`] serializes access through its own locks.
//!
//! ## Durability
//!
//! Nothing here journals. A crash between writing a document and updating
//! its lookup entry leaves the two files inconsistent; rebuilding with
//! [`crate::recovery::Scrub`] restores consistency from whatever documents
//! survive.

mod collection;
mod hashtable;
mod mmap;

pub use collection::Collection;
pub use hashtable::{partition_range, HashTable};
pub use mmap::GrowableMappedFile;
