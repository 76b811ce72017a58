//! # turdoc - Embedded Document Storage Engine
//!
//! turdoc stores schemaless documents in memory-mapped files. It provides:
//!
//! - **Append-only document log**: records addressed by their file offset
//! - **On-disk hash table**: `u64 -> u64` multimap with chained overflow
//! - **ID-addressed partitions**: logical IDs resolved through a lookup table
//! - **Corruption tolerance**: scans resynchronize past damaged records and a
//!   scrub rebuilds everything from the documents that survive
//!
//! ## Quick Start
//!
//! ```ignore
//! use turdoc::{Config, Partition, SecondaryIndex};
//!
//! let config = Config::create_or_read("./data")?;
//! let mut part = Partition::open("./data/0.col", "./data/0.lookup", &config)?;
//! let mut by_name = SecondaryIndex::open("./data/0.idx.name", &["name"], &config)?;
//!
//! let doc = serde_json::json!({"_id": 1, "name": "Alice"});
//! part.insert(1, doc.to_string().as_bytes())?;
//! by_name.index_doc(1, &doc)?;
//!
//! let raw = part.read(1)?;
//! let ids = by_name.lookup(&serde_json::json!("Alice"), 0);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Scrub (backup, scan, rebuild)      │
//! ├───────────────────┬─────────────────┤
//! │     Partition     │ SecondaryIndex  │
//! ├───────────────────┴─────────────────┤
//! │     Collection    │    HashTable     │
//! ├─────────────────────────────────────┤
//! │        GrowableMappedFile            │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: tuning parameters and on-disk layout constants
//! - [`encoding`]: varint codec
//! - [`error`]: typed store errors carried in `eyre` reports
//! - [`storage`]: mapped files, document log, hash table
//! - [`partition`]: ID-addressed document store with advisory update locks
//! - [`index`]: attribute path resolution and secondary indexes
//! - [`recovery`]: the scrub procedure

pub mod config;
pub mod encoding;
pub mod error;
pub mod index;
pub mod partition;
pub mod recovery;
pub mod storage;

pub use config::Config;
pub use error::{error_kind, ErrorKind, StoreError};
pub use index::{index_values, str_hash, SecondaryIndex};
pub use partition::Partition;
pub use recovery::{Scrub, ScrubReport, ScrubState, ID_FIELD};
pub use storage::{Collection, GrowableMappedFile, HashTable};
