//! # turdoc Configuration
//!
//! Tuning parameters fixed when a data directory is created. They shape every
//! collection and hash table file opened with them, so changing them for an
//! existing directory requires a rebuild (see [`crate::recovery`]).
//!
//! | Field             | Default | Effect                                        |
//! |-------------------|---------|-----------------------------------------------|
//! | `doc_max_room`    | 2 MiB   | Largest room a single document may reserve    |
//! | `col_file_growth` | 32 MiB  | Document log initial size and growth step     |
//! | `per_bucket`      | 16      | Entries per hash table bucket                 |
//! | `ht_file_growth`  | 16 MiB  | Hash table initial size and growth step       |
//! | `hash_bits`       | 16      | Low key-hash bits used, `2^bits` primary buckets |
//!
//! The configuration is persisted as pretty JSON in `data-config.json`.
//! Missing fields in an existing file fall back to the defaults.
//!
//! Constants describing the binary layout live in [`constants`].

pub mod constants;
pub use constants::*;

use std::fs;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub doc_max_room: u64,
    pub col_file_growth: u64,
    pub per_bucket: u64,
    pub ht_file_growth: u64,
    pub hash_bits: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            doc_max_room: DEFAULT_DOC_MAX_ROOM,
            col_file_growth: DEFAULT_COL_FILE_GROWTH,
            per_bucket: DEFAULT_PER_BUCKET,
            ht_file_growth: DEFAULT_HT_FILE_GROWTH,
            hash_bits: DEFAULT_HASH_BITS,
        }
    }
}

impl Config {
    /// Size in bytes of one hash table bucket.
    pub fn bucket_size(&self) -> u64 {
        BUCKET_HEADER as u64 + self.per_bucket * ENTRY_SIZE as u64
    }

    /// Number of primary buckets, addressed directly by key hash.
    pub fn initial_buckets(&self) -> u64 {
        1u64 << self.hash_bits
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.doc_max_room > 0, "doc_max_room must be positive");
        ensure!(self.col_file_growth > 0, "col_file_growth must be positive");
        ensure!(self.per_bucket > 0, "per_bucket must be positive");
        ensure!(
            (1..=32).contains(&self.hash_bits),
            "hash_bits {} outside of 1..=32",
            self.hash_bits
        );
        ensure!(
            self.ht_file_growth >= self.bucket_size(),
            "ht_file_growth {} cannot hold a single bucket of {} bytes",
            self.ht_file_growth,
            self.bucket_size()
        );
        Ok(())
    }

    /// Reads `data-config.json` under `dir`, creating the directory and a file
    /// holding the defaults when either is missing.
    pub fn create_or_read<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create data directory '{}'", dir.display()))?;

        let path = dir.join(CONFIG_FILE_NAME);
        let config = if path.exists() {
            let raw = fs::read(&path)
                .wrap_err_with(|| format!("failed to read config '{}'", path.display()))?;
            serde_json::from_slice::<Config>(&raw)
                .wrap_err_with(|| format!("malformed config '{}'", path.display()))?
        } else {
            let config = Config::default();
            let json = serde_json::to_vec_pretty(&config).wrap_err("failed to serialize config")?;
            fs::write(&path, json)
                .wrap_err_with(|| format!("failed to write config '{}'", path.display()))?;
            info!(path = %path.display(), "wrote default data config");
            config
        };

        config.validate()?;
        Ok(config)
    }
}
