//! # Static Hash Table
//!
//! An on-disk multimap from `u64` keys to `u64` values, used both as the
//! partition lookup table (logical ID -> physical offset) and as secondary
//! attribute indexes (value hash -> logical ID).
//!
//! ## File Layout
//!
//! ```text
//! bucket 0 .. 2^hash_bits - 1          primary buckets, addressed by hash
//! bucket 2^hash_bits ..                overflow buckets, appended on demand
//!
//! bucket = [next bucket: varint slot][entry] x per_bucket
//! entry  = [validity: 1][key: varint slot][value: varint slot]
//! ```
//!
//! A full bucket links to an overflow bucket through its header; the chain
//! only ever grows at its tail. Because slots fill in order and a chain is
//! only extended once full, the first slot that was never written (all
//! zeros) ends the scan of a chain.
//!
//! ## Chain Pointer Guard
//!
//! A chain pointer is followed only when it points strictly forward, past the
//! primary buckets and below the current bucket count. Anything else is read
//! as the end of the chain and reported once per table, so corrupted pointers
//! can never loop a lookup or read past the mapping. The next `put` that
//! reaches the broken tail relinks it to a fresh bucket.
//!
//! ## Hashing
//!
//! Keys are smeared (xor-shift, xor with a constant, shift-add) before the low
//! `hash_bits` bits select a primary bucket, spreading sequential and other
//! low-entropy keys.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{ensure, Result};
use tracing::{info, warn};

use crate::config::{Config, BUCKET_HEADER, ENTRY_SIZE, MAX_VARINT_LEN, REMOVED, VALID};
use crate::encoding::{read_varint, write_varint_slot};
use crate::storage::GrowableMappedFile;

#[derive(Debug)]
pub struct HashTable {
    file: GrowableMappedFile,
    per_bucket: u64,
    bucket_size: u64,
    initial_buckets: u64,
    hash_mask: u64,
    num_buckets: u64,
    corruption_reported: AtomicBool,
}

/// Splits `initial_buckets` primary buckets into `total` contiguous ranges
/// whose sizes differ by at most one, returning the `part`-th as `start..end`.
pub fn partition_range(part: u64, total: u64, initial_buckets: u64) -> Result<(u64, u64)> {
    ensure!(total > 0, "total number of partitions must be positive");
    ensure!(part < total, "partition {} out of range (total={})", part, total);

    let per_part = initial_buckets / total;
    let left_over = initial_buckets % total;
    let start = part * per_part + part.min(left_over);
    let end = start + per_part + u64::from(part < left_over);
    Ok((start, end))
}

impl HashTable {
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        config.validate()?;
        let file = GrowableMappedFile::open(path, config.ht_file_growth)?;
        let mut table = Self {
            file,
            per_bucket: config.per_bucket,
            bucket_size: config.bucket_size(),
            initial_buckets: config.initial_buckets(),
            hash_mask: config.initial_buckets() - 1,
            num_buckets: 0,
            corruption_reported: AtomicBool::new(false),
        };
        table.calculate_num_buckets()?;
        Ok(table)
    }

    pub fn hash_key(&self, key: u64) -> u64 {
        let mut key = key ^ (key >> 4);
        key = (key ^ 0xdead_beef).wrapping_add(key << 5);
        key ^= key >> 11;
        key & self.hash_mask
    }

    /// Stores the pair in the first vacant slot of the key's chain, appending
    /// an overflow bucket when the chain is full.
    pub fn put(&mut self, key: u64, val: u64) -> Result<()> {
        let mut bucket = self.hash_key(key);
        let mut slot = 0;
        loop {
            let addr = self.entry_addr(bucket, slot);
            if self.file.buf()[addr] != VALID {
                let buf = self.file.buf_mut();
                buf[addr] = VALID;
                write_varint_slot(key, &mut buf[addr + 1..addr + 1 + MAX_VARINT_LEN], 0);
                write_varint_slot(val, &mut buf[addr + 1 + MAX_VARINT_LEN..addr + ENTRY_SIZE], 0);
                return Ok(());
            }
            slot += 1;
            if slot == self.per_bucket {
                slot = 0;
                bucket = match self.next_bucket(bucket) {
                    Some(next) => next,
                    None => self.grow_bucket(bucket)?,
                };
            }
        }
    }

    /// Values stored under `key`, at most `limit` of them (0 = unlimited).
    pub fn get(&self, key: u64, limit: u64) -> Vec<u64> {
        let mut vals = Vec::new();
        self.scan_chain(self.hash_key(key), |_, k, v| {
            if k == key {
                vals.push(v);
                if vals.len() as u64 == limit {
                    return false;
                }
            }
            true
        });
        vals
    }

    /// Removes one occurrence of the exact pair. Returns whether one existed.
    pub fn remove(&mut self, key: u64, val: u64) -> bool {
        let mut found = None;
        self.scan_chain(self.hash_key(key), |addr, k, v| {
            if k == key && v == val {
                found = Some(addr);
                return false;
            }
            true
        });
        match found {
            Some(addr) => {
                self.file.buf_mut()[addr] = REMOVED;
                true
            }
            None => false,
        }
    }

    /// Every live pair in the table, at most `limit` of them (0 = unlimited).
    pub fn get_all(&self, limit: u64) -> Vec<(u64, u64)> {
        let mut entries = Vec::new();
        for head in 0..self.initial_buckets {
            let keep_going = self.scan_chain(head, |_, k, v| {
                entries.push((k, v));
                entries.len() as u64 != limit
            });
            if !keep_going {
                break;
            }
        }
        entries
    }

    /// Live pairs in the chains whose primary bucket falls in the `part`-th
    /// of `total` ranges. Disjoint parts cover the table exactly once.
    pub fn get_partition(&self, part: u64, total: u64) -> Result<Vec<(u64, u64)>> {
        let (start, end) = partition_range(part, total, self.initial_buckets)?;
        let mut entries = Vec::new();
        for head in start..end {
            self.scan_chain(head, |_, k, v| {
                entries.push((k, v));
                true
            });
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.clear()?;
        self.corruption_reported.store(false, Ordering::Relaxed);
        self.calculate_num_buckets()
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(self) -> Result<()> {
        self.file.close()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    pub fn initial_buckets(&self) -> u64 {
        self.initial_buckets
    }

    pub fn file(&self) -> &GrowableMappedFile {
        &self.file
    }

    fn entry_addr(&self, bucket: u64, slot: u64) -> usize {
        (bucket * self.bucket_size + BUCKET_HEADER as u64 + slot * ENTRY_SIZE as u64) as usize
    }

    fn next_bucket(&self, bucket: u64) -> Option<u64> {
        if bucket >= self.num_buckets {
            return None;
        }
        let addr = (bucket * self.bucket_size) as usize;
        let next = read_varint(&self.file.buf()[addr..addr + BUCKET_HEADER]).map(|(next, _)| next);
        match next {
            Some(0) => None,
            Some(next) if next > bucket && next < self.num_buckets && next >= self.initial_buckets => {
                Some(next)
            }
            _ => {
                if !self.corruption_reported.swap(true, Ordering::Relaxed) {
                    warn!(
                        path = %self.file.path().display(),
                        bucket,
                        "bad hash table chain pointer, treating as end of chain; scrub to repair"
                    );
                }
                None
            }
        }
    }

    fn last_bucket(&self, bucket: u64) -> u64 {
        let mut curr = bucket;
        while let Some(next) = self.next_bucket(curr) {
            curr = next;
        }
        curr
    }

    /// Appends an empty bucket and links it after `tail`. Returns its index.
    fn grow_bucket(&mut self, tail: u64) -> Result<u64> {
        self.file.ensure_size(self.bucket_size)?;

        let new_bucket = self.num_buckets;
        let new_addr = (new_bucket * self.bucket_size) as usize;
        let tail_addr = (tail * self.bucket_size) as usize;
        let bucket_size = self.bucket_size as usize;

        let buf = self.file.buf_mut();
        buf[new_addr..new_addr + bucket_size].fill(0);
        write_varint_slot(new_bucket, &mut buf[tail_addr..tail_addr + BUCKET_HEADER], 0);

        let used = self.file.used() + self.bucket_size;
        self.file.set_used(used)?;
        self.num_buckets += 1;
        Ok(new_bucket)
    }

    /// Runs `f(addr, key, value)` on every live entry of the chain starting
    /// at `head` until it returns `false`. Returns `false` if stopped by `f`.
    fn scan_chain<F>(&self, head: u64, mut f: F) -> bool
    where
        F: FnMut(usize, u64, u64) -> bool,
    {
        let buf = self.file.buf();
        let mut bucket = head;
        let mut slot = 0;
        loop {
            let addr = self.entry_addr(bucket, slot);
            let validity = buf[addr];
            let key = read_varint(&buf[addr + 1..addr + 1 + MAX_VARINT_LEN]).map(|(k, _)| k);
            let val = read_varint(&buf[addr + 1 + MAX_VARINT_LEN..addr + ENTRY_SIZE])
                .map(|(v, _)| v);

            match (validity, key, val) {
                (VALID, Some(k), Some(v)) => {
                    if !f(addr, k, v) {
                        return false;
                    }
                }
                (0, Some(0), Some(0)) => return true,
                _ => {}
            }

            slot += 1;
            if slot == self.per_bucket {
                slot = 0;
                match self.next_bucket(bucket) {
                    Some(next) => bucket = next,
                    None => return true,
                }
            }
        }
    }

    /// Follows every primary chain to find the highest bucket in use, then
    /// fixes the used size to cover exactly the buckets.
    fn calculate_num_buckets(&mut self) -> Result<()> {
        self.num_buckets = self.file.size() / self.bucket_size;
        let mut largest = self.initial_buckets - 1;
        for head in 0..self.initial_buckets.min(self.num_buckets) {
            let last = self.last_bucket(head);
            if last > largest && last < self.num_buckets {
                largest = last;
            }
        }
        self.num_buckets = largest + 1;

        let used = self.num_buckets * self.bucket_size;
        if used > self.file.size() {
            self.file.set_used(0)?;
            self.file.ensure_size(used)?;
        }
        self.file.set_used(used)?;
        info!(
            path = %self.file.path().display(),
            buckets = self.num_buckets,
            used,
            "calculated hash table size"
        );
        Ok(())
    }
}
