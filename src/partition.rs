//! # Partition
//!
//! A `Partition` is the ID-addressed document store: one [`Collection`] for
//! the payloads, one [`HashTable`] mapping logical ID to physical offset, and
//! an in-memory set of IDs under advisory update lock.
//!
//! ```text
//!            logical id
//!                │
//!                ▼
//!   lookup: HashTable ── get(id, 1) ──> physical offset
//!                                          │
//!                                          ▼
//!   col: Collection ──────────────── read(offset) ──> payload
//! ```
//!
//! Logical IDs are assigned by the caller. The partition never generates
//! them and does not reject an ID that is already mapped.
//!
//! ## Concurrency
//!
//! Mutating operations take `&mut self`; callers share a partition behind a
//! read/write lock, so reads run concurrently and structural changes are
//! exclusive. The advisory lock set is the second tier: `lock_update` and
//! `unlock_update` take `&self` and serialize multi-step read, modify and
//! reindex sequences on one ID while other IDs proceed. Acquisition never
//! waits; a held lock is reported as [`StoreError::Locked`] at once.
//!
//! A stale lookup entry (pointing at a record that has since been deleted or
//! corrupted) reads as not found, identical to absence.

use std::path::Path;

use eyre::Result;
use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{error_kind, ErrorKind, StoreError};
use crate::storage::{Collection, HashTable};

/// Number of lookup table parts sampled from by [`Partition::approx_doc_count`].
const APPROX_SAMPLE_PARTS: u64 = 18;
const APPROX_MIN_PARTS: u64 = 8;

#[derive(Debug)]
pub struct Partition {
    col: Collection,
    lookup: HashTable,
    config: Config,
    updating: Mutex<HashSet<u64>>,
}

impl Partition {
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        col_path: P,
        lookup_path: Q,
        config: &Config,
    ) -> Result<Self> {
        let col = Collection::open(col_path, config)?;
        let lookup = HashTable::open(lookup_path, config)?;
        info!(
            col = %col.path().display(),
            lookup = %lookup.path().display(),
            "opened partition"
        );
        Ok(Self {
            col,
            lookup,
            config: config.clone(),
            updating: Mutex::new(HashSet::new()),
        })
    }

    /// Stores a document under `id`, returning its physical offset.
    pub fn insert(&mut self, id: u64, data: &[u8]) -> Result<u64> {
        let phys_id = self.col.insert(data)?;
        self.lookup.put(id, phys_id)?;
        Ok(phys_id)
    }

    /// Returns the document's full room, payload followed by padding.
    pub fn read(&self, id: u64) -> Result<Vec<u8>> {
        let phys_id = self.phys_id(id)?;
        self.col
            .read(phys_id)
            .ok_or_else(|| StoreError::NotFound(id).into())
    }

    /// Overwrites the document, relinking the lookup entry when the record
    /// had to move.
    pub fn update(&mut self, id: u64, data: &[u8]) -> Result<()> {
        let phys_id = self.phys_id(id)?;
        let new_phys_id = self.col.update(phys_id, data).map_err(|err| {
            if error_kind(&err) == ErrorKind::NotFound {
                StoreError::NotFound(id).into()
            } else {
                err
            }
        })?;
        if new_phys_id != phys_id {
            debug!(id, from = phys_id, to = new_phys_id, "document moved on update");
            self.lookup.remove(id, phys_id);
            self.lookup.put(id, new_phys_id)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, id: u64) -> Result<()> {
        let phys_id = self.phys_id(id)?;
        self.col
            .delete(phys_id)
            .map_err(|_| StoreError::NotFound(id))?;
        self.lookup.remove(id, phys_id);
        Ok(())
    }

    /// Takes the advisory update lock on `id` without waiting.
    pub fn lock_update(&self, id: u64) -> Result<()> {
        let mut updating = self.updating.lock();
        if !updating.insert(id) {
            return Err(StoreError::Locked(id).into());
        }
        Ok(())
    }

    /// Releases the advisory update lock on `id`. Unlocked IDs are ignored.
    pub fn unlock_update(&self, id: u64) {
        self.updating.lock().remove(&id);
    }

    pub fn is_locked(&self, id: u64) -> bool {
        self.updating.lock().contains(&id)
    }

    /// Runs `f(id, doc)` for every live document whose lookup entry falls in
    /// the `part`-th of `total` lookup ranges, until `f` returns `false`.
    /// Returns whether the scan ran to completion.
    pub fn for_each_doc_in<F>(&self, part: u64, total: u64, mut f: F) -> Result<bool>
    where
        F: FnMut(u64, &[u8]) -> bool,
    {
        for (id, phys_id) in self.lookup.get_partition(part, total)? {
            if let Some(doc) = self.col.read(phys_id) {
                if !f(id, &doc) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn for_each_doc<F>(&self, f: F) -> Result<bool>
    where
        F: FnMut(u64, &[u8]) -> bool,
    {
        self.for_each_doc_in(0, 1, f)
    }

    /// Estimates the number of documents by extrapolating from one sampled
    /// range of the lookup table.
    pub fn approx_doc_count(&self) -> Result<u64> {
        let mut parts = APPROX_SAMPLE_PARTS;
        loop {
            let sample = self.lookup.get_partition(0, parts)?.len() as u64;
            if sample > 0 {
                return Ok(sample * parts);
            }
            if parts < APPROX_MIN_PARTS {
                return Ok(0);
            }
            parts /= 2;
        }
    }

    /// Discards every document and lookup entry. Update locks are kept.
    pub fn clear(&mut self) -> Result<()> {
        self.col.clear()?;
        self.lookup.clear()
    }

    pub fn flush(&self) -> Result<()> {
        self.col.flush()?;
        self.lookup.flush()
    }

    pub fn close(self) -> Result<()> {
        self.col.close()?;
        self.lookup.close()
    }

    pub fn collection_path(&self) -> &Path {
        self.col.path()
    }

    pub fn lookup_path(&self) -> &Path {
        self.lookup.path()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collection(&self) -> &Collection {
        &self.col
    }

    pub fn lookup(&self) -> &HashTable {
        &self.lookup
    }

    /// Swaps in freshly built storage, handing back the previous handles.
    pub(crate) fn replace_storage(
        &mut self,
        col: Collection,
        lookup: HashTable,
    ) -> (Collection, HashTable) {
        (
            std::mem::replace(&mut self.col, col),
            std::mem::replace(&mut self.lookup, lookup),
        )
    }

    fn phys_id(&self, id: u64) -> Result<u64> {
        self.lookup
            .get(id, 1)
            .first()
            .copied()
            .ok_or_else(|| StoreError::NotFound(id).into())
    }
}
