//! # Scrub
//!
//! Scrub is the operator-invoked rebuild of a partition and its secondary
//! indexes. It recovers every document whose record header is still
//! self-consistent and whose payload still parses as a JSON object. Other
//! payloads, including valid JSON arrays or scalars, are dropped. The
//! rebuild also reclaims deleted records and discards index corruption.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──> BackingUp ──> Scanning ──> Reindexing ──> Swapped
//!              │
//!              └── backup failed ──> Idle
//! ```
//!
//! | State        | Work                                                    |
//! |--------------|---------------------------------------------------------|
//! | `BackingUp`  | flush, copy the collection file to `<collection>.bak`   |
//! | `Scanning`   | corruption-tolerant scan of the collection file         |
//! | `Reindexing` | write fresh files at `<path>.scrub`                     |
//! | `Swapped`    | rename the fresh files over the live ones and reopen    |
//!
//! Failures after the backup leave the state where they happened; the live
//! files are untouched until every fresh file is complete.
//!
//! ## Logical IDs
//!
//! The scan sees physical offsets only. Each recovered document gets its
//! logical ID from, in order:
//!
//! 1. its embedded `"_id"` attribute, when it is an unsigned integer
//! 2. a surviving lookup entry pointing at its offset
//! 3. a fresh random ID
//!
//! A document whose ID was already taken by an earlier one also gets a fresh
//! ID. Fresh IDs are counted in [`ScrubReport::reassigned`] and written back
//! into the document's `"_id"` attribute when it has one.
//!
//! Records whose header bytes are damaged beyond the self-consistency check
//! are lost; there is no journal to recover them from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::index::SecondaryIndex;
use crate::partition::Partition;
use crate::storage::{Collection, HashTable};

/// Attribute carrying a document's logical ID inside its payload.
pub const ID_FIELD: &str = "_id";

const BACKUP_SUFFIX: &str = ".bak";
const SCRUB_SUFFIX: &str = ".scrub";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrubState {
    Idle,
    BackingUp,
    Scanning,
    Reindexing,
    Swapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubReport {
    pub recovered: u64,
    pub reassigned: u64,
    pub backup_path: PathBuf,
}

pub struct Scrub<'a> {
    part: &'a mut Partition,
    indexes: &'a mut [SecondaryIndex],
    state: ScrubState,
}

struct Recovered {
    id: u64,
    doc: Value,
}

impl<'a> Scrub<'a> {
    pub fn new(part: &'a mut Partition, indexes: &'a mut [SecondaryIndex]) -> Self {
        Self {
            part,
            indexes,
            state: ScrubState::Idle,
        }
    }

    pub fn state(&self) -> ScrubState {
        self.state
    }

    pub fn run(&mut self) -> Result<ScrubReport> {
        self.state = ScrubState::BackingUp;
        let backup_path = match self.backup() {
            Ok(path) => path,
            Err(err) => {
                self.state = ScrubState::Idle;
                return Err(err);
            }
        };

        self.state = ScrubState::Scanning;
        let (docs, reassigned) = self.scan()?;

        self.state = ScrubState::Reindexing;
        self.rebuild(&docs)?;

        self.state = ScrubState::Swapped;
        let report = ScrubReport {
            recovered: docs.len() as u64,
            reassigned,
            backup_path,
        };
        info!(
            col = %self.part.collection_path().display(),
            recovered = report.recovered,
            reassigned = report.reassigned,
            "scrub complete"
        );
        Ok(report)
    }

    fn backup(&self) -> Result<PathBuf> {
        self.part.flush()?;
        for idx in self.indexes.iter() {
            idx.flush()?;
        }

        let src = self.part.collection_path();
        let dest = with_suffix(src, BACKUP_SUFFIX);
        fs::copy(src, &dest).wrap_err_with(|| {
            format!("failed to back up '{}' to '{}'", src.display(), dest.display())
        })?;
        info!(backup = %dest.display(), "backed up collection before scrub");
        Ok(dest)
    }

    fn scan(&self) -> Result<(Vec<Recovered>, u64)> {
        let id_by_offset: HashMap<u64, u64> = self
            .part
            .lookup()
            .get_all(0)
            .into_iter()
            .map(|(id, phys_id)| (phys_id, id))
            .collect();

        let mut docs = Vec::new();
        let mut unparsable = 0u64;
        self.part.collection().for_each_doc(|phys_id, payload| {
            match serde_json::from_slice::<Value>(payload) {
                Ok(doc) if doc.is_object() => docs.push((phys_id, doc)),
                _ => unparsable += 1,
            }
            true
        });
        if unparsable > 0 {
            warn!(unparsable, "skipped records that are not JSON objects");
        }

        let mut rng = rand::thread_rng();
        let mut taken = HashSet::with_capacity(docs.len());
        let mut reassigned = 0u64;
        let recovered = docs
            .into_iter()
            .map(|(phys_id, mut doc)| {
                let known = doc
                    .get(ID_FIELD)
                    .and_then(Value::as_u64)
                    .or_else(|| id_by_offset.get(&phys_id).copied());
                let id = match known {
                    Some(id) if taken.insert(id) => id,
                    _ => {
                        let id = loop {
                            let candidate = rng.gen::<u64>();
                            if taken.insert(candidate) {
                                break candidate;
                            }
                        };
                        debug!(phys_id, id, "assigned fresh id to recovered document");
                        reassigned += 1;
                        if let Some(field) = doc.get_mut(ID_FIELD) {
                            *field = Value::from(id);
                        }
                        id
                    }
                };
                Recovered { id, doc }
            })
            .collect();

        Ok((recovered, reassigned))
    }

    fn rebuild(&mut self, docs: &[Recovered]) -> Result<()> {
        let config = self.part.config().clone();
        let col_path = self.part.collection_path().to_path_buf();
        let lookup_path = self.part.lookup_path().to_path_buf();
        let index_paths: Vec<PathBuf> = self
            .indexes
            .iter()
            .map(|idx| idx.table().path().to_path_buf())
            .collect();

        let tmp_col_path = fresh_tmp(&col_path)?;
        let tmp_lookup_path = fresh_tmp(&lookup_path)?;
        let mut tmp_col = Collection::open(&tmp_col_path, &config)?;
        let mut tmp_lookup = HashTable::open(&tmp_lookup_path, &config)?;
        let mut tmp_indexes = Vec::with_capacity(self.indexes.len());
        for (idx, path) in self.indexes.iter().zip(&index_paths) {
            tmp_indexes.push(SecondaryIndex::open(fresh_tmp(path)?, idx.attr_path(), &config)?);
        }

        for Recovered { id, doc } in docs {
            let payload = serde_json::to_vec(doc).wrap_err("failed to serialize document")?;
            let phys_id = tmp_col.insert(&payload)?;
            tmp_lookup.put(*id, phys_id)?;
            for idx in tmp_indexes.iter_mut() {
                idx.index_doc(*id, doc)?;
            }
        }

        tmp_col.close()?;
        tmp_lookup.close()?;
        for idx in tmp_indexes {
            idx.close()?;
        }

        replace_file(&tmp_col_path, &col_path)?;
        replace_file(&tmp_lookup_path, &lookup_path)?;
        for path in &index_paths {
            replace_file(&with_suffix(path, SCRUB_SUFFIX), path)?;
        }

        let (old_col, old_lookup) = self.part.replace_storage(
            Collection::open(&col_path, &config)?,
            HashTable::open(&lookup_path, &config)?,
        );
        old_col.close()?;
        old_lookup.close()?;
        for (idx, path) in self.indexes.iter_mut().zip(&index_paths) {
            idx.replace_table(HashTable::open(path, &config)?).close()?;
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Scrub temporary for `path`, with any leftover from an earlier run removed.
fn fresh_tmp(path: &Path) -> Result<PathBuf> {
    let tmp = with_suffix(path, SCRUB_SUFFIX);
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("failed to remove '{}'", tmp.display()))
        }
    }
    Ok(tmp)
}

fn replace_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .wrap_err_with(|| format!("failed to move '{}' over '{}'", from.display(), to.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tempfile::tempdir;

    fn small_config() -> Config {
        Config {
            doc_max_room: 4096,
            col_file_growth: 64 * 1024,
            per_bucket: 8,
            ht_file_growth: 64 * 1024,
            hash_bits: 6,
        }
    }

    fn open_all(dir: &Path) -> (Partition, Vec<SecondaryIndex>) {
        let config = small_config();
        let part = Partition::open(dir.join("0.col"), dir.join("0.lookup"), &config).unwrap();
        let idx = SecondaryIndex::open(dir.join("0.idx.n"), &["n"], &config).unwrap();
        (part, vec![idx])
    }

    fn insert_doc(part: &mut Partition, indexes: &mut [SecondaryIndex], id: u64, doc: Value) {
        part.insert(id, doc.to_string().as_bytes()).unwrap();
        for idx in indexes.iter_mut() {
            idx.index_doc(id, &doc).unwrap();
        }
    }

    fn live_ids(part: &Partition) -> Vec<u64> {
        let mut ids = Vec::new();
        part.for_each_doc(|id, _| {
            ids.push(id);
            true
        })
        .unwrap();
        ids.sort();
        ids
    }

    #[test]
    fn scrub_compacts_and_keeps_live_documents() {
        let dir = tempdir().unwrap();
        let (mut part, mut indexes) = open_all(dir.path());
        for id in 0..50u64 {
            insert_doc(&mut part, &mut indexes, id, json!({"_id": id, "n": id % 5}));
        }
        for id in 0..10u64 {
            part.delete(id).unwrap();
            indexes[0].unindex_doc(id, &json!({"_id": id, "n": id % 5}));
        }
        let used_before = part.collection().used();

        let mut scrub = Scrub::new(&mut part, &mut indexes);
        assert_eq!(scrub.state(), ScrubState::Idle);
        let report = scrub.run().unwrap();
        assert_eq!(scrub.state(), ScrubState::Swapped);

        assert_eq!(report.recovered, 40);
        assert_eq!(report.reassigned, 0);
        assert!(report.backup_path.exists());
        assert!(part.collection().used() < used_before);
        assert_eq!(live_ids(&part), (10..50).collect::<Vec<_>>());
        assert_eq!(indexes[0].table().get_all(0).len(), 40);
        assert_eq!(indexes[0].lookup(&json!(3), 0).len(), 8);
        assert!(!with_suffix(part.collection_path(), SCRUB_SUFFIX).exists());
    }

    #[test]
    fn ids_come_from_lookup_when_not_embedded() {
        let dir = tempdir().unwrap();
        let (mut part, mut indexes) = open_all(dir.path());
        insert_doc(&mut part, &mut indexes, 77, json!({"n": 1}));
        insert_doc(&mut part, &mut indexes, 88, json!({"n": 2}));

        let report = Scrub::new(&mut part, &mut indexes).run().unwrap();

        assert_eq!(report.recovered, 2);
        assert_eq!(report.reassigned, 0);
        assert_eq!(live_ids(&part), vec![77, 88]);
        assert_eq!(indexes[0].lookup(&json!(2), 0), vec![88]);
    }

    #[test]
    fn duplicate_and_unknown_ids_are_reassigned() {
        let dir = tempdir().unwrap();
        {
            let (mut part, mut indexes) = open_all(dir.path());
            insert_doc(&mut part, &mut indexes, 5, json!({"_id": 5, "n": 1}));
            insert_doc(&mut part, &mut indexes, 6, json!({"_id": 5, "n": 2}));
            insert_doc(&mut part, &mut indexes, 7, json!({"n": 3}));
            part.close().unwrap();
        }
        fs::remove_file(dir.path().join("0.lookup")).unwrap();
        let (mut part, mut indexes) = open_all(dir.path());

        let report = Scrub::new(&mut part, &mut indexes).run().unwrap();

        assert_eq!(report.recovered, 3);
        assert_eq!(report.reassigned, 2);
        let ids = live_ids(&part);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&5));
        for id in ids.iter().filter(|id| **id != 5) {
            let doc: Value = serde_json::from_slice(&part.read(*id).unwrap()).unwrap();
            if doc["n"] == json!(2) {
                assert_eq!(doc[ID_FIELD], json!(*id));
            } else {
                assert!(doc.get(ID_FIELD).is_none());
            }
        }
    }

    #[test]
    fn unparsable_and_corrupted_records_are_dropped() {
        let dir = tempdir().unwrap();
        let (mut part, mut indexes) = open_all(dir.path());
        insert_doc(&mut part, &mut indexes, 1, json!({"_id": 1, "n": 1}));
        part.insert(2, b"not json").unwrap();
        part.insert(3, b"[1,2]").unwrap();
        insert_doc(&mut part, &mut indexes, 4, json!({"_id": 4, "n": 4}));

        let report = Scrub::new(&mut part, &mut indexes).run().unwrap();

        assert_eq!(report.recovered, 2);
        assert_eq!(live_ids(&part), vec![1, 4]);
    }

    #[test]
    fn backup_failure_returns_to_idle() {
        let dir = tempdir().unwrap();
        let (mut part, mut indexes) = open_all(dir.path());
        insert_doc(&mut part, &mut indexes, 1, json!({"_id": 1}));
        fs::create_dir(dir.path().join("0.col.bak")).unwrap();

        let mut scrub = Scrub::new(&mut part, &mut indexes);
        assert!(scrub.run().is_err());
        assert_eq!(scrub.state(), ScrubState::Idle);
        assert_eq!(live_ids(&part), vec![1]);
    }

    #[test]
    fn stale_scrub_temporaries_are_ignored() {
        let dir = tempdir().unwrap();
        let (mut part, mut indexes) = open_all(dir.path());
        insert_doc(&mut part, &mut indexes, 1, json!({"_id": 1, "n": 1}));
        fs::write(dir.path().join("0.col.scrub"), vec![b'x'; 500]).unwrap();

        let report = Scrub::new(&mut part, &mut indexes).run().unwrap();

        assert_eq!(report.recovered, 1);
        assert_eq!(live_ids(&part), vec![1]);
    }
}
