//! # Document Log
//!
//! A `Collection` appends serialized documents to one [`GrowableMappedFile`].
//! The offset of a record is its physical ID.
//!
//! ## Record Layout
//!
//! ```text
//! offset
//!   │
//!   ▼
//! +----------+------------------+-----------------+-----------------+
//! | validity | room (varint in  | payload         | padding (spaces)|
//! | 1 byte   | 10-byte slot)    | len(payload)    | room - len      |
//! +----------+------------------+-----------------+-----------------+
//!            └── DOC_HEADER ───┘└──────────────── room ─────────────┘
//! ```
//!
//! Inserts reserve twice the payload length so later updates can usually
//! overwrite in place. An update that no longer fits deletes the record and
//! appends a new one, changing the physical ID.
//!
//! Deletion only flips the validity byte. Space is never reclaimed; a full
//! rebuild through [`crate::recovery::Scrub`] is the only compaction. Every
//! mutation is therefore O(1) amortized while fragmentation is unbounded.
//!
//! ## Self-Consistency
//!
//! A header is self-consistent when the validity byte is 0 or 1, the room
//! decodes and is at most `doc_max_room`, and the record ends within bounds.
//! Addressed access (`read`, `update`, `delete`) reports any inconsistency as
//! "not found". The scan in [`Collection::for_each_doc`] instead advances one
//! byte and retries, which resynchronizes after localized corruption without
//! any external index. A badly damaged file is thus scanned byte by byte;
//! that slow path is the price of recovering without a journal.

use std::path::Path;

use eyre::Result;
use tracing::trace;

use crate::config::{Config, DELETED, DOC_HEADER, MAX_VARINT_LEN, PADDING_BYTE, VALID};
use crate::encoding::{read_varint, write_varint_slot};
use crate::error::StoreError;
use crate::storage::GrowableMappedFile;

#[derive(Debug)]
pub struct Collection {
    file: GrowableMappedFile,
    doc_max_room: u64,
}

impl Collection {
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            file: GrowableMappedFile::open(path, config.col_file_growth)?,
            doc_max_room: config.doc_max_room,
        })
    }

    /// Appends a document and returns its physical ID.
    pub fn insert(&mut self, data: &[u8]) -> Result<u64> {
        let room = data.len() as u64 * 2;
        if room > self.doc_max_room {
            return Err(StoreError::TooLarge {
                max: self.doc_max_room,
                given: room,
            }
            .into());
        }

        let id = self.file.used();
        let doc_size = DOC_HEADER as u64 + room;
        self.file.ensure_size(doc_size)?;

        let start = id as usize;
        let buf = self.file.buf_mut();
        buf[start] = VALID;
        write_varint_slot(room, &mut buf[start + 1..start + DOC_HEADER], PADDING_BYTE);
        let body = start + DOC_HEADER;
        write_padded(&mut buf[body..body + room as usize], data);

        self.file.set_used(id + doc_size)?;
        Ok(id)
    }

    /// Returns a copy of the record's full room, payload followed by padding.
    pub fn read(&self, id: u64) -> Option<Vec<u8>> {
        let room = self.live_room(id)?;
        let body = id as usize + DOC_HEADER;
        Some(self.file.buf()[body..body + room as usize].to_vec())
    }

    /// Overwrites the document in place when it fits the reserved room,
    /// otherwise re-inserts it and then deletes the old record. Returns the
    /// (possibly new) ID. A failed re-insert leaves the old record live.
    pub fn update(&mut self, id: u64, data: &[u8]) -> Result<u64> {
        let new_size = data.len() as u64;
        if new_size > self.doc_max_room {
            return Err(StoreError::TooLarge {
                max: self.doc_max_room,
                given: new_size,
            }
            .into());
        }

        let room = self.live_room(id).ok_or(StoreError::NotFound(id))?;
        if new_size <= room {
            let body = id as usize + DOC_HEADER;
            write_padded(&mut self.file.buf_mut()[body..body + room as usize], data);
            return Ok(id);
        }

        let new_id = self.insert(data)?;
        self.file.buf_mut()[id as usize] = DELETED;
        Ok(new_id)
    }

    pub fn delete(&mut self, id: u64) -> Result<()> {
        self.live_room(id).ok_or(StoreError::NotFound(id))?;
        self.file.buf_mut()[id as usize] = DELETED;
        Ok(())
    }

    /// Runs `f` on every live document in file order until it returns
    /// `false`. Inconsistent headers are skipped one byte at a time.
    pub fn for_each_doc<F>(&self, mut f: F)
    where
        F: FnMut(u64, &[u8]) -> bool,
    {
        let buf = self.file.buf();
        let used = self.file.used();
        let mut id = 0u64;
        let mut skipped = 0u64;

        while id + DOC_HEADER as u64 <= used {
            match self.header_at(id) {
                Some((validity, room)) if id + DOC_HEADER as u64 + room <= used => {
                    let body = id as usize + DOC_HEADER;
                    if validity == VALID && !f(id, &buf[body..body + room as usize]) {
                        break;
                    }
                    id += DOC_HEADER as u64 + room;
                }
                _ => {
                    skipped += 1;
                    id += 1;
                }
            }
        }

        if skipped > 0 {
            trace!(
                path = %self.file.path().display(),
                skipped,
                "resynchronized past inconsistent bytes"
            );
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.clear()
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

    pub fn used(&self) -> u64 {
        self.file.used()
    }

    pub fn size(&self) -> u64 {
        self.file.size()
    }

    pub fn file(&self) -> &GrowableMappedFile {
        &self.file
    }

    /// Validity byte and room of the header at `id`, when the header itself
    /// decodes and the room is within the configured maximum.
    fn header_at(&self, id: u64) -> Option<(u8, u64)> {
        let start = id as usize;
        let buf = self.file.buf();
        let validity = buf[start];
        if validity != VALID && validity != DELETED {
            return None;
        }
        let slot = &buf[start + 1..start + 1 + MAX_VARINT_LEN];
        let (room, _) = read_varint(slot)?;
        if room > self.doc_max_room {
            return None;
        }
        Some((validity, room))
    }

    fn live_room(&self, id: u64) -> Option<u64> {
        let used = self.file.used();
        if used < DOC_HEADER as u64 || id > used - DOC_HEADER as u64 {
            return None;
        }
        match self.header_at(id) {
            Some((VALID, room)) if id + DOC_HEADER as u64 + room <= self.file.size() => Some(room),
            Some((DELETED, _)) => None,
            _ => {
                trace!(id, "{}", StoreError::CorruptHeader(id));
                None
            }
        }
    }
}

fn write_padded(dest: &mut [u8], data: &[u8]) {
    dest[..data.len()].copy_from_slice(data);
    dest[data.len()..].fill(PADDING_BYTE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use tempfile::tempdir;

    fn small_config() -> Config {
        Config {
            doc_max_room: 1024,
            col_file_growth: 4096,
            ..Config::default()
        }
    }

    #[test]
    fn insert_and_read_back_with_padding() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();

        let a = col.insert(b"abc").unwrap();
        let b = col.insert(b"{\"x\":1}").unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, (DOC_HEADER + 6) as u64);
        assert_eq!(col.read(a).unwrap(), b"abc   ");
        assert_eq!(col.read(b).unwrap(), b"{\"x\":1}       ");
        assert_eq!(col.used(), (2 * DOC_HEADER + 6 + 14) as u64);
    }

    #[test]
    fn insert_rejects_oversized_room() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();

        assert!(col.insert(&[b'a'; 512]).is_ok());
        let err = col.insert(&[b'a'; 513]).unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::TooLarge);
    }

    #[test]
    fn insert_grows_file() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();

        let ids: Vec<u64> = (0..100)
            .map(|i| col.insert(format!("document number {}", i).as_bytes()).unwrap())
            .collect();

        assert!(col.size() > 4096);
        for (i, id) in ids.iter().enumerate() {
            let doc = col.read(*id).unwrap();
            let expected = format!("document number {}", i);
            assert!(doc.starts_with(expected.as_bytes()));
        }
    }

    #[test]
    fn update_in_place_keeps_id() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"1234").unwrap();
        let next = col.insert(b"next").unwrap();

        assert_eq!(col.update(id, b"abcdefgh").unwrap(), id);
        assert_eq!(col.read(id).unwrap(), b"abcdefgh");

        assert_eq!(col.update(id, b"xy").unwrap(), id);
        assert_eq!(col.read(id).unwrap(), b"xy      ");
        assert_eq!(col.read(next).unwrap(), b"next    ");
    }

    #[test]
    fn update_beyond_room_moves_record() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"ab").unwrap();

        let new_id = col.update(id, b"abcdefgh").unwrap();

        assert_ne!(new_id, id);
        assert!(col.read(id).is_none());
        assert_eq!(col.read(new_id).unwrap(), b"abcdefgh        ");
    }

    #[test]
    fn update_rejects_oversized_payload() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"ab").unwrap();

        let err = col.update(id, &[b'z'; 2000]).unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::TooLarge);
        assert_eq!(col.read(id).unwrap(), b"ab  ");
    }

    #[test]
    fn update_that_cannot_move_keeps_document() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"ab").unwrap();
        let used = col.used();

        let err = col.update(id, &[b'z'; 600]).unwrap_err();

        assert_eq!(error_kind(&err), ErrorKind::TooLarge);
        assert_eq!(col.read(id).unwrap(), b"ab  ");
        assert_eq!(col.used(), used);
        assert_eq!(col.update(id, &[b'z'; 512]).unwrap(), used);
        assert!(col.read(id).is_none());
    }

    #[test]
    fn open_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let config = Config {
            doc_max_room: 0,
            ..small_config()
        };

        assert!(Collection::open(dir.path().join("col"), &config).is_err());
        assert!(!dir.path().join("col").exists());
    }

    #[test]
    fn delete_is_terminal() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"gone").unwrap();

        col.delete(id).unwrap();

        assert!(col.read(id).is_none());
        assert_eq!(error_kind(&col.update(id, b"x").unwrap_err()), ErrorKind::NotFound);
        assert_eq!(error_kind(&col.delete(id).unwrap_err()), ErrorKind::NotFound);
    }

    #[test]
    fn addressed_access_out_of_bounds_is_not_found() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();

        assert!(col.read(0).is_none());
        let id = col.insert(b"abc").unwrap();

        assert!(col.read(id + 1).is_none());
        assert!(col.read(u64::MAX).is_none());
        assert_eq!(error_kind(&col.delete(9999).unwrap_err()), ErrorKind::NotFound);
    }

    #[test]
    fn corrupted_room_is_not_found() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let id = col.insert(b"abc").unwrap();

        col.file.buf_mut()[1..DOC_HEADER].fill(0xFF);

        assert!(col.read(id).is_none());
        assert_eq!(error_kind(&col.delete(id).unwrap_err()), ErrorKind::NotFound);
    }

    #[test]
    fn for_each_doc_skips_deleted_and_stops_early() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let ids: Vec<u64> = (0..5)
            .map(|i| col.insert(format!("d{}", i).as_bytes()).unwrap())
            .collect();
        col.delete(ids[1]).unwrap();

        let mut seen = Vec::new();
        col.for_each_doc(|id, _| {
            seen.push(id);
            true
        });
        assert_eq!(seen, vec![ids[0], ids[2], ids[3], ids[4]]);

        let mut count = 0;
        col.for_each_doc(|_, _| {
            count += 1;
            count < 2
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn for_each_doc_resynchronizes_after_corruption() {
        let dir = tempdir().unwrap();
        let mut col = Collection::open(dir.path().join("col"), &small_config()).unwrap();
        let ids: Vec<u64> = (0..10)
            .map(|i| col.insert(format!("{{\"n\":{}}}", i).as_bytes()).unwrap())
            .collect();

        let start = ids[3] as usize;
        let end = ids[5] as usize + 3;
        col.file.buf_mut()[start..end].fill(6);

        let mut seen = Vec::new();
        col.for_each_doc(|id, _| {
            seen.push(id);
            true
        });

        let mut expected = ids.clone();
        expected.retain(|id| *id < ids[3] || *id > ids[5]);
        assert_eq!(seen, expected);
    }

    #[test]
    fn reopen_finds_tail_of_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("col");
        let last;
        {
            let mut col = Collection::open(&path, &small_config()).unwrap();
            col.insert(b"").unwrap();
            last = col.insert(b"tail").unwrap();
            col.close().unwrap();
        }

        let mut col = Collection::open(&path, &small_config()).unwrap();
        assert_eq!(col.used(), last + DOC_HEADER as u64 + 8);

        let appended = col.insert(b"more").unwrap();
        assert_eq!(appended, last + DOC_HEADER as u64 + 8);
        assert_eq!(col.read(last).unwrap(), b"tail    ");
    }
}
