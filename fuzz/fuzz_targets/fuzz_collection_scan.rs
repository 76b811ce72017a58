//! Fuzz testing for the document log and hash table readers.
//!
//! Arbitrary bytes are written as the backing file of a collection and of a
//! hash table, which are then scanned and probed. Corrupted headers and
//! chain pointers must never panic, loop or read out of bounds.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use turdoc::{Collection, Config, HashTable};

#[derive(Debug, Arbitrary)]
struct ScanInput {
    col_bytes: Vec<u8>,
    ht_bytes: Vec<u8>,
    probes: Vec<u64>,
}

fuzz_target!(|input: ScanInput| {
    let config = Config {
        doc_max_room: 256,
        col_file_growth: 512,
        per_bucket: 2,
        ht_file_growth: 512,
        hash_bits: 2,
    };
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let col_path = dir.path().join("col");
    let ht_path = dir.path().join("ht");
    if std::fs::write(&col_path, &input.col_bytes).is_err()
        || std::fs::write(&ht_path, &input.ht_bytes).is_err()
    {
        return;
    }

    if let Ok(mut col) = Collection::open(&col_path, &config) {
        let mut ids = Vec::new();
        col.for_each_doc(|id, doc| {
            assert!(doc.len() as u64 <= config.doc_max_room);
            ids.push(id);
            true
        });
        for id in ids.iter().copied().chain(input.probes.iter().copied()) {
            let _ = col.read(id);
        }
        for id in &input.probes {
            let _ = col.update(*id, b"{}");
            let _ = col.delete(*id);
        }
    }

    if let Ok(mut ht) = HashTable::open(&ht_path, &config) {
        assert!(ht.num_buckets() >= config.initial_buckets());
        let _ = ht.get_all(0);
        for key in &input.probes {
            let _ = ht.get(*key, 0);
            let _ = ht.put(*key, *key);
            ht.remove(*key, *key);
        }
    }
});
