//! # Partition Locking Tests
//!
//! Exercises the two-tier locking discipline: a read/write lock around the
//! partition for structural access, and the partition's non-blocking per-ID
//! update locks for read, modify, write sequences.

use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tempfile::tempdir;
use turdoc::{error_kind, Config, ErrorKind, Partition};

fn config() -> Config {
    Config {
        doc_max_room: 4096,
        col_file_growth: 256 * 1024,
        per_bucket: 8,
        ht_file_growth: 256 * 1024,
        hash_bits: 8,
    }
}

fn open_shared(dir: &std::path::Path) -> Arc<RwLock<Partition>> {
    let part = Partition::open(dir.join("0.col"), dir.join("0.lookup"), &config()).unwrap();
    Arc::new(RwLock::new(part))
}

fn read_counter(part: &Partition, id: u64) -> u64 {
    let doc: Value = serde_json::from_slice(&part.read(id).unwrap()).unwrap();
    doc["n"].as_u64().unwrap()
}

#[test]
fn only_one_thread_wins_the_update_lock() {
    let dir = tempdir().unwrap();
    let part = open_shared(dir.path());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let part = Arc::clone(&part);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                part.read().lock_update(42).is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let err = part.read().lock_update(42).unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::Locked);
    part.read().unlock_update(42);
    assert!(part.read().lock_update(42).is_ok());
}

#[test]
fn concurrent_read_modify_write_on_disjoint_ids() {
    let dir = tempdir().unwrap();
    let part = open_shared(dir.path());
    let ids: Vec<u64> = (1..=4).collect();
    for id in &ids {
        part.write()
            .insert(*id, json!({"n": 0}).to_string().as_bytes())
            .unwrap();
    }
    let rounds = 50;

    thread::scope(|s| {
        for id in &ids {
            for _ in 0..2 {
                let part = Arc::clone(&part);
                s.spawn(move || {
                    let mut done = 0;
                    while done < rounds {
                        if part.read().lock_update(*id).is_err() {
                            thread::yield_now();
                            continue;
                        }
                        let n = read_counter(&part.read(), *id);
                        let doc = json!({"n": n + 1, "pad": "x".repeat((n % 7) as usize * 40)});
                        part.write().update(*id, doc.to_string().as_bytes()).unwrap();
                        part.read().unlock_update(*id);
                        done += 1;
                    }
                });
            }
        }
    });

    let part = part.read();
    for id in &ids {
        assert_eq!(read_counter(&part, *id), 2 * rounds);
        assert_eq!(part.lookup().get(*id, 0).len(), 1);
        assert!(!part.is_locked(*id));
    }
}

#[test]
fn readers_run_while_no_writer_holds_the_partition() {
    let dir = tempdir().unwrap();
    let part = open_shared(dir.path());
    for id in 0..100u64 {
        part.write()
            .insert(id, json!({"n": id}).to_string().as_bytes())
            .unwrap();
    }

    thread::scope(|s| {
        for t in 0..4u64 {
            let part = Arc::clone(&part);
            s.spawn(move || {
                let guard = part.read();
                for id in (t..100).step_by(4) {
                    assert_eq!(read_counter(&guard, id), id);
                }
                let mut count = 0;
                guard
                    .for_each_doc(|_, _| {
                        count += 1;
                        true
                    })
                    .unwrap();
                assert_eq!(count, 100);
            });
        }
    });
}
