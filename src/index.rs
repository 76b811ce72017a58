//! # Secondary Indexes
//!
//! A secondary index maps the hash of an attribute value to the logical IDs
//! of the documents holding it, stored in its own [`HashTable`]. Documents
//! are JSON objects; an index is declared by a path of attribute names.
//!
//! ## Path Resolution
//!
//! ```text
//! doc:  {"a": [{"b": {"c": [4]}}, {"b": {"c": [5, 6]}}], "d": [0, 9]}
//!
//! path a.b.c  ->  4, 5, 6     arrays met mid-path fan out
//! path d      ->  0, 9        an array at the end contributes each element
//! path a.x    ->  (nothing)   missing attributes contribute nothing
//! ```
//!
//! `null` values are never indexed.
//!
//! ## Hashing
//!
//! Values are hashed with sdbm over their text form: strings without quotes,
//! numbers and booleans as printed, arrays and objects as compact JSON. So
//! `"4"` and `4` collide on purpose, and unrelated values may collide by
//! chance. A lookup yields candidate IDs that callers confirm against the
//! documents.

use std::path::Path;

use eyre::Result;
use serde_json::Value;

use crate::config::Config;
use crate::storage::HashTable;

/// Values found in `doc` along `path`, `null`s excluded.
pub fn index_values<'a, S: AsRef<str>>(doc: &'a Value, path: &[S]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    if doc.is_object() {
        collect_values(doc, path, &mut out);
    }
    out
}

fn collect_values<'a, S: AsRef<str>>(thing: &'a Value, path: &[S], out: &mut Vec<&'a Value>) {
    let mut thing = thing;
    for (i, seg) in path.iter().enumerate() {
        match thing {
            Value::Object(map) => match map.get(seg.as_ref()) {
                Some(next) => thing = next,
                None => return,
            },
            Value::Array(elements) => {
                for element in elements {
                    if element.is_object() {
                        collect_values(element, &path[i..], out);
                    }
                }
                return;
            }
            _ => return,
        }
    }

    match thing {
        Value::Array(elements) => out.extend(elements.iter().filter(|v| !v.is_null())),
        Value::Null => {}
        other => out.push(other),
    }
}

/// sdbm hash of the value's text form.
pub fn str_hash(value: &Value) -> u64 {
    match value {
        Value::String(s) => sdbm(s),
        other => sdbm(&other.to_string()),
    }
}

fn sdbm(text: &str) -> u64 {
    text.chars().fold(0u64, |hash, c| {
        (c as u64)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash)
    })
}

#[derive(Debug)]
pub struct SecondaryIndex {
    path: Vec<String>,
    table: HashTable,
}

impl SecondaryIndex {
    pub fn open<P: AsRef<Path>, S: AsRef<str>>(
        table_path: P,
        attr_path: &[S],
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            path: attr_path.iter().map(|s| s.as_ref().to_string()).collect(),
            table: HashTable::open(table_path, config)?,
        })
    }

    pub fn index_doc(&mut self, id: u64, doc: &Value) -> Result<()> {
        for value in index_values(doc, &self.path) {
            self.table.put(str_hash(value), id)?;
        }
        Ok(())
    }

    pub fn unindex_doc(&mut self, id: u64, doc: &Value) {
        for value in index_values(doc, &self.path) {
            self.table.remove(str_hash(value), id);
        }
    }

    /// Candidate IDs of documents holding `value` on the indexed path.
    pub fn lookup(&self, value: &Value, limit: u64) -> Vec<u64> {
        self.table.get(str_hash(value), limit)
    }

    pub fn attr_path(&self) -> &[String] {
        &self.path
    }

    pub fn table(&self) -> &HashTable {
        &self.table
    }

    pub fn clear(&mut self) -> Result<()> {
        self.table.clear()
    }

    pub fn flush(&self) -> Result<()> {
        self.table.flush()
    }

    pub fn close(self) -> Result<()> {
        self.table.close()
    }

    pub(crate) fn replace_table(&mut self, table: HashTable) -> HashTable {
        std::mem::replace(&mut self.table, table)
    }
}
