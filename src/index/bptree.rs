//! On-disk B+Tree index backend, for data sets too large to hold the whole
//! index in memory.
//!
//! Grounded in `original_source/index/btree_disk.go`: one bucket holds the
//! whole key space, and every operation opens its own transaction. No
//! embedded B+Tree crate appears in `bitcask.rs` itself, so the backend
//! follows the `jammdb` usage shown in the `flash-kv` and `bitkv-rs`
//! manifests, the closest Rust analogue of the original's `bbolt` dependency.

use super::btree::SortedSnapshotIterator;
use super::{IndexIterator, Indexer};
use crate::error::Result;
use crate::record::Position;
use jammdb::DB;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

const BUCKET_NAME: &str = "bitcaskdb-index";
const INDEX_FILE_NAME: &str = "bptree-index";

pub struct BPlusTreeIndex {
    db: DB,
    len: AtomicUsize,
}

impl BPlusTreeIndex {
    pub fn open(dir_path: &Path) -> Result<Self> {
        let db = DB::open(dir_path.join(INDEX_FILE_NAME))?;
        let len = {
            let tx = db.tx(true)?;
            let bucket = tx.get_or_create_bucket(BUCKET_NAME)?;
            let n = bucket.cursor().count();
            tx.commit()?;
            n
        };
        Ok(Self { db, len: AtomicUsize::new(len) })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME)?;
        let prev = bucket.get(key).and_then(|data| Position::decode(data.kv().value()));
        bucket.put(key.to_vec(), pos.encode())?;
        tx.commit()?;
        if prev.is_none() {
            self.len.fetch_add(1, Ordering::SeqCst);
        }
        Ok(prev)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        let tx = self.db.tx(false).ok()?;
        let bucket = tx.get_bucket(BUCKET_NAME).ok()?;
        let data = bucket.get(key)?;
        Position::decode(data.kv().value())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        let tx = self.db.tx(true)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME)?;
        let prev = match bucket.delete(key) {
            Ok(data) => Position::decode(data.value()),
            Err(_) => None,
        };
        tx.commit()?;
        if prev.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(prev)
    }

    fn size(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Opens a read transaction, copies the bucket into a sorted snapshot,
    /// and drops the transaction before returning. See DESIGN.md's Open
    /// Question entry on this backend for why a cursor held open across the
    /// iterator's lifetime was not pursued here.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries = self.collect_entries().unwrap_or_default();
        Box::new(SortedSnapshotIterator { entries, reverse, pos: None })
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl BPlusTreeIndex {
    fn collect_entries(&self) -> Result<Vec<(Vec<u8>, Position)>> {
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let mut entries = Vec::new();
        for data in bucket.cursor() {
            let kv = data.kv();
            if let Some(pos) = Position::decode(kv.value()) {
                entries.push((kv.key().to_vec(), pos));
            }
        }
        Ok(entries)
    }
}
