//! The in-memory (or on-disk) index abstraction: an ordered map from user
//! key to [`Position`].

mod art;
mod btree;
mod bptree;

use crate::error::Result;
use crate::options::IndexType;
use crate::record::Position;
use std::path::Path;

/// Contract shared by all index backends.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces `key`, returning the position it previously held, if any.
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>>;
    /// Looks up `key`.
    fn get(&self, key: &[u8]) -> Option<Position>;
    /// Removes `key`, returning the position it held, if any.
    fn delete(&self, key: &[u8]) -> Result<Option<Position>>;
    /// Number of live keys.
    fn size(&self) -> usize;
    /// A snapshot iterator over the index, in ascending or descending key order.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;
    /// Releases any resources (file handles, transactions) held by the index.
    fn close(&self) -> Result<()>;
}

/// Contract for iterating over an index snapshot.
pub trait IndexIterator {
    fn rewind(&mut self);
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> Position;
}

/// Constructs the configured index backend rooted at `dir_path` (only used
/// by the on-disk backend).
pub fn new_indexer(kind: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match kind {
        IndexType::OrderedTree => Ok(Box::new(btree::OrderedTreeIndex::new())),
        IndexType::AdaptiveRadix => Ok(Box::new(art::RadixTreeIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir_path)?)),
    }
}

/// Binary search over a sorted snapshot for the first entry `>= key`
/// (forward sense); used by the in-memory backends' `seek`.
pub(crate) fn lower_bound(entries: &[(Vec<u8>, Position)], key: &[u8]) -> usize {
    entries.partition_point(|(k, _)| k.as_slice() < key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_backend(idx: &dyn Indexer) {
        assert_eq!(idx.size(), 0);
        let p1 = Position { file_id: 0, offset: 0, size: 10 };
        let p2 = Position { file_id: 0, offset: 10, size: 20 };
        assert_eq!(idx.put(b"b", p1).unwrap(), None);
        assert_eq!(idx.put(b"a", p2).unwrap(), None);
        assert_eq!(idx.size(), 2);
        assert_eq!(idx.get(b"a"), Some(p2));
        assert_eq!(idx.put(b"a", p1).unwrap(), Some(p2));
        assert_eq!(idx.get(b"a"), Some(p1));

        let mut it = idx.iterator(false);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        assert_eq!(idx.delete(b"a").unwrap(), Some(p1));
        assert_eq!(idx.get(b"a"), None);
        assert_eq!(idx.delete(b"a").unwrap(), None);
    }

    #[test]
    fn ordered_tree_backend_contract() {
        let idx = btree::OrderedTreeIndex::new();
        exercise_backend(&idx);
    }

    #[test]
    fn radix_tree_backend_contract() {
        let idx = art::RadixTreeIndex::new();
        exercise_backend(&idx);
    }

    #[test]
    fn bplus_tree_backend_contract() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let idx = bptree::BPlusTreeIndex::open(dir.path()).unwrap();
        exercise_backend(&idx);
    }
}
