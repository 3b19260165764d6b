use super::{IndexIterator, Indexer};
use crate::error::Result;
use crate::record::Position;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The default index backend: a balanced ordered map behind a single
/// reader-writer lock. Concurrent readers are permitted; writers exclusive.
pub struct OrderedTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl OrderedTreeIndex {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for OrderedTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        Ok(self.tree.write().insert(key.to_vec(), pos))
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        Ok(self.tree.write().remove(key))
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries: Vec<(Vec<u8>, Position)> = self.tree.read().iter().map(|(k, v)| (k.clone(), *v)).collect();
        Box::new(SortedSnapshotIterator { entries, reverse, pos: None })
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// An iterator over an ascending-order snapshot, usable in forward or
/// reverse traversal. Shared by the ordered-tree and radix-tree backends,
/// both of which materialize a sorted `Vec` at construction time.
pub(crate) struct SortedSnapshotIterator {
    pub(crate) entries: Vec<(Vec<u8>, Position)>,
    pub(crate) reverse: bool,
    pub(crate) pos: Option<usize>,
}

impl IndexIterator for SortedSnapshotIterator {
    fn rewind(&mut self) {
        self.pos = if self.entries.is_empty() {
            None
        } else if self.reverse {
            Some(self.entries.len() - 1)
        } else {
            Some(0)
        };
    }

    fn seek(&mut self, key: &[u8]) {
        let idx = super::lower_bound(&self.entries, key);
        if !self.reverse {
            self.pos = if idx < self.entries.len() { Some(idx) } else { None };
            return;
        }
        if idx < self.entries.len() && self.entries[idx].0 == key {
            self.pos = Some(idx);
        } else if idx == 0 {
            self.pos = None;
        } else {
            self.pos = Some(idx - 1);
        }
    }

    fn next(&mut self) {
        self.pos = match self.pos {
            None => None,
            Some(p) => {
                if self.reverse {
                    if p == 0 {
                        None
                    } else {
                        Some(p - 1)
                    }
                } else if p + 1 < self.entries.len() {
                    Some(p + 1)
                } else {
                    None
                }
            }
        };
    }

    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos.expect("key() called on invalid iterator")].0
    }

    fn value(&self) -> Position {
        self.entries[self.pos.expect("value() called on invalid iterator")].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_iteration_order() {
        let idx = OrderedTreeIndex::new();
        for (i, k) in [b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()].into_iter().enumerate() {
            idx.put(&k, Position { file_id: 0, offset: i as u64, size: 1 }).unwrap();
        }
        let mut it = idx.iterator(true);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"cherry".to_vec(), b"banana".to_vec(), b"apple".to_vec()]);
    }

    #[test]
    fn seek_forward_positions_at_first_key_geq() {
        let idx = OrderedTreeIndex::new();
        for k in [b"a".to_vec(), b"c".to_vec(), b"e".to_vec()] {
            idx.put(&k, Position { file_id: 0, offset: 0, size: 1 }).unwrap();
        }
        let mut it = idx.iterator(false);
        it.seek(b"b");
        assert_eq!(it.key(), b"c");
    }

    #[test]
    fn seek_reverse_positions_at_first_key_leq() {
        let idx = OrderedTreeIndex::new();
        for k in [b"a".to_vec(), b"c".to_vec(), b"e".to_vec()] {
            idx.put(&k, Position { file_id: 0, offset: 0, size: 1 }).unwrap();
        }
        let mut it = idx.iterator(true);
        it.seek(b"d");
        assert_eq!(it.key(), b"c");
    }
}
