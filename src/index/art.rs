//! A small adaptive radix tree: a byte-indexed, path-compressed trie.
//!
//! `original_source/index/radix.go` just wraps an opaque third-party Go
//! library (`plar/go-adaptive-radix-tree`), so there is no algorithm to port
//! directly; no equivalent crate exists anywhere in the retrieval pack
//! either, so the trie below is a from-scratch implementation sized to the
//! budget. Because children are indexed by byte value (0..=255), an in-order
//! traversal yields keys in ascending lexicographic order for free.

use super::btree::SortedSnapshotIterator;
use super::{IndexIterator, Indexer};
use crate::error::Result;
use crate::record::Position;
use parking_lot::RwLock;

struct Node {
    /// The compressed edge label leading into this node from its parent.
    prefix: Vec<u8>,
    /// Value stored if a key terminates exactly at this node.
    value: Option<Position>,
    /// Children indexed by the next byte after `prefix`.
    children: Vec<(u8, Box<Node>)>,
}

impl Node {
    fn new(prefix: Vec<u8>) -> Self {
        Self { prefix, value: None, children: Vec::new() }
    }

    fn child_index(&self, byte: u8) -> std::result::Result<usize, usize> {
        self.children.binary_search_by_key(&byte, |(b, _)| *b)
    }
}

/// Space-efficient index for long shared-prefix keys, backed by a
/// hand-rolled radix trie behind a single reader-writer lock.
pub struct RadixTreeIndex {
    root: RwLock<Node>,
    len: RwLock<usize>,
}

impl RadixTreeIndex {
    pub fn new() -> Self {
        Self { root: RwLock::new(Node::new(Vec::new())), len: RwLock::new(0) }
    }
}

/// Inserts `key[depth..]` under `node`, returning the previous value if any.
fn insert(node: &mut Node, key: &[u8], pos: Position) -> Option<Position> {
    let common = common_prefix_len(&node.prefix, key);

    if common < node.prefix.len() {
        // Split this node's edge: the shared prefix becomes a new
        // intermediate node with two children (the old node, suffix-shortened,
        // and a fresh leaf for `key` if it diverges here).
        let old_suffix = node.prefix[common..].to_vec();
        let new_suffix = key[common..].to_vec();
        let old_byte = old_suffix[0];

        let mut displaced = Node::new(old_suffix[1..].to_vec());
        displaced.value = node.value.take();
        displaced.children = std::mem::take(&mut node.children);

        node.prefix.truncate(common);
        node.children = vec![(old_byte, Box::new(displaced))];
        node.value = None;

        if new_suffix.is_empty() {
            node.value = Some(pos);
        } else {
            let mut leaf = Node::new(new_suffix[1..].to_vec());
            leaf.value = Some(pos);
            let new_byte = new_suffix[0];
            let idx = node.child_index(new_byte).unwrap_err();
            node.children.insert(idx, (new_byte, Box::new(leaf)));
        }
        return None;
    }

    // `node.prefix` fully consumed.
    let rest = &key[common..];
    if rest.is_empty() {
        return node.value.replace(pos);
    }

    let byte = rest[0];
    match node.child_index(byte) {
        Ok(idx) => insert(&mut node.children[idx].1, &rest[1..], pos),
        Err(idx) => {
            let mut leaf = Node::new(rest[1..].to_vec());
            leaf.value = Some(pos);
            node.children.insert(idx, (byte, Box::new(leaf)));
            None
        }
    }
}

fn get<'a>(node: &'a Node, key: &[u8]) -> Option<&'a Position> {
    let common = common_prefix_len(&node.prefix, key);
    if common < node.prefix.len() {
        return None;
    }
    let rest = &key[common..];
    if rest.is_empty() {
        return node.value.as_ref();
    }
    let byte = rest[0];
    let idx = node.child_index(byte).ok()?;
    get(&node.children[idx].1, &rest[1..])
}

/// Removes `key`, returning the previous value. Does not bother re-merging
/// single-child nodes after removal; a put on an overlapping key will reuse
/// the structure regardless, and the trie never returns stale values.
fn remove(node: &mut Node, key: &[u8]) -> Option<Position> {
    let common = common_prefix_len(&node.prefix, key);
    if common < node.prefix.len() {
        return None;
    }
    let rest = &key[common..];
    if rest.is_empty() {
        return node.value.take();
    }
    let byte = rest[0];
    let idx = node.child_index(byte).ok()?;
    remove(&mut node.children[idx].1, &rest[1..])
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Appends all (key, value) pairs under `node` to `out`, in ascending byte
/// order (children are kept sorted by their discriminating byte).
fn collect(node: &Node, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, Position)>) {
    prefix.extend_from_slice(&node.prefix);
    if let Some(pos) = node.value {
        out.push((prefix.clone(), pos));
    }
    for (byte, child) in &node.children {
        prefix.push(*byte);
        collect(child, prefix, out);
        prefix.pop();
    }
    prefix.truncate(prefix.len() - node.prefix.len());
}

impl Indexer for RadixTreeIndex {
    fn put(&self, key: &[u8], pos: Position) -> Result<Option<Position>> {
        let mut root = self.root.write();
        let old = insert(&mut root, key, pos);
        if old.is_none() {
            *self.len.write() += 1;
        }
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        get(&self.root.read(), key).copied()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Position>> {
        let mut root = self.root.write();
        let old = remove(&mut root, key);
        if old.is_some() {
            *self.len.write() -= 1;
        }
        Ok(old)
    }

    fn size(&self) -> usize {
        *self.len.read()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut entries = Vec::new();
        collect(&self.root.read(), &mut Vec::new(), &mut entries);
        Box::new(SortedSnapshotIterator { entries, reverse, pos: None })
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_prefix_keys() {
        let idx = RadixTreeIndex::new();
        let p = |n: u64| Position { file_id: 0, offset: n, size: 1 };
        idx.put(b"apple", p(1)).unwrap();
        idx.put(b"application", p(2)).unwrap();
        idx.put(b"app", p(3)).unwrap();
        idx.put(b"banana", p(4)).unwrap();

        assert_eq!(idx.get(b"apple"), Some(p(1)));
        assert_eq!(idx.get(b"application"), Some(p(2)));
        assert_eq!(idx.get(b"app"), Some(p(3)));
        assert_eq!(idx.get(b"banana"), Some(p(4)));
        assert_eq!(idx.get(b"appl"), None);
        assert_eq!(idx.size(), 4);

        let mut it = idx.iterator(false);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"app".to_vec(), b"apple".to_vec(), b"application".to_vec(), b"banana".to_vec()]);

        assert_eq!(idx.delete(b"apple").unwrap(), Some(p(1)));
        assert_eq!(idx.get(b"apple"), None);
        assert_eq!(idx.get(b"application"), Some(p(2)));
        assert_eq!(idx.size(), 3);
    }
}
