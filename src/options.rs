//! Engine configuration.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Which in-memory (or on-disk) index backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    #[default]
    OrderedTree,
    AdaptiveRadix,
    BPlusTree,
}

/// Engine configuration, validated eagerly by [`crate::Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory. Must be non-empty.
    pub dir_path: PathBuf,
    /// Active-file rotation threshold, in bytes. Must be > 0.
    pub data_file_size: u64,
    /// Whether to fsync the active file after every append.
    pub sync_writes: bool,
    /// Which index backend to use.
    pub index: IndexType,
    /// Minimum `reclaimable / total` ratio required before `merge()` proceeds.
    pub merge_ratio: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::new(),
            data_file_size: 1024 * 1024,
            sync_writes: true,
            index: IndexType::default(),
            merge_ratio: 0.5,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOption("dir_path must not be empty"));
        }
        if self.data_file_size == 0 {
            return Err(Error::InvalidOption("data_file_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(Error::InvalidOption("merge_ratio must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Options governing how a [`crate::batch::Batch`] is committed.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub sync_write: bool,
    pub max_batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { sync_write: true, max_batch_size: 10_000 }
    }
}

/// Options governing a [`crate::iterator::EngineIterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    pub prefix: Option<Vec<u8>>,
    pub reverse: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_dir_path() {
        let opts = Options { dir_path: PathBuf::new(), ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn rejects_zero_data_file_size() {
        let opts = Options { dir_path: PathBuf::from("/tmp/x"), data_file_size: 0, ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn rejects_out_of_range_merge_ratio() {
        let opts = Options { dir_path: PathBuf::from("/tmp/x"), merge_ratio: 1.5, ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn accepts_defaults_with_dir_path_set() {
        let opts = Options { dir_path: PathBuf::from("/tmp/x"), ..Default::default() };
        assert!(opts.validate().is_ok());
    }
}
