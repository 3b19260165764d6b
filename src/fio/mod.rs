//! File I/O backends.
//!
//! Two backends share one contract: a buffered, appendable file for normal
//! operation, and a read-only memory-mapped backend used for fast sequential
//! scans during recovery.

mod file;
mod mmap;

pub use file::FileIo;
pub use mmap::MmapIo;

use crate::error::Result;

/// Common contract for a data file's underlying storage.
pub trait IoBackend: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    /// Appends `buf` to the end of the file, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize>;
    /// Flushes any buffered data to stable storage.
    fn sync(&self) -> Result<()>;
    /// Returns the current size of the underlying file.
    fn size(&self) -> Result<u64>;
}

/// Which backend to use for a given data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBackendKind {
    Buffered,
    Mmap,
}

pub fn open<P: AsRef<std::path::Path>>(path: P, kind: IoBackendKind) -> Result<Box<dyn IoBackend>> {
    match kind {
        IoBackendKind::Buffered => Ok(Box::new(FileIo::new(path)?)),
        IoBackendKind::Mmap => Ok(Box::new(MmapIo::new(path)?)),
    }
}
