use super::IoBackend;
use crate::error::{Error, Result};
use memmap2::Mmap;
use std::path::Path;

/// A read-only memory-mapped backend, used only during recovery to scan
/// retired (immutable) data files quickly. Writes always fail.
pub struct MmapIo {
    mmap: Mmap,
}

impl MmapIo {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).read(true).write(true).open(path)?;
        // SAFETY: the mapped file is a retired, append-only log file that this
        // process does not concurrently write to via this backend.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl IoBackend for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(self.mmap.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&self.mmap[offset..end]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::ReadOnlyBackend)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}
