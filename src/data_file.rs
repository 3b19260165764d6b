//! The data file: one append-only segment of the log, wrapping an I/O
//! backend with a monotonically growing write offset.

use crate::error::{Error, Result};
use crate::fio::{self, IoBackend, IoBackendKind};
use crate::record::{self, LogRecord, Position, MAX_HEADER_SIZE};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const TX_ID_SIDECAR_NAME: &str = "txID-Now";
pub const LOCK_FILE_NAME: &str = "lockFile";

/// One append-only log segment.
pub struct DataFile {
    file_id: AtomicU32,
    write_off: RwLock<u64>,
    io: Box<dyn IoBackend>,
}

/// Formats the canonical `%09d.data` file name for `file_id`.
pub fn data_file_name<P: AsRef<Path>>(dir: P, file_id: u32) -> PathBuf {
    dir.as_ref().join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

impl DataFile {
    pub fn open<P: AsRef<Path>>(dir: P, file_id: u32, backend: IoBackendKind) -> Result<Self> {
        let io = fio::open(data_file_name(&dir, file_id), backend)?;
        let write_off = io.size()?;
        Ok(Self { file_id: AtomicU32::new(file_id), write_off: RwLock::new(write_off), io })
    }

    fn open_named<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let io = fio::open(dir.as_ref().join(name), IoBackendKind::Buffered)?;
        let write_off = io.size()?;
        Ok(Self { file_id: AtomicU32::new(0), write_off: RwLock::new(write_off), io })
    }

    pub fn open_hint_file<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_named(dir, HINT_FILE_NAME)
    }

    pub fn open_merge_finished_file<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_named(dir, MERGE_FINISHED_FILE_NAME)
    }

    pub fn open_tx_id_sidecar<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_named(dir, TX_ID_SIDECAR_NAME)
    }

    pub fn file_id(&self) -> u32 {
        self.file_id.load(Ordering::SeqCst)
    }

    pub fn write_off(&self) -> u64 {
        *self.write_off.read()
    }

    pub fn set_write_off(&self, offset: u64) {
        *self.write_off.write() = offset;
    }

    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Appends `bytes`, advancing the write offset, and returns the offset
    /// the write started at.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut write_off = self.write_off.write();
        let offset = *write_off;
        let n = self.io.write(bytes)?;
        *write_off += n as u64;
        Ok(offset)
    }

    pub fn write_hint_record(&self, user_key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord { key: user_key.to_vec(), value: pos.encode(), kind: record::RecordKind::Normal };
        self.append(&record.encode())?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Reads and decodes the record at `offset`, returning it along with the
    /// number of bytes it occupied on disk.
    pub fn read_record_at(&self, offset: u64) -> Result<(LogRecord, u64)> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(Error::NotFound);
        }
        let header_len = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_len];
        self.io.read_at(&mut header_buf, offset)?;

        let (header, header_size) = record::decode_header(&header_buf).ok_or(Error::NotFound)?;

        let kv_len = header.key_size + header.value_size;
        let mut kv_buf = vec![0u8; kv_len];
        self.io.read_at(&mut kv_buf, offset + header_size as u64)?;
        let key = kv_buf[..header.key_size].to_vec();
        let value = kv_buf[header.key_size..].to_vec();

        if !record::verify_crc(&header_buf[4..header_size], &key, &value, header.crc) {
            return Err(Error::CorruptRecord);
        }

        let total = header_size as u64 + kv_len as u64;
        Ok((LogRecord { key, value, kind: header.kind }, total))
    }
}

/// Parses the numeric file id out of a `%09d.data` file name, if it matches.
pub fn parse_file_id(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(DATA_FILE_SUFFIX)?;
    stem.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fio::IoBackendKind;
    use crate::record::RecordKind;

    #[test]
    fn write_and_read_back_multiple_records() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let file = DataFile::open(dir.path(), 0, IoBackendKind::Buffered).unwrap();

        let a = LogRecord { key: b"key-a".to_vec(), value: b"value-a".to_vec(), kind: RecordKind::Normal };
        let b = LogRecord { key: b"key-b".to_vec(), value: b"value-b".to_vec(), kind: RecordKind::Normal };
        let off_a = file.append(&a.encode()).unwrap();
        let off_b = file.append(&b.encode()).unwrap();

        let (read_a, size_a) = file.read_record_at(off_a).unwrap();
        assert_eq!(read_a, a);
        let (read_b, _) = file.read_record_at(off_b).unwrap();
        assert_eq!(read_b, b);
        assert_eq!(off_b, off_a + size_a);
    }

    #[test]
    fn corrupt_record_is_detected() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let file = DataFile::open(dir.path(), 0, IoBackendKind::Buffered).unwrap();
        let rec = LogRecord { key: b"key".to_vec(), value: b"value".to_vec(), kind: RecordKind::Normal };
        file.append(&rec.encode()).unwrap();

        // Corrupt the on-disk bytes directly.
        let path = data_file_name(dir.path(), 0);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let file2 = DataFile::open(dir.path(), 0, IoBackendKind::Buffered).unwrap();
        assert!(matches!(file2.read_record_at(0), Err(Error::CorruptRecord)));
    }

    #[test]
    fn file_id_parsing() {
        assert_eq!(parse_file_id("000000003.data"), Some(3));
        assert_eq!(parse_file_id("hint-index"), None);
        assert_eq!(parse_file_id("notanumber.data"), None);
    }
}
