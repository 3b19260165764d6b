//! The engine: owns configuration, the active data file, the set of retired
//! files, the index, and the transaction counter.

use crate::data_file::{self, DataFile};
use crate::error::{Error, Result};
use crate::fio::IoBackendKind;
use crate::index::{self, Indexer};
use crate::merge;
use crate::options::Options;
use crate::record::{self, LogRecord, Position, RecordKind, FINISHED_TX_KEY};
use fs4::fs_std::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Aggregate statistics returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub key_count: usize,
    pub data_file_count: usize,
    pub reclaimable_bytes: u64,
    pub disk_size: u64,
}

struct EngineState {
    active_file: DataFile,
    older_files: HashMap<u32, DataFile>,
    file_ids: Vec<u32>,
}

/// The embeddable key-value engine.
pub struct Engine {
    pub(crate) options: Options,
    state: RwLock<EngineState>,
    index: Box<dyn Indexer>,
    tx_id_counter: AtomicU64,
    reclaimable_bytes: AtomicU64,
    is_merging: AtomicBool,
    _lock_file: std::fs::File,
}

impl Engine {
    /// Opens (or creates) the engine rooted at `options.dir_path`, replaying
    /// the log and any hint file to rebuild the in-memory index.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        std::fs::create_dir_all(&options.dir_path)?;
        let lock_file = acquire_lock(&options.dir_path)?;

        let non_merge_boundary = merge::load_merge_results(&options.dir_path)?;

        let mut file_ids = load_file_ids(&options.dir_path)?;
        if file_ids.is_empty() {
            file_ids.push(0);
        }

        let mut older_files = HashMap::new();
        for &id in &file_ids[..file_ids.len() - 1] {
            older_files.insert(id, DataFile::open(&options.dir_path, id, IoBackendKind::Mmap)?);
        }
        let active_id = *file_ids.last().unwrap();
        let active_file = DataFile::open(&options.dir_path, active_id, IoBackendKind::Buffered)?;

        let index = index::new_indexer(options.index, &options.dir_path)?;
        load_index_from_hint_file(&options.dir_path, index.as_ref())?;

        let state = EngineState { active_file, older_files, file_ids };
        let mut tx_id_counter = 0u64;
        let mut reclaimable_bytes = 0u64;
        load_index_from_data_files(
            &state,
            index.as_ref(),
            non_merge_boundary,
            &mut tx_id_counter,
            &mut reclaimable_bytes,
        )?;

        log_tx_id_sidecar(&options.dir_path);
        log::info!("opened engine at {}", options.dir_path.display());

        Ok(Self {
            options,
            state: RwLock::new(state),
            index,
            tx_id_counter: AtomicU64::new(tx_id_counter),
            reclaimable_bytes: AtomicU64::new(reclaimable_bytes),
            is_merging: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let record = LogRecord { key: record::key_with_tx_id(key, 0), value: value.to_vec(), kind: RecordKind::Normal };
        let pos = self.append_log_record(&record)?;
        let old = self.index.put(key, pos)?;
        if let Some(old) = old {
            self.reclaimable_bytes.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let pos = self.index.get(key).ok_or(Error::NotFound)?;
        self.read_value_at(pos)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }
        let record = LogRecord { key: record::key_with_tx_id(key, 0), value: Vec::new(), kind: RecordKind::Deleted };
        let pos = self.append_log_record(&record)?;
        self.reclaimable_bytes.fetch_add(pos.size as u64, Ordering::SeqCst);
        if let Some(old) = self.index.delete(key)? {
            self.reclaimable_bytes.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn new_iterator(&self, opts: crate::options::IteratorOptions) -> crate::iterator::EngineIterator<'_> {
        crate::iterator::EngineIterator::new(self, opts)
    }

    pub fn new_batch(&self, opts: crate::options::BatchOptions) -> crate::batch::Batch<'_> {
        crate::batch::Batch::new(self, opts)
    }

    /// Iterates forward over all live keys, stopping early when `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut it = self.index.iterator(false);
        it.rewind();
        while it.valid() {
            let value = self.read_value_at(it.value())?;
            if !f(it.key(), &value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut it = self.index.iterator(false);
        it.rewind();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        keys
    }

    pub fn merge(&self) -> Result<()> {
        merge::run(self)
    }

    pub fn sync(&self) -> Result<()> {
        self.state.read().active_file.sync()
    }

    pub fn close(&self) -> Result<()> {
        let state = self.state.write();
        state.active_file.sync()?;
        for file in state.older_files.values() {
            file.sync()?;
        }
        self.index.close()?;
        if let Err(err) = write_tx_id_sidecar(&self.options.dir_path, self.tx_id_counter.load(Ordering::SeqCst)) {
            log::warn!("failed to write tx id sidecar: {err}");
        }
        Ok(())
    }

    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        let mut disk_size = 0u64;
        for entry in std::fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                disk_size += entry.metadata()?.len();
            }
        }
        Ok(Stat {
            key_count: self.index.size(),
            data_file_count: state.older_files.len() + 1,
            reclaimable_bytes: self.reclaimable_bytes.load(Ordering::SeqCst),
            disk_size,
        })
    }

    /// Appends `record` to the active file, rotating it first if the write
    /// would exceed `data_file_size`. Returns the position the record landed at.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<Position> {
        let mut state = self.state.write();
        let bytes = record.encode();
        let size = bytes.len() as u64;

        if state.active_file.write_off() + size > self.options.data_file_size {
            state.active_file.sync()?;
            let old_id = state.active_file.file_id();
            let new_id = old_id + 1;
            let new_active = DataFile::open(&self.options.dir_path, new_id, IoBackendKind::Buffered)?;
            let old_active = std::mem::replace(&mut state.active_file, new_active);
            state.older_files.insert(old_id, old_active);
            state.file_ids.push(new_id);
        }

        let file_id = state.active_file.file_id();
        let offset = state.active_file.append(&bytes)?;
        if self.options.sync_writes {
            state.active_file.sync()?;
        }
        Ok(Position { file_id, offset, size: size as u32 })
    }

    /// Resolves `pos` to its value, used by `get`, iteration, and `fold`.
    pub(crate) fn read_value_at(&self, pos: Position) -> Result<Vec<u8>> {
        let state = self.state.read();
        let file = if pos.file_id == state.active_file.file_id() {
            &state.active_file
        } else {
            state.older_files.get(&pos.file_id).ok_or(Error::NotFound)?
        };
        let (record, _) = file.read_record_at(pos.offset)?;
        if record.kind == RecordKind::Deleted {
            return Err(Error::NotFound);
        }
        Ok(record.value)
    }

    pub(crate) fn index(&self) -> &dyn Indexer {
        self.index.as_ref()
    }

    pub(crate) fn is_merging(&self) -> &AtomicBool {
        &self.is_merging
    }

    pub(crate) fn next_tx_id(&self) -> u64 {
        self.tx_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn add_reclaimable(&self, n: u64) {
        self.reclaimable_bytes.fetch_add(n, Ordering::SeqCst);
    }

    /// Retires the current active file under the write lock and opens a
    /// fresh one, returning its file id (the merge's non-merge boundary) and
    /// a sorted snapshot of every now-retired file id.
    pub(crate) fn begin_merge(&self) -> Result<(u32, Vec<u32>)> {
        let mut state = self.state.write();
        state.active_file.sync()?;
        let old_active_id = state.active_file.file_id();
        let new_id = old_active_id + 1;
        let new_active = DataFile::open(&self.options.dir_path, new_id, IoBackendKind::Buffered)?;
        let old_active = std::mem::replace(&mut state.active_file, new_active);
        state.older_files.insert(old_active_id, old_active);
        state.file_ids.push(new_id);

        let mut snapshot: Vec<u32> = state.older_files.keys().copied().collect();
        snapshot.sort_unstable();
        Ok((new_id, snapshot))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("failed to flush engine on drop: {err}");
        }
    }
}

fn acquire_lock(dir_path: &Path) -> Result<std::fs::File> {
    let path = dir_path.join(data_file::LOCK_FILE_NAME);
    let file = std::fs::OpenOptions::new().create(true).read(true).write(true).open(path)?;
    file.try_lock_exclusive().map_err(|_| Error::DatabaseInUse)?;
    Ok(file)
}

fn load_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir_path)? {
        let entry = entry?;
        if let Some(id) = data_file::parse_file_id(&entry.file_name().to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn load_index_from_hint_file(dir_path: &Path, index: &dyn Indexer) -> Result<()> {
    if !dir_path.join(data_file::HINT_FILE_NAME).exists() {
        return Ok(());
    }
    let hint_file = DataFile::open_hint_file(dir_path)?;
    let mut offset = 0u64;
    loop {
        match hint_file.read_record_at(offset) {
            Ok((record, size)) => {
                if let Some(pos) = Position::decode(&record.value) {
                    index.put(&record.key, pos)?;
                }
                offset += size;
            }
            Err(Error::NotFound) | Err(Error::CorruptRecord) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Replays every data file from offset 0, honoring batch atomicity: a batch
/// whose terminator was never written is silently discarded. `reclaimable`
/// accumulates the size of every log record superseded or tombstoned during
/// the replay, so the invariant from `stat().reclaimable_bytes` holds right
/// after recovery rather than only from writes made after this open.
fn load_index_from_data_files(
    state: &EngineState,
    index: &dyn Indexer,
    non_merge_boundary: Option<u32>,
    tx_id_counter: &mut u64,
    reclaimable: &mut u64,
) -> Result<()> {
    let active_id = state.active_file.file_id();
    let mut stash: HashMap<u64, Vec<(Vec<u8>, RecordKind, Position)>> = HashMap::new();

    for &file_id in &state.file_ids {
        if let Some(boundary) = non_merge_boundary {
            if file_id < boundary {
                continue;
            }
        }
        let file: &DataFile =
            if file_id == active_id { &state.active_file } else { &state.older_files[&file_id] };

        let mut offset = 0u64;
        loop {
            let (record, size) = match file.read_record_at(offset) {
                Ok(v) => v,
                Err(Error::NotFound) | Err(Error::CorruptRecord) => break,
                Err(err) => return Err(err),
            };
            let pos = Position { file_id, offset, size: size as u32 };
            let (user_key, tx_id) = record::parse_key(&record.key);

            if tx_id == 0 {
                apply(index, &user_key, record.kind, pos, reclaimable)?;
            } else if user_key == FINISHED_TX_KEY {
                if let Some(staged) = stash.remove(&tx_id) {
                    for (key, kind, staged_pos) in staged {
                        apply(index, &key, kind, staged_pos, reclaimable)?;
                    }
                }
            } else {
                stash.entry(tx_id).or_default().push((user_key, record.kind, pos));
            }

            *tx_id_counter = (*tx_id_counter).max(tx_id);
            offset += size;
        }
    }
    Ok(())
}

/// Applies one replayed record to `index`, crediting `reclaimable` with the
/// size of whatever it superseded exactly as the live `put`/`delete` do.
fn apply(index: &dyn Indexer, key: &[u8], kind: RecordKind, pos: Position, reclaimable: &mut u64) -> Result<()> {
    match kind {
        RecordKind::Deleted => {
            *reclaimable += pos.size as u64;
            if let Some(old) = index.delete(key)? {
                *reclaimable += old.size as u64;
            }
        }
        RecordKind::Normal => {
            if let Some(old) = index.put(key, pos)? {
                *reclaimable += old.size as u64;
            }
        }
    }
    Ok(())
}

fn write_tx_id_sidecar(dir_path: &Path, tx_id: u64) -> Result<()> {
    let file = DataFile::open_tx_id_sidecar(dir_path)?;
    let record = LogRecord { key: b"txID".to_vec(), value: tx_id.to_string().into_bytes(), kind: RecordKind::Normal };
    file.append(&record.encode())?;
    file.sync()
}

/// Best-effort read of the `txID-Now` sidecar left by the previous `close`,
/// logged purely as a diagnostic hint. Never load-bearing: the authoritative
/// counter is always recomputed from the log replay above.
fn log_tx_id_sidecar(dir_path: &Path) {
    if !dir_path.join(data_file::TX_ID_SIDECAR_NAME).exists() {
        return;
    }
    let read = (|| -> Result<u64> {
        let file = DataFile::open_tx_id_sidecar(dir_path)?;
        let (record, _) = file.read_record_at(0)?;
        String::from_utf8_lossy(&record.value).parse::<u64>().map_err(|_| Error::CorruptDirectory)
    })();
    match read {
        Ok(tx_id) => log::info!("previous close recorded tx id {tx_id}"),
        Err(err) => log::warn!("failed to read tx id sidecar: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BatchOptions, IndexType, IteratorOptions};

    fn opts(dir: &Path) -> Options {
        Options { dir_path: dir.to_path_buf(), ..Default::default() }
    }

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        engine.delete(b"a").unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::NotFound)));
        assert_eq!(engine.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(matches!(engine.put(b"", b"x"), Err(Error::EmptyKey)));
        assert!(matches!(engine.get(b""), Err(Error::EmptyKey)));
        assert!(matches!(engine.delete(b""), Err(Error::EmptyKey)));
    }

    #[test]
    fn delete_of_missing_key_is_idempotent() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(engine.delete(b"missing").is_ok());
    }

    #[test]
    fn rotation_produces_multiple_data_files() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let engine = Engine::open(Options { data_file_size: 64, ..opts(dir.path()) }).unwrap();
        for i in 0..10u32 {
            engine.put(format!("key-{i}").as_bytes(), b"some value bytes").unwrap();
        }
        for i in 0..10u32 {
            assert_eq!(engine.get(format!("key-{i}").as_bytes()).unwrap(), b"some value bytes");
        }
        let stat = engine.stat().unwrap();
        assert!(stat.data_file_count >= 2);
    }

    #[test]
    fn recovery_restores_all_keys_after_reopen() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            for i in 0..100u32 {
                engine.put(format!("key-{i}").as_bytes(), format!("value-{i}").as_bytes()).unwrap();
            }
        }
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert_eq!(engine.list_keys().len(), 100);
        for i in 0..100u32 {
            assert_eq!(engine.get(format!("key-{i}").as_bytes()).unwrap(), format!("value-{i}").as_bytes());
        }
    }

    #[test]
    fn recovery_with_adaptive_radix_index() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine =
                Engine::open(Options { index: IndexType::AdaptiveRadix, ..opts(dir.path()) }).unwrap();
            engine.put(b"apple", b"1").unwrap();
            engine.put(b"application", b"2").unwrap();
        }
        let engine = Engine::open(Options { index: IndexType::AdaptiveRadix, ..opts(dir.path()) }).unwrap();
        assert_eq!(engine.get(b"apple").unwrap(), b"1");
        assert_eq!(engine.get(b"application").unwrap(), b"2");
    }

    #[test]
    fn batch_commit_is_visible_after_reopen() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            let batch = engine.new_batch(BatchOptions::default());
            batch.put(b"x", b"1").unwrap();
            batch.put(b"y", b"2").unwrap();
            batch.commit().unwrap();
        }
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert_eq!(engine.get(b"x").unwrap(), b"1");
        assert_eq!(engine.get(b"y").unwrap(), b"2");
    }

    #[test]
    fn uncommitted_batch_is_discarded_on_recovery() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            // Simulate a crash before the batch terminator is written: append
            // the staged records' on-disk frames directly, bypassing commit().
            let tx_id = engine.next_tx_id();
            let rec_x = LogRecord { key: record::key_with_tx_id(b"x", tx_id), value: b"1".to_vec(), kind: RecordKind::Normal };
            let rec_y = LogRecord { key: record::key_with_tx_id(b"y", tx_id), value: b"2".to_vec(), kind: RecordKind::Normal };
            engine.append_log_record(&rec_x).unwrap();
            engine.append_log_record(&rec_y).unwrap();
        }
        let engine = Engine::open(opts(dir.path())).unwrap();
        assert!(matches!(engine.get(b"x"), Err(Error::NotFound)));
        assert!(matches!(engine.get(b"y"), Err(Error::NotFound)));
    }

    #[test]
    fn iterator_with_prefix_filters_and_orders() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let engine = Engine::open(opts(dir.path())).unwrap();
        engine.put(b"apple", b"1").unwrap();
        engine.put(b"apricot", b"2").unwrap();
        engine.put(b"banana", b"3").unwrap();

        let mut it = engine.new_iterator(IteratorOptions { prefix: Some(b"ap".to_vec()), reverse: false });
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"apple".to_vec(), b"apricot".to_vec()]);

        let mut it = engine.new_iterator(IteratorOptions { prefix: Some(b"ap".to_vec()), reverse: true });
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"apricot".to_vec(), b"apple".to_vec()]);
    }

    #[test]
    fn merge_reclaims_space_and_keeps_latest_value() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let before_disk_size = {
            let engine = Engine::open(Options { data_file_size: 256, ..opts(dir.path()) }).unwrap();
            for i in 0..1000u32 {
                engine.put(b"k", format!("value-{i}").as_bytes()).unwrap();
            }
            let before = engine.stat().unwrap();
            assert!(before.reclaimable_bytes > 0);

            engine.merge().unwrap();
            assert_eq!(engine.get(b"k").unwrap(), b"value-999");
            before.disk_size
        };

        // The primary directory's old files are only deleted on the next
        // open, once `load_merge_results` has applied the merge directory.
        let engine = Engine::open(Options { data_file_size: 256, ..opts(dir.path()) }).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"value-999");
        let after = engine.stat().unwrap();
        assert!(after.disk_size < before_disk_size);
    }

    #[test]
    fn reclaimable_bytes_survive_recovery() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine = Engine::open(opts(dir.path())).unwrap();
            for i in 0..100u32 {
                engine.put(b"k", format!("value-{i}").as_bytes()).unwrap();
            }
        }
        let engine = Engine::open(opts(dir.path())).unwrap();
        let stat = engine.stat().unwrap();
        assert!(stat.reclaimable_bytes > 0);
        assert!(engine.merge().is_ok());
    }

    #[test]
    fn merge_survives_reopen() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        {
            let engine = Engine::open(Options { data_file_size: 256, ..opts(dir.path()) }).unwrap();
            for i in 0..200u32 {
                engine.put(b"k", format!("value-{i}").as_bytes()).unwrap();
            }
            engine.merge().unwrap();
        }
        let engine = Engine::open(Options { data_file_size: 256, ..opts(dir.path()) }).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"value-199");
    }

    #[test]
    fn second_lock_attempt_fails_while_open() {
        let dir = tempfile::TempDir::with_prefix("bitcaskdb").unwrap();
        let _engine = Engine::open(opts(dir.path())).unwrap();
        let second = Engine::open(opts(dir.path()));
        assert!(matches!(second, Err(Error::DatabaseInUse)));
    }
}
