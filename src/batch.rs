//! Transactional batch writes, committed atomically via a shared `txId` and
//! a terminator record.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::BatchOptions;
use crate::record::{self, LogRecord, RecordKind, FINISHED_TX_KEY};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A set of staged mutations, published to the index together on [`Batch::commit`].
pub struct Batch<'engine> {
    engine: &'engine Engine,
    options: BatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'engine> Batch<'engine> {
    pub(crate) fn new(engine: &'engine Engine, options: BatchOptions) -> Self {
        Self { engine, options, pending: Mutex::new(HashMap::new()) }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let record = LogRecord { key: key.to_vec(), value: value.to_vec(), kind: RecordKind::Normal };
        self.pending.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stages a delete. If `key` is not live and not already staged, returns
    /// `NotFound`. If `key` has a pending write, cancels it instead of
    /// staging a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        let mut pending = self.pending.lock();
        if self.engine.index().get(key).is_none() && !pending.contains_key(key) {
            return Err(Error::NotFound);
        }
        if pending.remove(key).is_some() {
            return Ok(());
        }
        pending.insert(key.to_vec(), LogRecord { key: key.to_vec(), value: Vec::new(), kind: RecordKind::Deleted });
        Ok(())
    }

    /// Commits every staged mutation under a single transaction id. Either
    /// every record (and the terminator) lands on disk, or a crash midway
    /// leaves none of them visible to recovery.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size {
            return Err(Error::BatchTooLarge);
        }

        let tx_id = self.engine.next_tx_id();
        let mut written = Vec::with_capacity(pending.len());
        for (user_key, staged) in pending.iter() {
            let on_disk =
                LogRecord { key: record::key_with_tx_id(user_key, tx_id), value: staged.value.clone(), kind: staged.kind };
            let pos = self.engine.append_log_record(&on_disk)?;
            written.push((user_key.clone(), staged.kind, pos));
        }

        let terminator =
            LogRecord { key: record::key_with_tx_id(FINISHED_TX_KEY, tx_id), value: Vec::new(), kind: RecordKind::Normal };
        self.engine.append_log_record(&terminator)?;

        if self.options.sync_write {
            self.engine.sync()?;
        }

        for (user_key, kind, pos) in written {
            match kind {
                RecordKind::Normal => {
                    if let Some(old) = self.engine.index().put(&user_key, pos)? {
                        self.engine.add_reclaimable(old.size as u64);
                    }
                }
                RecordKind::Deleted => {
                    self.engine.add_reclaimable(pos.size as u64);
                    if let Some(old) = self.engine.index().delete(&user_key)? {
                        self.engine.add_reclaimable(old.size as u64);
                    }
                }
            }
        }

        pending.clear();
        Ok(())
    }
}
