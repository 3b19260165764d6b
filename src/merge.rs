//! Compaction: rewrites live records into a sibling `<dir>-merge` directory,
//! then atomically swaps the results back in on the next open.

use crate::data_file::{self, DataFile};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::fio::IoBackendKind;
use crate::options::Options;
use crate::record::{self, LogRecord, RecordKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

const MERGE_FINISHED_KEY: &[u8] = b"MERGE.FINISHED";

fn merge_dir_path(dir_path: &Path) -> PathBuf {
    let name = dir_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    match dir_path.parent() {
        Some(parent) => parent.join(format!("{name}-merge")),
        None => PathBuf::from(format!("{name}-merge")),
    }
}

/// Runs a full compaction pass over every currently-retired data file.
pub(crate) fn run(engine: &Engine) -> Result<()> {
    if engine.is_merging().swap(true, Ordering::SeqCst) {
        return Err(Error::MergeInProgress);
    }
    let result = run_inner(engine);
    engine.is_merging().store(false, Ordering::SeqCst);
    result
}

fn run_inner(engine: &Engine) -> Result<()> {
    let stat = engine.stat()?;
    if stat.disk_size == 0 {
        return Err(Error::BelowMergeRatio);
    }
    let ratio = stat.reclaimable_bytes as f64 / stat.disk_size as f64;
    if ratio < engine.options.merge_ratio {
        return Err(Error::BelowMergeRatio);
    }

    let (non_merge_boundary, snapshot) = engine.begin_merge()?;

    let merge_path = merge_dir_path(&engine.options.dir_path);
    if merge_path.exists() {
        std::fs::remove_dir_all(&merge_path)?;
    }
    std::fs::create_dir_all(&merge_path)?;

    let merge_options = Options { dir_path: merge_path.clone(), sync_writes: false, ..engine.options.clone() };
    let merge_engine = Engine::open(merge_options)?;
    let hint_file = DataFile::open_hint_file(&merge_path)?;

    for file_id in snapshot {
        let source = DataFile::open(&engine.options.dir_path, file_id, IoBackendKind::Mmap)?;
        let mut offset = 0u64;
        loop {
            let (record, size) = match source.read_record_at(offset) {
                Ok(v) => v,
                Err(Error::NotFound) | Err(Error::CorruptRecord) => break,
                Err(err) => return Err(err),
            };
            let (user_key, _) = record::parse_key(&record.key);
            if let Some(current) = engine.index().get(&user_key) {
                if current.file_id == file_id && current.offset == offset {
                    let live_record = LogRecord {
                        key: record::key_with_tx_id(&user_key, 0),
                        value: record.value,
                        kind: RecordKind::Normal,
                    };
                    let new_pos = merge_engine.append_log_record(&live_record)?;
                    hint_file.write_hint_record(&user_key, new_pos)?;
                }
            }
            offset += size;
        }
    }

    merge_engine.sync()?;
    hint_file.sync()?;

    let marker = DataFile::open_merge_finished_file(&merge_path)?;
    let marker_record =
        LogRecord { key: MERGE_FINISHED_KEY.to_vec(), value: non_merge_boundary.to_string().into_bytes(), kind: RecordKind::Normal };
    marker.append(&marker_record.encode())?;
    marker.sync()?;

    log::info!("merge finished, non-merge boundary file id {non_merge_boundary}");
    Ok(())
}

/// Applies a completed merge found in `dir_path`'s sibling `-merge`
/// directory, returning the non-merge boundary file id if one was applied.
/// An incomplete merge directory (crashed mid-merge) is discarded instead.
pub(crate) fn load_merge_results(dir_path: &Path) -> Result<Option<u32>> {
    let merge_path = merge_dir_path(dir_path);
    if !merge_path.exists() {
        return Ok(None);
    }

    if !merge_path.join(data_file::MERGE_FINISHED_FILE_NAME).exists() {
        std::fs::remove_dir_all(&merge_path)?;
        return Ok(None);
    }

    let marker = DataFile::open_merge_finished_file(&merge_path)?;
    let (record, _) = marker.read_record_at(0)?;
    let boundary: u32 =
        String::from_utf8_lossy(&record.value).parse().map_err(|_| Error::CorruptDirectory)?;

    for entry in std::fs::read_dir(dir_path)? {
        let entry = entry?;
        if let Some(id) = data_file::parse_file_id(&entry.file_name().to_string_lossy()) {
            if id < boundary {
                std::fs::remove_file(entry.path())?;
            }
        }
    }

    for entry in std::fs::read_dir(&merge_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == data_file::LOCK_FILE_NAME || name == data_file::TX_ID_SIDECAR_NAME {
            continue;
        }
        std::fs::rename(entry.path(), dir_path.join(&name))?;
    }

    std::fs::remove_dir_all(&merge_path)?;
    log::info!("applied merge results from {}, non-merge boundary file id {boundary}", merge_path.display());
    Ok(Some(boundary))
}
