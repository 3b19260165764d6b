//! Error kinds surfaced to callers of the engine.

use std::fmt;

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating the engine.
#[derive(Debug)]
pub enum Error {
    /// A key was empty where a non-empty key is required.
    EmptyKey,
    /// The requested key has no live entry in the index.
    NotFound,
    /// The index backend rejected a put or delete.
    IndexUpdateFailed,
    /// A CRC check failed while decoding a record.
    CorruptRecord,
    /// A batch exceeded its configured `max_batch_size`.
    BatchTooLarge,
    /// A merge was requested while one was already in progress.
    MergeInProgress,
    /// Reclaimable bytes fell below the configured merge ratio.
    BelowMergeRatio,
    /// A read-only I/O backend rejected a write.
    ReadOnlyBackend,
    /// The data directory is already held by another engine instance.
    DatabaseInUse,
    /// A configuration value failed validation.
    InvalidOption(&'static str),
    /// A data file name did not match the expected `%09d.data` pattern.
    CorruptDirectory,
    /// An I/O operation failed.
    Io(std::io::Error),
    /// The on-disk B+Tree backend reported an internal error.
    Index(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyKey => write!(f, "key must not be empty"),
            Error::NotFound => write!(f, "key not found"),
            Error::IndexUpdateFailed => write!(f, "failed to update in-memory index"),
            Error::CorruptRecord => write!(f, "crc mismatch: corrupt log record"),
            Error::BatchTooLarge => write!(f, "batch exceeds configured max_batch_size"),
            Error::MergeInProgress => write!(f, "a merge is already in progress"),
            Error::BelowMergeRatio => write!(f, "reclaimable ratio is below the configured merge_ratio"),
            Error::ReadOnlyBackend => write!(f, "write attempted on a read-only io backend"),
            Error::DatabaseInUse => write!(f, "data directory is locked by another engine instance"),
            Error::InvalidOption(msg) => write!(f, "invalid option: {msg}"),
            Error::CorruptDirectory => write!(f, "data directory contains a malformed data file name"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Index(msg) => write!(f, "index error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<jammdb::Error> for Error {
    fn from(err: jammdb::Error) -> Self {
        Error::Index(err.to_string())
    }
}
