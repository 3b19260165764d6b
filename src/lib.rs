#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

//! An embeddable, persistent key-value storage engine following the
//! Bitcask model: an append-only log of records on disk, with a complete
//! in-memory index mapping every live key to its latest record.

mod batch;
mod data_file;
mod engine;
mod error;
mod fio;
mod index;
mod iterator;
mod merge;
mod options;
mod record;

pub use batch::Batch;
pub use engine::{Engine, Stat};
pub use error::{Error, Result};
pub use iterator::EngineIterator;
pub use options::{BatchOptions, IndexType, IteratorOptions, Options};
