//! User-facing iteration over the engine, with optional key-prefix filtering.

use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

pub struct EngineIterator<'engine> {
    engine: &'engine Engine,
    inner: Box<dyn IndexIterator>,
    prefix: Option<Vec<u8>>,
}

impl<'engine> EngineIterator<'engine> {
    pub(crate) fn new(engine: &'engine Engine, opts: IteratorOptions) -> Self {
        let mut inner = engine.index().iterator(opts.reverse);
        inner.rewind();
        let mut it = Self { engine, inner, prefix: opts.prefix };
        it.skip_non_matching();
        it
    }

    fn matches_prefix(&self, key: &[u8]) -> bool {
        match &self.prefix {
            Some(prefix) => key.starts_with(prefix.as_slice()),
            None => true,
        }
    }

    fn skip_non_matching(&mut self) {
        while self.inner.valid() && !self.matches_prefix(self.inner.key()) {
            self.inner.next();
        }
    }

    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_non_matching();
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_non_matching();
    }

    pub fn next(&mut self) {
        self.inner.next();
        self.skip_non_matching();
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Resolves the current entry's value, taking the engine's read lock.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.read_value_at(self.inner.value())
    }
}
