//! In-memory journal.
//!
//! Accepts every write and recovers nothing. Intended for embedded usage,
//! tests, and as a reference implementation of [`FactJournal`].

use crate::snapshot::Snapshot;
use crate::triple::Triple;

use super::index::TripleSet;
use super::traits::{FactJournal, RecoveredState, StorageError};

/// Journal that keeps nothing beyond the process lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryJournal;

impl MemoryJournal {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FactJournal for MemoryJournal {
    fn append_assertion(&self, _triple: &Triple) -> Result<(), StorageError> {
        Ok(())
    }

    fn persist_snapshot(&self, _snapshot: &Snapshot) -> Result<(), StorageError> {
        Ok(())
    }

    fn recover(&self) -> Result<RecoveredState, StorageError> {
        Ok(RecoveredState::default())
    }

    fn checkpoint(&self, _current: &TripleSet) -> Result<(), StorageError> {
        Ok(())
    }
}
