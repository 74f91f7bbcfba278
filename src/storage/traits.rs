//! Abstract persistence contract for the fact store.
//!
//! The fact store keeps its working set in memory and hands every durable
//! write to a [`FactJournal`]. By using a trait we enable:
//! - An in-memory journal for tests and embedded use
//! - A WAL + segment journal for production
//! - Fault-injecting journals in tests

use thiserror::Error;

use crate::snapshot::Snapshot;
use crate::triple::Triple;

use super::index::TripleSet;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure while writing or reading durable state.
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored data failed a checksum or could not be decoded.
    #[error("Corrupted data: {0}")]
    Corruption(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process holds the database lock.
    #[error("Database is locked: {0}")]
    Locked(String),

    /// A lock inside the process was poisoned by a panicking writer.
    #[error("Poisoned lock: {0}")]
    PoisonedLock(&'static str),
}

impl StorageError {
    /// Returns true if the failure may clear up on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Locked(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::InvalidData => Self::Corruption(e.to_string()),
            std::io::ErrorKind::WouldBlock => Self::Locked(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

/// State recovered from a journal on open.
#[derive(Debug, Default)]
pub struct RecoveredState {
    /// Committed triples of the current partition.
    pub current: TripleSet,
    /// Frozen snapshots, in any order.
    pub snapshots: Vec<Snapshot>,
}

/// Durable write path for the fact store.
///
/// # Safety Considerations
/// - `persist_snapshot` must be all-or-nothing: after an error, recovery must
///   not observe the snapshot.
/// - Implementations are only ever called by the store's single writer.
pub trait FactJournal: Send + Sync {
    /// Record an assertion into the current partition.
    fn append_assertion(&self, triple: &Triple) -> Result<(), StorageError>;

    /// Durably persist a frozen snapshot.
    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Load everything persisted so far.
    fn recover(&self) -> Result<RecoveredState, StorageError>;

    /// Checkpoint the current partition and drop journal entries it covers.
    fn checkpoint(&self, current: &TripleSet) -> Result<(), StorageError>;

    /// Returns true once the journal has grown enough to warrant a checkpoint.
    fn needs_checkpoint(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_fact_journal_object_safe(_: &dyn FactJournal) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Io("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_transient());
        assert!(!StorageError::Corruption("x".to_string()).is_transient());
    }

    #[test]
    fn test_io_error_classification() {
        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::InvalidData, "CRC mismatch").into();
        assert!(matches!(err, StorageError::Corruption(_)));

        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "locked").into();
        assert!(matches!(err, StorageError::Locked(_)));
    }
}
