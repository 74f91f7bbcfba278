//! Disk-backed [`FactJournal`]: WAL for current, one segment per snapshot.
//!
//! # Directory Layout
//! ```text
//! <dir>/.lock                              exclusive directory lock
//! <dir>/facts.wal                          assertions since the last checkpoint
//! <dir>/current.seg                        checkpoint of the current partition
//! <dir>/snapshots/snapshot_<micros>.seg    one file per frozen snapshot
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::snapshot::Snapshot;
use crate::storage::traits::{FactJournal, RecoveredState, StorageError};
use crate::storage::TripleSet;
use crate::triple::Triple;

use super::file_lock::DirLock;
use super::segment::SegmentManager;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "facts.wal";

/// Journal that persists a fact store under one directory.
#[derive(Debug)]
pub struct DiskJournal {
    dir: PathBuf,
    _lock: DirLock,
    wal: WriteAheadLog,
    segments: SegmentManager,
    config: PersistentConfig,
}

impl DiskJournal {
    /// Opens or creates the journal in `dir`.
    ///
    /// # Errors
    /// - `Locked` if another handle holds the directory
    /// - `Corruption` if the WAL header or a complete WAL frame is damaged
    /// - `Io` for filesystem failures
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let lock = DirLock::acquire(dir)?;
        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)?;
        let segments = SegmentManager::open(dir)?;
        info!(dir = %dir.display(), "opened disk journal");
        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            segments,
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes()
    }
}

impl FactJournal for DiskJournal {
    fn append_assertion(&self, triple: &Triple) -> Result<(), StorageError> {
        self.wal.append(WalEntryKind::Assert(triple.clone()))?;
        Ok(())
    }

    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let path = self.segments.write_snapshot(snapshot)?;
        debug!(path = %path.display(), triples = snapshot.len(), "snapshot segment written");
        Ok(())
    }

    fn recover(&self) -> Result<RecoveredState, StorageError> {
        let mut current = self.segments.load_current()?.unwrap_or_default();
        let mut replayed = 0usize;
        for entry in self.wal.entries()? {
            match entry.kind {
                WalEntryKind::Assert(triple) => {
                    current.insert(triple);
                    replayed += 1;
                }
                // Informational; the checkpoint segment is already loaded.
                WalEntryKind::Checkpoint { .. } => {}
            }
        }
        if replayed > 0 {
            info!(entries = replayed, "replayed WAL entries");
        }
        Ok(RecoveredState {
            current,
            snapshots: self.segments.load_snapshots()?,
        })
    }

    fn checkpoint(&self, current: &TripleSet) -> Result<(), StorageError> {
        let up_to = self.wal.current_sequence();
        if up_to == 0 {
            return Ok(());
        }
        let before = self.wal.size_bytes();
        self.segments.write_current(current, up_to)?;
        self.wal.append(WalEntryKind::Checkpoint {
            up_to_sequence: up_to,
        })?;
        self.wal.truncate()?;
        info!(
            up_to_sequence = up_to,
            wal_size_before = before,
            wal_size_after = self.wal.size_bytes(),
            "checkpoint complete"
        );
        Ok(())
    }

    fn needs_checkpoint(&self) -> bool {
        self.wal.size_bytes() > self.config.max_wal_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn small_config() -> PersistentConfig {
        PersistentConfig {
            max_wal_size: PersistentConfig::MIN_WAL_SIZE,
            sync_on_write: false,
        }
    }

    #[test]
    fn test_recover_replays_wal_over_checkpoint() {
        let dir = tempdir().unwrap();
        {
            let journal = DiskJournal::open(dir.path(), small_config()).unwrap();
            let a = Triple::link("sys:a", "rdf:type", "pact:System");
            journal.append_assertion(&a).unwrap();
            journal
                .checkpoint(&[a].into_iter().collect::<TripleSet>())
                .unwrap();
            assert_eq!(journal.wal.current_sequence(), 0);
            journal
                .append_assertion(&Triple::link("sys:b", "rdf:type", "pact:System"))
                .unwrap();
        }
        let journal = DiskJournal::open(dir.path(), small_config()).unwrap();
        let state = journal.recover().unwrap();
        assert_eq!(state.current.len(), 2);
        assert!(state.snapshots.is_empty());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        {
            let journal = DiskJournal::open(dir.path(), small_config()).unwrap();
            let triples: TripleSet = [Triple::link("sys:a", "rdf:type", "pact:System")]
                .into_iter()
                .collect();
            journal
                .persist_snapshot(&Snapshot::new("s1".to_string(), at, triples))
                .unwrap();
        }
        let journal = DiskJournal::open(dir.path(), small_config()).unwrap();
        let state = journal.recover().unwrap();
        assert_eq!(state.snapshots.len(), 1);
        assert_eq!(state.snapshots[0].created_at(), at);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _held = DiskJournal::open(dir.path(), small_config()).unwrap();
        let err = DiskJournal::open(dir.path(), small_config()).unwrap_err();
        assert!(matches!(err, StorageError::Locked(_)));
    }

    #[test]
    fn test_needs_checkpoint_after_wal_growth() {
        let dir = tempdir().unwrap();
        let journal = DiskJournal::open(dir.path(), small_config()).unwrap();
        assert!(!journal.needs_checkpoint());
        for i in 0..200 {
            journal
                .append_assertion(&Triple::link(&format!("sys:{i}"), "rdf:type", "pact:System"))
                .unwrap();
        }
        assert!(journal.needs_checkpoint());
    }
}
