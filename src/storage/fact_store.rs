//! The versioned fact store.
//!
//! One mutable "current" partition plus an append-only, time-ordered index of
//! frozen snapshots. All writes go through a single writer section; readers of
//! current take a shared lock, readers of snapshots take none.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ContractViolation, PactResult, QueryError};
use crate::query::{self, Binding, Query};
use crate::snapshot::{truncate_to_micros, Snapshot, SnapshotId, SnapshotInfo};
use crate::triple::Triple;

use super::index::TripleSet;
use super::memory::MemoryJournal;
use super::traits::{FactJournal, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::PoisonedLock(context)
}

/// Selects which partition an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "partition", content = "id", rename_all = "snake_case")]
pub enum Partition {
    /// The single mutable partition.
    #[default]
    Current,
    /// A frozen snapshot.
    Snapshot(SnapshotId),
}

impl From<Option<SnapshotId>> for Partition {
    fn from(id: Option<SnapshotId>) -> Self {
        id.map_or(Self::Current, Self::Snapshot)
    }
}

/// Triple and partition counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub current_triples: usize,
    pub snapshot_count: usize,
    pub snapshot_triples: usize,
}

impl StoreStats {
    /// Triples across every partition, counting copies once per partition.
    #[must_use]
    pub const fn total_triples(&self) -> usize {
        self.current_triples + self.snapshot_triples
    }
}

/// Append-only, versioned triple store.
pub struct FactStore {
    journal: Arc<dyn FactJournal>,
    writer: Mutex<()>,
    current: RwLock<TripleSet>,
    snapshots: RwLock<BTreeMap<SnapshotId, Arc<Snapshot>>>,
}

impl std::fmt::Debug for FactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactStore").finish_non_exhaustive()
    }
}

impl FactStore {
    /// Creates a store that keeps nothing beyond the process lifetime.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            journal: Arc::new(MemoryJournal::new()),
            writer: Mutex::new(()),
            current: RwLock::new(TripleSet::new()),
            snapshots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a store on top of `journal`, restoring whatever it recovers.
    ///
    /// # Errors
    /// Returns the journal's error if recovery fails.
    pub fn with_journal(journal: Arc<dyn FactJournal>) -> Result<Self, StorageError> {
        let recovered = journal.recover()?;
        let snapshots: BTreeMap<_, _> = recovered
            .snapshots
            .into_iter()
            .map(|s| (s.id(), Arc::new(s)))
            .collect();
        info!(
            current_triples = recovered.current.len(),
            snapshots = snapshots.len(),
            "fact store recovered"
        );
        Ok(Self {
            journal,
            writer: Mutex::new(()),
            current: RwLock::new(recovered.current),
            snapshots: RwLock::new(snapshots),
        })
    }

    /// Opens (or creates) a durable store in `path`.
    ///
    /// # Errors
    /// - If the directory cannot be created or another process holds its lock
    /// - If recovery finds corrupted data
    #[cfg(feature = "persistent")]
    pub fn open(
        path: impl AsRef<std::path::Path>,
        config: Option<super::persistent::PersistentConfig>,
    ) -> PactResult<Self> {
        let journal = super::persistent::open_journal(path, config)?;
        Ok(Self::with_journal(Arc::new(journal))?)
    }

    /// Enters the exclusive writer section.
    ///
    /// The returned session stages triples and freezes them together with the
    /// committed current partition. Staged triples are discarded if the session
    /// is dropped without a successful freeze.
    ///
    /// Calling any other writing method of this store while holding a session on
    /// the same thread deadlocks; write through the session instead.
    ///
    /// # Errors
    /// Returns an error if the writer lock is poisoned.
    pub fn begin_write(&self) -> PactResult<WriteSession<'_>> {
        let guard = self.writer.lock().map_err(|_| lock_err("store.writer"))?;
        Ok(WriteSession {
            store: self,
            _guard: guard,
            pending: TripleSet::new(),
        })
    }

    /// Asserts a triple into `partition`. Returns false if it was already there.
    ///
    /// # Errors
    /// - `ImmutabilityViolation` when addressing a frozen snapshot
    /// - Journal errors when the assertion cannot be made durable
    pub fn assert(&self, triple: Triple, partition: Partition) -> PactResult<bool> {
        if let Partition::Snapshot(id) = partition {
            self.snapshot(id)?;
            return Err(ContractViolation::ImmutabilityViolation { snapshot: id }.into());
        }
        let _guard = self.writer.lock().map_err(|_| lock_err("store.writer"))?;
        self.assert_committed(triple)
    }

    /// Asserts every triple into current. Returns how many were new.
    ///
    /// # Errors
    /// Stops at the first journal error; earlier triples stay asserted.
    pub fn assert_all(&self, triples: impl IntoIterator<Item = Triple>) -> PactResult<usize> {
        let _guard = self.writer.lock().map_err(|_| lock_err("store.writer"))?;
        let mut added = 0;
        for triple in triples {
            if self.assert_committed(triple)? {
                added += 1;
            }
        }
        Ok(added)
    }

    // Caller must hold the writer lock.
    fn assert_committed(&self, triple: Triple) -> PactResult<bool> {
        if self
            .current
            .read()
            .map_err(|_| lock_err("store.current"))?
            .contains(&triple)
        {
            return Ok(false);
        }
        self.journal.append_assertion(&triple)?;
        Ok(self
            .current
            .write()
            .map_err(|_| lock_err("store.current"))?
            .insert(triple))
    }

    /// Freezes the current partition into a new snapshot taken at `at`.
    ///
    /// # Errors
    /// - `DuplicateSnapshot` if the label or the derived id already exists
    /// - `SnapshotOutOfOrder` if `at` precedes the newest snapshot
    /// - Journal errors if the snapshot cannot be persisted; nothing is published
    pub fn freeze(&self, label: impl Into<String>, at: DateTime<Utc>) -> PactResult<SnapshotId> {
        self.begin_write()?.freeze(label, at)
    }

    /// Freezes an arbitrary source partition into a new snapshot.
    ///
    /// # Errors
    /// Same as [`FactStore::freeze`], plus `UnknownSnapshot` for a missing source.
    pub fn freeze_from(
        &self,
        source: Partition,
        label: impl Into<String>,
        at: DateTime<Utc>,
    ) -> PactResult<SnapshotId> {
        let _guard = self.writer.lock().map_err(|_| lock_err("store.writer"))?;
        self.freeze_locked(source, &TripleSet::new(), label.into(), at)
    }

    // Caller must hold the writer lock.
    fn freeze_locked(
        &self,
        source: Partition,
        pending: &TripleSet,
        label: String,
        at: DateTime<Utc>,
    ) -> PactResult<SnapshotId> {
        let at = truncate_to_micros(at);
        let id = SnapshotId::from_timestamp(at);

        {
            let snapshots = self.snapshots.read().map_err(|_| lock_err("store.snapshots"))?;
            if snapshots.contains_key(&id) {
                return Err(ContractViolation::DuplicateSnapshot {
                    label: id.to_string(),
                }
                .into());
            }
            if snapshots.values().any(|s| s.label() == label) {
                return Err(ContractViolation::DuplicateSnapshot { label }.into());
            }
            if let Some((newest, _)) = snapshots.last_key_value() {
                if id < *newest {
                    return Err(ContractViolation::SnapshotOutOfOrder {
                        requested: at,
                        newest: newest.timestamp(),
                    }
                    .into());
                }
            }
        }

        let mut triples = match source {
            Partition::Current => self
                .current
                .read()
                .map_err(|_| lock_err("store.current"))?
                .clone(),
            Partition::Snapshot(sid) => self.snapshot(sid)?.triples().clone(),
        };
        triples.extend_from(pending);

        let snapshot = Snapshot::new(label, at, triples);
        // Durable before visible: a failed persist must not advertise the id.
        self.journal.persist_snapshot(&snapshot)?;

        info!(
            snapshot = %id,
            label = snapshot.label(),
            triples = snapshot.len(),
            "snapshot frozen"
        );
        self.snapshots
            .write()
            .map_err(|_| lock_err("store.snapshots"))?
            .insert(id, Arc::new(snapshot));

        if self.journal.needs_checkpoint() {
            if let Err(e) = self.checkpoint_locked() {
                warn!(error = %e, "automatic checkpoint failed; WAL remains authoritative");
            }
        }
        Ok(id)
    }

    /// Runs a pattern query against one partition.
    ///
    /// # Errors
    /// Query planning errors, or `UnknownSnapshot`.
    pub fn query(&self, query: &Query, partition: Partition) -> PactResult<Vec<Binding>> {
        self.with_partition(partition, |set| query::evaluate(set, query))?
            .map_err(Into::into)
    }

    /// Runs `f` against the triples of one partition.
    ///
    /// For current, a shared lock is held for the duration of `f`.
    ///
    /// # Errors
    /// `UnknownSnapshot` or a poisoned lock.
    pub fn with_partition<R>(
        &self,
        partition: Partition,
        f: impl FnOnce(&TripleSet) -> R,
    ) -> PactResult<R> {
        match partition {
            Partition::Current => {
                let current = self.current.read().map_err(|_| lock_err("store.current"))?;
                Ok(f(&current))
            }
            Partition::Snapshot(id) => {
                let snapshot = self.snapshot(id)?;
                Ok(f(snapshot.triples()))
            }
        }
    }

    /// Returns a frozen snapshot.
    ///
    /// # Errors
    /// `UnknownSnapshot` if no snapshot has this id.
    pub fn snapshot(&self, id: SnapshotId) -> PactResult<Arc<Snapshot>> {
        self.snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .get(&id)
            .cloned()
            .ok_or_else(|| QueryError::UnknownSnapshot { id }.into())
    }

    /// Lists snapshot metadata, oldest first.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn list_snapshots(&self) -> PactResult<Vec<SnapshotInfo>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .values()
            .map(|s| s.info())
            .collect())
    }

    /// Snapshot ids, oldest first.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn snapshot_ids(&self) -> PactResult<Vec<SnapshotId>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .keys()
            .copied()
            .collect())
    }

    /// All snapshots, newest first.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn snapshots_newest_first(&self) -> PactResult<Vec<Arc<Snapshot>>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .values()
            .rev()
            .cloned()
            .collect())
    }

    /// The most recent snapshot, if any.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn latest_snapshot(&self) -> PactResult<Option<Arc<Snapshot>>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .last_key_value()
            .map(|(_, s)| Arc::clone(s)))
    }

    /// The newest snapshot taken at or before `at`.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn snapshot_at_or_before(&self, at: DateTime<Utc>) -> PactResult<Option<Arc<Snapshot>>> {
        let bound = SnapshotId::from_timestamp(at);
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .range((Bound::Unbounded, Bound::Included(bound)))
            .next_back()
            .map(|(_, s)| Arc::clone(s)))
    }

    /// The newest snapshot strictly older than `id`.
    ///
    /// # Errors
    /// Returns an error if the snapshot index lock is poisoned.
    pub fn snapshot_before(&self, id: SnapshotId) -> PactResult<Option<Arc<Snapshot>>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| lock_err("store.snapshots"))?
            .range(..id)
            .next_back()
            .map(|(_, s)| Arc::clone(s)))
    }

    /// Number of committed triples in current.
    ///
    /// # Errors
    /// Returns an error if the current partition lock is poisoned.
    pub fn current_len(&self) -> PactResult<usize> {
        Ok(self.current.read().map_err(|_| lock_err("store.current"))?.len())
    }

    /// Triple and partition counts.
    ///
    /// # Errors
    /// Returns an error if a lock is poisoned.
    pub fn stats(&self) -> PactResult<StoreStats> {
        let current_triples = self.current_len()?;
        let snapshots = self.snapshots.read().map_err(|_| lock_err("store.snapshots"))?;
        Ok(StoreStats {
            current_triples,
            snapshot_count: snapshots.len(),
            snapshot_triples: snapshots.values().map(|s| s.len()).sum(),
        })
    }

    /// Checkpoints the current partition and truncates the assertion log.
    ///
    /// Safe to call at any time; if it fails partway, the log still holds every
    /// assertion and recovery reconciles on next open.
    ///
    /// # Errors
    /// Journal errors.
    pub fn compact(&self) -> PactResult<()> {
        let _guard = self.writer.lock().map_err(|_| lock_err("store.writer"))?;
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> PactResult<()> {
        let current = self.current.read().map_err(|_| lock_err("store.current"))?;
        self.journal.checkpoint(&current)?;
        debug!(triples = current.len(), "current partition checkpointed");
        Ok(())
    }
}

/// Exclusive writer section over a [`FactStore`].
///
/// Holds the store's writer lock for its whole lifetime.
pub struct WriteSession<'a> {
    store: &'a FactStore,
    _guard: MutexGuard<'a, ()>,
    pending: TripleSet,
}

impl<'a> WriteSession<'a> {
    /// The store this session writes to.
    pub fn store(&self) -> &'a FactStore {
        self.store
    }

    /// Stages a triple for the next freeze. Returns false if already staged.
    pub fn stage(&mut self, triple: Triple) -> bool {
        self.pending.insert(triple)
    }

    /// Number of staged triples.
    pub fn staged_len(&self) -> usize {
        self.pending.len()
    }

    /// Asserts a triple into committed current without leaving the section.
    ///
    /// # Errors
    /// Journal errors.
    pub fn assert(&mut self, triple: Triple) -> PactResult<bool> {
        self.store.assert_committed(triple)
    }

    /// Freezes committed current plus staged triples into a snapshot.
    ///
    /// Consumes the session: on success the staged triples live on in the
    /// snapshot only, on failure they are discarded and current is unchanged.
    ///
    /// # Errors
    /// Same as [`FactStore::freeze`].
    pub fn freeze(self, label: impl Into<String>, at: DateTime<Utc>) -> PactResult<SnapshotId> {
        self.store
            .freeze_locked(Partition::Current, &self.pending, label.into(), at)
    }
}
