//! Durable storage for the fact store.
//!
//! Provides crash-safe persistence with:
//! - Write-ahead logging of assertions into current
//! - One atomically written segment file per frozen snapshot
//! - CRC32 checksums for corruption detection
//! - An exclusive directory lock for single-process access
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     DiskJournal                      │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐   ┌──────────────────────┐      │
//! │  │ WriteAheadLog   │   │ SegmentManager       │      │
//! │  │ (current, live) │   │ (checkpoint, frozen) │      │
//! │  └────────┬────────┘   └──────────┬───────────┘      │
//! │           └───────────┬───────────┘                  │
//! │                       ↓                              │
//! │            ┌─────────────────────┐                   │
//! │            │   DirLock (flock)   │                   │
//! │            └─────────────────────┘                   │
//! └──────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod journal;
mod segment;
mod wal;

pub use file_lock::DirLock;
pub use journal::DiskJournal;
pub use segment::{SegmentHeader, SegmentKind, SegmentManager};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PactError, ValidationError};

/// Configuration for durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) past which a freeze triggers a checkpoint.
    pub max_wal_size: u64,
    /// Whether to fsync after every WAL append (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smaller limits would checkpoint on nearly every freeze.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the configured limits.
    ///
    /// # Errors
    /// `InvalidConfig` if `max_wal_size` is below [`Self::MIN_WAL_SIZE`].
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Opens or creates a durable journal in `path`.
///
/// # Errors
/// - If the configuration is invalid
/// - If the directory cannot be created or another process holds its lock
/// - If the WAL is corrupted
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use pactgraph::storage::persistent::open_journal;
/// use pactgraph::storage::FactStore;
///
/// let journal = open_journal("./compliance.pact", None)?;
/// let store = FactStore::with_journal(Arc::new(journal))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_journal(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<DiskJournal, PactError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(DiskJournal::open(path.as_ref(), cfg)?)
}
