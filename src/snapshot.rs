//! Snapshots (named graphs): immutable, timestamped triple sets.
//!
//! A snapshot is produced by exactly one freeze and never changes afterwards.
//! Snapshots are shared as `Arc<Snapshot>` and read without any locking.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::TripleSet;

/// Identifier of a frozen snapshot, derived from its run timestamp.
///
/// Ids carry microsecond precision and order chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(i64);

impl SnapshotId {
    /// Derives the id for a snapshot taken at `at`.
    #[must_use]
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    /// Creates an id from raw microseconds since the Unix epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the Unix epoch.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// The timestamp this id was derived from.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot-{}", self.timestamp().format("%Y%m%dT%H%M%S%.6fZ"))
    }
}

/// Truncates a timestamp to the precision snapshot ids carry.
#[must_use]
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

/// A frozen named graph.
#[derive(Debug)]
pub struct Snapshot {
    id: SnapshotId,
    label: String,
    created_at: DateTime<Utc>,
    triples: TripleSet,
}

impl Snapshot {
    pub(crate) fn new(label: String, created_at: DateTime<Utc>, triples: TripleSet) -> Self {
        let created_at = truncate_to_micros(created_at);
        Self {
            id: SnapshotId::from_timestamp(created_at),
            label,
            created_at,
            triples,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Read-only view of the frozen triples.
    pub fn triples(&self) -> &TripleSet {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Summary metadata, as listed by the store.
    #[must_use]
    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            id: self.id,
            label: self.label.clone(),
            created_at: self.created_at,
            triple_count: self.triples.len(),
        }
    }
}

/// Lightweight description of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub triple_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_id_orders_by_time() {
        let a = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        assert!(SnapshotId::from_timestamp(a) < SnapshotId::from_timestamp(b));
    }

    #[test]
    fn test_snapshot_id_roundtrips_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 15).unwrap();
        let id = SnapshotId::from_timestamp(at);
        assert_eq!(id.timestamp(), at);
        assert_eq!(id.to_string(), "snapshot-20260302T093015.000000Z");
    }

    #[test]
    fn test_truncate_to_micros_drops_nanos() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let t = truncate_to_micros(at);
        assert_eq!(t.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_snapshot_info() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let snap = Snapshot::new("assessment-x".to_string(), at, TripleSet::new());
        let info = snap.info();
        assert_eq!(info.label, "assessment-x");
        assert_eq!(info.triple_count, 0);
        assert!(snap.is_empty());
    }
}
