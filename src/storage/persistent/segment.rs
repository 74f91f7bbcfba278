//! Immutable segment files.
//!
//! A segment holds one checkpointed triple set: either the current partition
//! (`current.seg`) or one frozen snapshot (`snapshots/snapshot_<micros>.seg`).
//! Segments are written to a temp file, fsynced and renamed into place, so a
//! reader sees either the whole file or nothing.
//!
//! # File Format
//! ```text
//! [HEADER: "PACT" 'S' version]
//! [codec-encoded SegmentHeader]
//! [codec-encoded TripleSet]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::snapshot::Snapshot;
use crate::storage::TripleSet;

use super::codec::{self, FileKind};

const CURRENT_FILE: &str = "current.seg";
const SNAPSHOT_DIR: &str = "snapshots";
const SNAPSHOT_PREFIX: &str = "snapshot_";

/// What a segment file holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentKind {
    /// Checkpoint of the current partition.
    Current { up_to_sequence: u64 },
    /// A frozen snapshot.
    Snapshot {
        label: String,
        taken_at: DateTime<Utc>,
    },
}

/// Segment file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub kind: SegmentKind,
    pub triple_count: u64,
    pub written_at: DateTime<Utc>,
}

/// Writes one segment atomically.
///
/// The temp file is removed if the writer is dropped before `finalize`.
pub struct SegmentWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl SegmentWriter {
    /// Starts a segment that will land at `final_path`.
    pub fn new(final_path: PathBuf) -> IoResult<Self> {
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment");
        let temp_path = final_path.with_file_name(format!("{file_name}.{}.tmp", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer, FileKind::Segment)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
        })
    }

    /// Writes the header and payload.
    pub fn write(&mut self, kind: SegmentKind, triples: &TripleSet) -> IoResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("writer already consumed"))?;
        let header = SegmentHeader {
            kind,
            triple_count: triples.len() as u64,
            written_at: Utc::now(),
        };
        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(triples)?)?;
        Ok(())
    }

    /// Flushes, fsyncs and renames the segment into place.
    ///
    /// This is the commit point.
    pub fn finalize(mut self) -> IoResult<PathBuf> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::other("writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| std::io::Error::other("temp_path already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        if let Err(e) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        if let Some(parent) = self.final_path.parent() {
            sync_dir(parent)?;
        }
        Ok(self.final_path.clone())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(ref temp_path) = self.temp_path {
            let _ = fs::remove_file(temp_path);
        }
    }
}

#[cfg(test)]
thread_local! {
    static FAIL_DIR_SYNC: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
fn dir_sync_fault() -> bool {
    FAIL_DIR_SYNC.with(std::cell::Cell::get)
}

#[cfg(not(test))]
const fn dir_sync_fault() -> bool {
    false
}

fn sync_dir(dir: &Path) -> IoResult<()> {
    if dir_sync_fault() {
        return Err(std::io::Error::other("injected directory sync failure"));
    }
    sync_dir_os(dir)
}

#[cfg(unix)]
fn sync_dir_os(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir_os(_dir: &Path) -> IoResult<()> {
    Ok(())
}

fn read_segment(path: &Path) -> IoResult<(SegmentHeader, TripleSet)> {
    let mut reader = BufReader::new(File::open(path)?);
    codec::read_header(&mut reader, FileKind::Segment)?;
    let header: SegmentHeader = codec::decode(&mut reader)?;
    let triples: TripleSet = codec::decode(&mut reader)?;
    if triples.len() as u64 != header.triple_count {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "segment {} declares {} triples but holds {}",
                path.display(),
                header.triple_count,
                triples.len()
            ),
        ));
    }
    Ok((header, triples))
}

/// Manages the segment files of one database directory.
#[derive(Debug)]
pub struct SegmentManager {
    dir: PathBuf,
}

impl SegmentManager {
    /// Opens the segment layout in `dir`, removing temp files left by a crash.
    pub fn open(dir: &Path) -> IoResult<Self> {
        let snapshots = dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&snapshots)?;
        for d in [dir, snapshots.as_path()] {
            for entry in fs::read_dir(d)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "tmp") {
                    debug!(path = %path.display(), "removing stale segment temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn snapshot_path(&self, snapshot: &Snapshot) -> PathBuf {
        self.dir.join(SNAPSHOT_DIR).join(format!(
            "{SNAPSHOT_PREFIX}{}.seg",
            snapshot.id().as_micros()
        ))
    }

    /// Persists a frozen snapshot.
    ///
    /// A file already holding exactly this snapshot counts as persisted, so a
    /// retried freeze succeeds; any other existing file is refused. If the
    /// write fails after the rename, the file is removed again so a restart
    /// never recovers a snapshot that was not published.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> IoResult<PathBuf> {
        let path = self.snapshot_path(snapshot);
        let kind = SegmentKind::Snapshot {
            label: snapshot.label().to_string(),
            taken_at: snapshot.created_at(),
        };
        if path.exists() {
            let (header, triples) = read_segment(&path)?;
            if header.kind == kind && triples == *snapshot.triples() {
                debug!(path = %path.display(), "snapshot segment already persisted");
                return Ok(path);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("snapshot segment {} already exists", path.display()),
            ));
        }

        let mut writer = SegmentWriter::new(path.clone())?;
        writer.write(kind, snapshot.triples())?;
        writer.finalize().inspect_err(|e| {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "removing unsynced snapshot segment");
                let _ = fs::remove_file(&path);
            }
        })
    }

    /// Replaces the checkpoint of the current partition.
    pub fn write_current(&self, triples: &TripleSet, up_to_sequence: u64) -> IoResult<PathBuf> {
        let mut writer = SegmentWriter::new(self.dir.join(CURRENT_FILE))?;
        writer.write(SegmentKind::Current { up_to_sequence }, triples)?;
        writer.finalize()
    }

    /// Loads the current-partition checkpoint, if one was ever written.
    pub fn load_current(&self) -> IoResult<Option<TripleSet>> {
        let path = self.dir.join(CURRENT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let (header, triples) = read_segment(&path)?;
        if !matches!(header.kind, SegmentKind::Current { .. }) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not a current-partition segment", path.display()),
            ));
        }
        Ok(Some(triples))
    }

    /// Loads every persisted snapshot, oldest first.
    pub fn load_snapshots(&self) -> IoResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(self.dir.join(SNAPSHOT_DIR))? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "seg") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem.starts_with(SNAPSHOT_PREFIX) {
                warn!(path = %path.display(), "ignoring unrecognized file in snapshot directory");
                continue;
            }
            let (header, triples) = read_segment(&path)?;
            let SegmentKind::Snapshot { label, taken_at } = header.kind else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{} is not a snapshot segment", path.display()),
                ));
            };
            snapshots.push(Snapshot::new(label, taken_at, triples));
        }
        snapshots.sort_by_key(Snapshot::id);
        Ok(snapshots)
    }
}
