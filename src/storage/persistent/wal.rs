//! Write-ahead log for assertions into the current partition.
//!
//! Every assertion is appended (and optionally fsynced) before it becomes
//! visible in memory. On open, the log is scanned; a frame cut short by a crash
//! is treated as never written and the file is truncated back to the last
//! complete frame. A complete frame that fails its checksum is corruption.
//!
//! # File Format
//! ```text
//! [HEADER: "PACT" 'W' version]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::triple::Triple;

use super::codec::{self, FileKind, HEADER_LEN};

fn poisoned() -> std::io::Error {
    std::io::Error::other("poisoned lock: wal.writer")
}

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A triple asserted into current.
    Assert(Triple),
    /// Checkpoint marker: everything up to `up_to_sequence` is in `current.seg`.
    Checkpoint { up_to_sequence: u64 },
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
    size: u64,
}

/// Append-only log of assertions.
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Opens or creates a WAL file.
    ///
    /// # Errors
    /// - `InvalidData` if the header is wrong or a complete frame is corrupted
    /// - Any I/O error from opening, scanning or truncating the file
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let len = path.metadata().map(|m| m.len()).unwrap_or(0);

        let (sequence, size) = if len < HEADER_LEN {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file, FileKind::Wal)?;
            file.sync_all()?;
            (0, HEADER_LEN)
        } else {
            let scan = Self::scan(path)?;
            if scan.valid_len < len {
                warn!(
                    path = %path.display(),
                    kept = scan.valid_len,
                    dropped = len - scan.valid_len,
                    "truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            (scan.last_sequence, scan.valid_len)
        };

        let file = OpenOptions::new().append(true).open(path)?;
        debug!(path = %path.display(), sequence, size, "WAL opened");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
                size,
            }),
            sync_on_write,
        })
    }

    /// Appends an entry. Returns the sequence number assigned to it.
    ///
    /// # Errors
    /// I/O errors; the in-memory sequence is only advanced on success.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;

        let candidate = inner.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        })?;

        inner.file.write_all(&encoded)?;
        inner.file.flush()?;
        if self.sync_on_write {
            inner.file.get_ref().sync_data()?;
        }

        inner.sequence = candidate;
        inner.size += encoded.len() as u64;
        Ok(candidate)
    }

    /// Reads every entry in order.
    ///
    /// # Errors
    /// `InvalidData` on a corrupted frame.
    pub fn entries(&self) -> IoResult<Vec<WalEntry>> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.file.flush()?;
        }
        WalIterator::new(&self.path)?.collect()
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.sequence)
    }

    /// Size of the log in bytes, header included.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().map_or(0, |inner| inner.size)
    }

    /// Drops every entry, leaving only the header.
    ///
    /// Only call this once the entries are covered by a durable checkpoint.
    ///
    /// # Errors
    /// I/O errors.
    pub fn truncate(&self) -> IoResult<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.file.flush()?;
        // Appends land at the new end of file after set_len.
        inner.file.get_ref().set_len(HEADER_LEN)?;
        inner.file.get_ref().sync_all()?;
        inner.sequence = 0;
        inner.size = HEADER_LEN;
        Ok(())
    }

    fn scan(path: &Path) -> IoResult<WalScan> {
        let mut iter = WalIterator::new(path)?;
        let mut scan = WalScan {
            last_sequence: 0,
            valid_len: HEADER_LEN,
        };
        while let Some(entry) = iter.next() {
            let entry = entry?;
            scan.last_sequence = entry.sequence;
            scan.valid_len = iter.position()?;
        }
        Ok(scan)
    }
}

struct WalScan {
    last_sequence: u64,
    valid_len: u64,
}

/// Iterator over WAL entries.
///
/// Ends quietly at a frame cut short by end of file.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader, FileKind::Wal)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn assert_kind(n: usize) -> WalEntryKind {
        WalEntryKind::Assert(Triple::link(&format!("sys:{n}"), "rdf:type", "pact:System"))
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("facts.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(assert_kind(1)).unwrap();
        wal.append(assert_kind(2)).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        let entries = wal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[1].kind, assert_kind(2));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("facts.wal");
        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(assert_kind(1)).unwrap();
            wal.append(assert_kind(2)).unwrap();
        }
        let len = std::fs::metadata(&wal_path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&wal_path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence(), 1);
        // New appends follow the last complete frame.
        wal.append(assert_kind(3)).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        let entries = wal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, assert_kind(3));
    }

    #[test]
    fn test_truncate_resets_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("facts.wal");
        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(assert_kind(1)).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.current_sequence(), 0);
        assert_eq!(wal.size_bytes(), HEADER_LEN);

        wal.append(assert_kind(2)).unwrap();
        let entries = wal.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 1);
    }
}
