//! Framed record codec shared by the WAL and segment files.
//!
//! Every file starts with a header:
//! ```text
//! [magic: "PACT"][file kind: 1 byte][codec version: 1 byte]
//! ```
//! followed by records framed as:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying pactgraph files.
pub const MAGIC: [u8; 4] = *b"PACT";

/// Length of the file header in bytes.
pub const HEADER_LEN: u64 = 6;

/// Records larger than this are treated as corruption.
const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// Which kind of file a header announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    Wal = b'W',
    Segment = b'S',
}

fn crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes a value into one checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .ok()
        .filter(|&l| (l as usize) <= MAX_ENTRY_SIZE)
        .ok_or_else(|| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("entry size {} exceeds maximum {MAX_ENTRY_SIZE}", data.len()),
            )
        })?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc(&data).to_le_bytes());
    Ok(out)
}

/// Reads one frame, verifying its checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short
/// - `InvalidData` on version, size, checksum or decoding failures
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc(&data);
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write, kind: FileKind) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[kind as u8, CODEC_VERSION])
}

/// Reads and validates the file header.
pub fn read_header(reader: &mut impl Read, expected: FileKind) -> IoResult<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {:?}", &header[..4]),
        ));
    }
    if header[4] != expected as u8 {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unexpected file kind {:#04x}, expected {expected:?}", header[4]),
        ));
    }
    if header[5] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported file version: {}", header[5]),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triple::Triple;
    use std::io::Cursor;

    #[test]
    fn test_triple_frame_roundtrip() {
        let t = Triple::link("sys:hr-portal", "rdf:type", "pact:System");
        let mut cursor = Cursor::new(encode(&t).unwrap());
        let back: Triple = decode(&mut cursor).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&"test data".to_string()).unwrap();
        encoded[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame_is_eof() {
        let encoded = encode(&"test data".to_string()).unwrap();
        let cut = encoded[..encoded.len() - 2].to_vec();
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&200_000_000u32.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_kind_is_checked() {
        let mut buf = Vec::new();
        write_header(&mut buf, FileKind::Wal).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        read_header(&mut Cursor::new(buf.clone()), FileKind::Wal).unwrap();
        let err = read_header(&mut Cursor::new(buf), FileKind::Segment).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
