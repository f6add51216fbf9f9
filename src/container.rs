//! The AP container format.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "ANIP"
//!      4     1  version (1)
//!      5     4  total frame count        (patched on close)
//!      9     4  frames per second (f32)
//!     13     4  keyframe count           (patched on close)
//!     17     2  logical frame width
//!     19     2  logical frame height
//! ```
//!
//! After the header come frame records, contiguous and in display order.
//! A delta record is `type(0) payload_len payload`; a keyframe record is
//! `type(1) payload_len ordinal prev next payload` where `prev` and `next`
//! are signed byte deltas to the neighbouring keyframe records, zero at the
//! chain ends. The counts and the chain links are back-patched by
//! [`ContainerWriter::finish`]; all integers are little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::CodecError;
use crate::{FrameLayout, FRAME_PALETTE_BYTES, SUB_PALETTE_COLORS};

/// File magic bytes, `0x41 0x4E 0x49 0x50`.
pub const MAGIC: [u8; 4] = *b"ANIP";

/// Current container format version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the fixed file header.
pub const HEADER_BYTES: u64 = 21;

const FRAME_COUNT_OFFSET: u64 = 5;
const KEYFRAME_COUNT_OFFSET: u64 = 13;

/// Offset of the prev link inside a keyframe record
/// (past frame type, payload length, and ordinal).
const KEYFRAME_LINK_OFFSET: u64 = 9;

/// Largest possible packed RLE block: length byte plus 130 packed bytes.
const MAX_RLE_BYTES: usize = 131;

// ── Writer ─────────────────────────────────────────────────────

/// Streaming writer for an AP file.
///
/// Records are appended in display order; the frame/keyframe counts in the
/// header and the prev/next links of every keyframe record are patch sites
/// filled in by [`finish`](Self::finish) with random-access writes.
pub struct ContainerWriter {
    file: File,
    position: u64,
    keyframe_offsets: Vec<u64>,
}

impl ContainerWriter {
    /// Delete any existing file at `path`, create it anew and write the
    /// 21-byte header with zeroed frame and keyframe counts.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the file cannot be created or written.
    pub fn create(path: &Path, fps: f32, width: u16, height: u16) -> Result<Self, CodecError> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut header = [0u8; HEADER_BYTES as usize];
        header[0..4].copy_from_slice(&MAGIC);
        header[4] = FORMAT_VERSION;
        // frame count (5..9) and keyframe count (13..17) stay zero here
        header[9..13].copy_from_slice(&fps.to_le_bytes());
        header[17..19].copy_from_slice(&width.to_le_bytes());
        header[19..21].copy_from_slice(&height.to_le_bytes());
        file.write_all(&header)?;

        Ok(Self {
            file,
            position: HEADER_BYTES,
            keyframe_offsets: Vec::new(),
        })
    }

    /// Current write position in bytes from the start of the file.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of keyframe records written so far.
    #[must_use]
    pub fn keyframe_count(&self) -> usize {
        self.keyframe_offsets.len()
    }

    /// Append a keyframe record. The prev/next links are written as zero
    /// and patched by [`finish`](Self::finish).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] on a write failure.
    pub fn write_keyframe_record(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        self.keyframe_offsets.push(self.position);
        let ordinal = (self.keyframe_offsets.len() - 1) as u32;

        let mut head = [0u8; 17];
        head[0] = 1;
        head[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        head[5..9].copy_from_slice(&ordinal.to_le_bytes());
        self.file.write_all(&head)?;
        self.file.write_all(payload)?;
        self.position += head.len() as u64 + payload.len() as u64;
        Ok(())
    }

    /// Append a delta record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] on a write failure.
    pub fn write_delta_record(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        let mut head = [0u8; 5];
        head[0] = 0;
        head[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.file.write_all(&head)?;
        self.file.write_all(payload)?;
        self.position += head.len() as u64 + payload.len() as u64;
        Ok(())
    }

    /// Patch the header counts and chain the keyframe records, consuming
    /// the writer. Every keyframe record receives the signed byte delta to
    /// the previous and next keyframe record (zero at either end).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if a patch write fails.
    pub fn finish(mut self, frame_count: u32) -> Result<(), CodecError> {
        self.file.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        self.file.write_all(&frame_count.to_le_bytes())?;
        self.file.seek(SeekFrom::Start(KEYFRAME_COUNT_OFFSET))?;
        self.file
            .write_all(&(self.keyframe_offsets.len() as u32).to_le_bytes())?;

        for (i, &offset) in self.keyframe_offsets.iter().enumerate() {
            let prev = if i > 0 {
                (self.keyframe_offsets[i - 1] as i64 - offset as i64) as i32
            } else {
                0
            };
            let next = if i + 1 < self.keyframe_offsets.len() {
                (self.keyframe_offsets[i + 1] as i64 - offset as i64) as i32
            } else {
                0
            };
            self.file
                .seek(SeekFrom::Start(offset + KEYFRAME_LINK_OFFSET))?;
            self.file.write_all(&prev.to_le_bytes())?;
            self.file.write_all(&next.to_le_bytes())?;
        }
        Ok(())
    }
}

// ── Reader ─────────────────────────────────────────────────────

/// Parsed fixed header of an AP file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContainerHeader {
    pub frame_count: u32,
    pub fps: f32,
    pub keyframe_count: u32,
    pub width: u16,
    pub height: u16,
}

/// Per-record metadata returned by [`ContainerReader::read_record`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameRecord {
    pub keyframe: bool,
    /// 0-based keyframe ordinal; zero for delta records.
    pub ordinal: u32,
    /// Signed byte delta to the previous keyframe record; zero for delta
    /// records and for the first keyframe.
    pub prev_offset: i32,
    /// Signed byte delta to the next keyframe record; zero for delta
    /// records and for the last keyframe.
    pub next_offset: i32,
}

/// Sequential reader over the records of an AP file.
pub struct ContainerReader {
    file: File,
    header: ContainerHeader,
    max_payload: usize,
}

impl ContainerReader {
    /// Open an AP file and parse its header.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidContainer`] for a bad magic number, an
    /// unsupported version, a zero dimension, or a truncated header, and
    /// [`CodecError::Io`] for other read failures.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = File::open(path)?;
        let mut raw = [0u8; HEADER_BYTES as usize];
        read_exact_or_invalid(&mut file, &mut raw, "file header")?;

        if raw[0..4] != MAGIC {
            return Err(CodecError::InvalidContainer(
                "bad magic number, not an AP file".into(),
            ));
        }
        if raw[4] != FORMAT_VERSION {
            return Err(CodecError::InvalidContainer(format!(
                "unsupported version {} (expected {FORMAT_VERSION})",
                raw[4]
            )));
        }

        let header = ContainerHeader {
            frame_count: u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]),
            fps: f32::from_le_bytes([raw[9], raw[10], raw[11], raw[12]]),
            keyframe_count: u32::from_le_bytes([raw[13], raw[14], raw[15], raw[16]]),
            width: u16::from_le_bytes([raw[17], raw[18]]),
            height: u16::from_le_bytes([raw[19], raw[20]]),
        };
        if header.width == 0 || header.height == 0 {
            return Err(CodecError::InvalidContainer(format!(
                "invalid frame size {} x {}",
                header.width, header.height
            )));
        }

        // A payload can never exceed the palette, the change map, and every
        // macroblock at its worst-case size; anything larger is corruption.
        let layout = FrameLayout::new(header.width, header.height);
        let max_payload = FRAME_PALETTE_BYTES
            + layout.change_map_bytes()
            + layout.mbs_w * layout.mbs_h * (SUB_PALETTE_COLORS + MAX_RLE_BYTES);

        Ok(Self {
            file,
            header,
            max_payload,
        })
    }

    #[must_use]
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Seek back to the first frame record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the seek fails.
    pub fn rewind(&mut self) -> Result<(), CodecError> {
        self.file.seek(SeekFrom::Start(HEADER_BYTES))?;
        Ok(())
    }

    /// Read the next frame record, replacing the contents of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidContainer`] for an unknown frame type,
    /// an oversized payload, or a truncated record.
    pub fn read_record(&mut self, payload: &mut Vec<u8>) -> Result<FrameRecord, CodecError> {
        let mut head = [0u8; 5];
        read_exact_or_invalid(&mut self.file, &mut head, "frame record")?;
        let frame_type = head[0];
        if frame_type > 1 {
            return Err(CodecError::InvalidContainer(format!(
                "unknown frame type {frame_type}"
            )));
        }
        let payload_len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
        if payload_len > self.max_payload {
            return Err(CodecError::InvalidContainer(format!(
                "frame payload of {payload_len} bytes exceeds the {} byte maximum",
                self.max_payload
            )));
        }

        let mut record = FrameRecord {
            keyframe: frame_type == 1,
            ..FrameRecord::default()
        };
        if record.keyframe {
            let mut links = [0u8; 12];
            read_exact_or_invalid(&mut self.file, &mut links, "keyframe index")?;
            record.ordinal = u32::from_le_bytes([links[0], links[1], links[2], links[3]]);
            record.prev_offset = i32::from_le_bytes([links[4], links[5], links[6], links[7]]);
            record.next_offset = i32::from_le_bytes([links[8], links[9], links[10], links[11]]);
        }

        payload.resize(payload_len, 0);
        read_exact_or_invalid(&mut self.file, payload, "frame payload")?;
        Ok(record)
    }
}

/// Read exactly `buf.len()` bytes, reporting a short read as container
/// truncation rather than a plain I/O failure.
fn read_exact_or_invalid(
    file: &mut File,
    buf: &mut [u8],
    what: &str,
) -> Result<(), CodecError> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::InvalidContainer(format!("truncated {what}"))
        } else {
            CodecError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("header.ap");
        let writer = ContainerWriter::create(&path, 29.97, 320, 200).unwrap();
        writer.finish(0).unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        let header = reader.header();
        assert_eq!(header.frame_count, 0);
        assert_eq!(header.keyframe_count, 0);
        assert_eq!(header.width, 320);
        assert_eq!(header.height, 200);
        assert!((header.fps - 29.97).abs() < 1e-6);
    }

    #[test]
    fn magic_is_anip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("magic.ap");
        ContainerWriter::create(&path, 25.0, 16, 16)
            .unwrap()
            .finish(0)
            .unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], &[0x41, 0x4E, 0x49, 0x50]);
        assert_eq!(bytes[4], 1);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.ap");

        let mut bytes = vec![0u8; HEADER_BYTES as usize];
        bytes[0..4].copy_from_slice(b"JUNK");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(CodecError::InvalidContainer(_))
        ));

        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4] = 2;
        bytes[17] = 16;
        bytes[19] = 16;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(CodecError::InvalidContainer(_))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.ap");
        fs::write(&path, b"ANIP").unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(CodecError::InvalidContainer(_))
        ));
    }

    #[test]
    fn keyframe_chain_links_are_symmetric_deltas() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.ap");
        let mut writer = ContainerWriter::create(&path, 1.0, 16, 16).unwrap();

        let payload_a = vec![1u8; 100];
        let payload_b = vec![2u8; 40];
        let payload_c = vec![3u8; 60];
        writer.write_keyframe_record(&payload_a).unwrap();
        writer.write_delta_record(&payload_b).unwrap();
        writer.write_keyframe_record(&payload_c).unwrap();
        writer.finish(3).unwrap();

        let mut reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.header().frame_count, 3);
        assert_eq!(reader.header().keyframe_count, 2);

        let mut payload = Vec::new();
        let first = reader.read_record(&mut payload).unwrap();
        assert!(first.keyframe);
        assert_eq!(first.ordinal, 0);
        assert_eq!(first.prev_offset, 0);
        // keyframe record a: 17 + 100 bytes, delta record b: 5 + 40 bytes
        assert_eq!(first.next_offset, 117 + 45);
        assert_eq!(payload, payload_a);

        let second = reader.read_record(&mut payload).unwrap();
        assert!(!second.keyframe);
        assert_eq!(payload, payload_b);

        let third = reader.read_record(&mut payload).unwrap();
        assert!(third.keyframe);
        assert_eq!(third.ordinal, 1);
        assert_eq!(third.prev_offset, -(117 + 45));
        assert_eq!(third.next_offset, 0);
        assert_eq!(payload, payload_c);
    }

    #[test]
    fn rewind_restarts_at_first_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rewind.ap");
        let mut writer = ContainerWriter::create(&path, 10.0, 16, 16).unwrap();
        writer.write_keyframe_record(&[9u8; 8]).unwrap();
        writer.finish(1).unwrap();

        let mut reader = ContainerReader::open(&path).unwrap();
        let mut payload = Vec::new();
        reader.read_record(&mut payload).unwrap();
        reader.rewind().unwrap();
        let record = reader.read_record(&mut payload).unwrap();
        assert!(record.keyframe);
        assert_eq!(payload, vec![9u8; 8]);
    }

    #[test]
    fn truncated_payload_is_invalid_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.ap");
        let mut writer = ContainerWriter::create(&path, 10.0, 16, 16).unwrap();
        writer.write_delta_record(&[0u8; 50]).unwrap();
        writer.finish(1).unwrap();

        // Chop the last 10 bytes off.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let mut reader = ContainerReader::open(&path).unwrap();
        let mut payload = Vec::new();
        assert!(matches!(
            reader.read_record(&mut payload),
            Err(CodecError::InvalidContainer(_))
        ));
    }
}
