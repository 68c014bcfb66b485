//! # Image Format and Encoder
//!
//! An image is three regions laid end to end, all integers little-endian:
//!
//! 1.  **Header**: `count: i32`, the number of records including the null sentinel.
//! 2.  **Records**: `count` fixed 88-byte records, in entry order:
//!     `parent: i32, id: i32, mtime: i32, name: [u8; 64], mode: u32, offset: u32, length: u32`.
//!     The name is NUL-padded and holds at most 63 bytes. For files `offset` is the
//!     absolute position of the payload and `length` its size. For directories
//!     `offset` is 0 and `length` counts the entries whose parent is this directory.
//! 3.  **Payloads**: the bytes of every non-empty file, in entry order, with no
//!     padding between them.
//!
//! Encoding is a layout pass that validates the whole entry sequence and
//! computes every record, followed by a header pass and a payload pass. No
//! byte is written before the layout pass has succeeded.

use std::io::{self, Write};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::common::{
    format_mtime, Entry, EntryKind, Payload, HEADER_SIZE, MAX_MTIME, MAX_NAME_LEN, NAME_FIELD_LEN, NULL_ID,
    RECORD_SIZE, ROOT_ID,
};
use crate::error::{ImageError, Result};

/// Where a record's `offset`/`length` pair comes from. Both collapse to the
/// same two fields on disk, but mean different things.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    File { offset: u32, length: u32 },
    Directory { child_count: u32 },
}

/// One fully laid-out record, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub parent_id: u32,
    pub id: u32,
    pub mtime: u32,
    pub name: [u8; NAME_FIELD_LEN],
    pub mode: u32,
    pub layout: Layout,
}

impl Record {
    pub fn offset(&self) -> u32 {
        match self.layout {
            Layout::File { offset, .. } => offset,
            Layout::Directory { .. } => 0,
        }
    }

    pub fn length(&self) -> u32 {
        match self.layout {
            Layout::File { length, .. } => length,
            Layout::Directory { child_count } => child_count,
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE as usize] {
        let mut buf = [0u8; RECORD_SIZE as usize];
        buf[0..4].copy_from_slice(&(self.parent_id as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&(self.id as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&(self.mtime as i32).to_le_bytes());
        buf[12..76].copy_from_slice(&self.name);
        buf[76..80].copy_from_slice(&self.mode.to_le_bytes());
        buf[80..84].copy_from_slice(&self.offset().to_le_bytes());
        buf[84..88].copy_from_slice(&self.length().to_le_bytes());
        buf
    }
}

/// Non-fatal findings of an encode run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    NameTruncated { id: u32, original: String, stored: String },
}

/// The computed layout of an image, before anything is written.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    pub records: Vec<Record>,
    /// Size of header plus all records; the first payload starts here.
    pub data_start: u64,
    pub payload_bytes: u64,
    pub diagnostics: Vec<Diagnostic>,
}

impl LayoutPlan {
    pub fn total_bytes(&self) -> u64 {
        self.data_start + self.payload_bytes
    }
}

/// What an encode run produced.
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    pub entry_count: usize,
    pub records: Vec<Record>,
    pub payload_bytes: u64,
    pub total_bytes: u64,
    pub diagnostics: Vec<Diagnostic>,
}

/// Pads `name` into the fixed field, keeping at most [`MAX_NAME_LEN`] bytes.
/// Returns whether anything was cut.
pub fn encode_name(name: &[u8]) -> ([u8; NAME_FIELD_LEN], bool) {
    let mut field = [0u8; NAME_FIELD_LEN];
    let kept = name.len().min(MAX_NAME_LEN);
    field[..kept].copy_from_slice(&name[..kept]);
    (field, kept < name.len())
}

/// Bytes before the first payload for an image of `count` records.
pub fn data_start(count: usize) -> u64 {
    HEADER_SIZE + RECORD_SIZE * count as u64
}

/// Validates `entries` and computes every record.
///
/// Checks that the sequence starts with the null sentinel and the self-parented
/// root, that identities equal positions, that every other entry's parent is an
/// earlier directory, that mtimes are in range and that all offsets and lengths
/// fit their 32-bit fields.
pub fn plan_layout(entries: &[Entry]) -> Result<LayoutPlan> {
    if entries.len() < 2 {
        return Err(ImageError::EmptyImage);
    }
    if entries.len() > i32::MAX as usize {
        return Err(ImageError::TooLarge { what: "entry count", value: entries.len() as u64 });
    }
    validate_sequence(entries)?;

    // Identities equal positions, so parent ids index straight into this.
    let mut child_counts = vec![0u32; entries.len()];
    for entry in entries {
        child_counts[entry.parent_id as usize] += 1;
    }

    let data_start = data_start(entries.len());
    let mut running: u64 = 0;
    let mut records = Vec::with_capacity(entries.len());
    let mut diagnostics = Vec::new();

    for entry in entries {
        if entry.mtime as i64 > MAX_MTIME {
            return Err(ImageError::MtimeOutOfRange { path: entry.describe(), mtime: entry.mtime as i64 });
        }

        let (name, truncated) = encode_name(&entry.name);
        if truncated {
            let stored = String::from_utf8_lossy(&name[..MAX_NAME_LEN]).into_owned();
            warn!("truncated filename \"{}\" to \"{}\"", entry.display_name(), stored);
            diagnostics.push(Diagnostic::NameTruncated { id: entry.id, original: entry.display_name(), stored });
        }

        let layout = match entry.kind {
            EntryKind::File => {
                let offset = data_start + running;
                let length = fit_u32("file length", entry.size)?;
                let offset = fit_u32("payload offset", offset)?;
                running += entry.size;
                Layout::File { offset, length }
            }
            EntryKind::Directory => Layout::Directory { child_count: child_counts[entry.id as usize] },
        };

        records.push(Record {
            parent_id: entry.parent_id,
            id: entry.id,
            mtime: entry.mtime,
            name,
            mode: entry.mode,
            layout,
        });
    }

    fit_u32("image size", data_start + running)?;

    Ok(LayoutPlan { records, data_start, payload_bytes: running, diagnostics })
}

fn fit_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| ImageError::TooLarge { what, value })
}

fn validate_sequence(entries: &[Entry]) -> Result<()> {
    let bad = |id: u32, reason: &str| ImageError::InvalidSequence { id, reason: reason.to_string() };

    let sentinel = &entries[0];
    if sentinel.id != NULL_ID || sentinel.parent_id != NULL_ID || !sentinel.is_dir() {
        return Err(bad(sentinel.id, "the first entry must be the null sentinel (id 0, parent 0, directory)"));
    }
    let root = &entries[1];
    if root.id != ROOT_ID || root.parent_id != ROOT_ID || !root.is_dir() {
        return Err(bad(root.id, "the second entry must be the root directory (id 1, parent 1)"));
    }

    for (pos, entry) in entries.iter().enumerate() {
        if entry.id as usize != pos {
            return Err(bad(entry.id, &format!("identity out of order, expected {}", pos)));
        }
        if pos >= 2 {
            if entry.parent_id < ROOT_ID || entry.parent_id >= entry.id {
                return Err(ImageError::ParentNotFound { path: entry.describe() });
            }
            if !entries[entry.parent_id as usize].is_dir() {
                return Err(bad(entry.id, &format!("parent {} is not a directory", entry.parent_id)));
            }
        }
        if entry.kind == EntryKind::File && entry.size > 0 && entry.payload == Payload::None {
            return Err(bad(entry.id, "file has a length but no payload source"));
        }
    }
    Ok(())
}

/// Tracks the write cursor of an append-only sink.
pub struct PositionWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> PositionWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for PositionWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encodes `entries` into `out`.
///
/// Offsets are relative to the first byte written to `out`. Every error
/// except a failed payload read or a layout mismatch is raised before the
/// first write. After a failure mid-payload `out` holds a partial image and
/// must be discarded.
pub fn encode<W: Write>(entries: &[Entry], out: W) -> Result<EncodeSummary> {
    let plan = plan_layout(entries)?;
    let mut out = PositionWriter::new(out);

    out.write_all(&(entries.len() as i32).to_le_bytes())?;
    debug!("initrd header length: {} bytes", HEADER_SIZE);
    debug!("file header length: {} bytes per file", RECORD_SIZE);

    for record in &plan.records {
        out.write_all(&record.to_bytes())?;
        let is_dir = matches!(record.layout, Layout::Directory { .. });
        debug!(
            "wrote file header: parent={} inode={} mtime={} name={} mode={:#o} offset={} length={}{}",
            record.parent_id,
            record.id,
            format_mtime(record.mtime),
            String::from_utf8_lossy(record.name.split(|&b| b == 0).next().unwrap_or_default()),
            record.mode,
            record.offset(),
            record.length(),
            if is_dir { " (# direct children)" } else { "" }
        );
    }

    for (entry, record) in entries.iter().zip(&plan.records) {
        let Layout::File { offset, length } = record.layout else { continue };
        if length == 0 {
            debug!("skipping write of 0-length file {}", entry.describe().display());
            continue;
        }
        check_position(entry, offset as u64, out.position())?;
        entry.payload.copy_to(&mut out)?;
        check_position(entry, offset as u64 + length as u64, out.position())?;
        debug!(
            "wrote {} bytes of data for file {} at offset {}, real path {}",
            length,
            entry.display_name(),
            offset,
            entry.describe().display()
        );
    }

    out.flush()?;
    let total_bytes = out.position();
    info!("done creating initrd: wrote {} bytes", total_bytes);

    Ok(EncodeSummary {
        entry_count: entries.len(),
        records: plan.records,
        payload_bytes: plan.payload_bytes,
        total_bytes,
        diagnostics: plan.diagnostics,
    })
}

fn check_position(entry: &Entry, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(ImageError::LayoutMismatch { name: entry.describe().display().to_string(), expected, actual });
    }
    Ok(())
}
