//! # Reading Images Back
//!
//! Host-side decoder for finished images: parses the header and records,
//! hands out payload slices, lists the contents and recreates the tree on disk.
//! The kernel-side loader is a separate program; this exists so images can be
//! inspected, verified and round-tripped on the build machine.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::common::{format_mtime, EntryKind, HEADER_SIZE, NAME_FIELD_LEN, RECORD_SIZE, ROOT_ID, S_IFDIR};
use crate::error::{ImageError, Result};
use crate::fsx;

/// One record as stored in an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub parent_id: u32,
    pub id: u32,
    pub mtime: u32,
    /// Name bytes up to the first NUL.
    pub name: Vec<u8>,
    pub mode: u32,
    pub offset: u32,
    pub length: u32,
}

impl DecodedEntry {
    pub fn kind(&self) -> EntryKind {
        if self.mode & S_IFDIR != 0 {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        let i32_at = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let non_negative = |what: &str, v: i32| {
            u32::try_from(v).map_err(|_| ImageError::Malformed(format!("negative {} {}", what, v)))
        };

        let name_field = &buf[12..12 + NAME_FIELD_LEN];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
        Ok(DecodedEntry {
            parent_id: non_negative("parent id", i32_at(0))?,
            id: non_negative("id", i32_at(4))?,
            mtime: non_negative("mtime", i32_at(8))?,
            name: name_field[..name_len].to_vec(),
            mode: u32_at(76),
            offset: u32_at(80),
            length: u32_at(84),
        })
    }
}

/// A parsed image held in memory.
pub struct ImageReader {
    bytes: Vec<u8>,
    entries: Vec<DecodedEntry>,
}

impl ImageReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(ImageError::io(path))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(ImageError::io(path))?;
        Self::from_bytes(bytes)
    }

    /// Parses the header and every record. File payloads must lie inside the image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if (bytes.len() as u64) < HEADER_SIZE {
            return Err(ImageError::Malformed(format!("{} bytes is too short for the header", bytes.len())));
        }
        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let count = usize::try_from(count).map_err(|_| ImageError::Malformed(format!("negative entry count {}", count)))?;
        let records_end = HEADER_SIZE + RECORD_SIZE * count as u64;
        if (bytes.len() as u64) < records_end {
            return Err(ImageError::Malformed(format!(
                "{} records need {} bytes, image has {}",
                count,
                records_end,
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for chunk in bytes[HEADER_SIZE as usize..records_end as usize].chunks_exact(RECORD_SIZE as usize) {
            let entry = DecodedEntry::parse(chunk)?;
            if !entry.is_dir() && entry.offset as u64 + entry.length as u64 > bytes.len() as u64 {
                return Err(ImageError::Malformed(format!(
                    "payload of '{}' ({} bytes at {}) runs past the end of the image",
                    entry.name_lossy(),
                    entry.length,
                    entry.offset
                )));
            }
            entries.push(entry);
        }
        debug!("parsed {} records from a {} byte image", entries.len(), bytes.len());
        Ok(Self { bytes, entries })
    }

    pub fn entries(&self) -> &[DecodedEntry] {
        &self.entries
    }

    /// Looks an entry up by identity. Identities equal record positions in well-formed images.
    pub fn get(&self, id: u32) -> Option<&DecodedEntry> {
        self.entries.get(id as usize).filter(|e| e.id == id).or_else(|| self.entries.iter().find(|e| e.id == id))
    }

    pub fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// File contents; empty for directories.
    pub fn payload(&self, entry: &DecodedEntry) -> &[u8] {
        if entry.is_dir() {
            return &[];
        }
        let start = entry.offset as usize;
        &self.bytes[start..start + entry.length as usize]
    }

    /// Direct children of `id`, not counting a self-parented entry.
    pub fn children(&self, id: u32) -> impl Iterator<Item = &DecodedEntry> + '_ {
        self.entries.iter().filter(move |e| e.parent_id == id && e.id != id)
    }

    /// Absolute path inside the image, `/` for the root. `None` for the sentinel,
    /// unknown ids and broken parent chains.
    pub fn path_of(&self, id: u32) -> Option<PathBuf> {
        let mut names = Vec::new();
        let mut cur = self.get(id)?;
        while cur.id != ROOT_ID {
            if cur.id == cur.parent_id || names.len() > self.entries.len() {
                return None;
            }
            names.push(fsx::name_from_bytes(&cur.name));
            cur = self.get(cur.parent_id)?;
        }
        let mut path = PathBuf::from("/");
        path.extend(names.iter().rev());
        Some(path)
    }
}

/// One line of a listing, also the JSON shape of `list --json`.
#[derive(Debug, Clone, Serialize)]
pub struct ListingRow {
    pub id: u32,
    pub parent_id: u32,
    pub kind: EntryKind,
    pub mode: String,
    pub mtime: u32,
    pub modified: String,
    pub offset: u32,
    pub length: u32,
    pub path: String,
}

pub fn listing(reader: &ImageReader) -> Vec<ListingRow> {
    reader
        .entries()
        .iter()
        .map(|e| ListingRow {
            id: e.id,
            parent_id: e.parent_id,
            kind: e.kind(),
            mode: format!("{:o}", e.mode),
            mtime: e.mtime,
            modified: format_mtime(e.mtime),
            offset: e.offset,
            length: e.length,
            path: reader.path_of(e.id).map(|p| p.display().to_string()).unwrap_or_default(),
        })
        .collect()
}

/// Writes a listing of `reader` to `out`, as text lines or as a JSON array.
pub fn list_image<W: Write>(reader: &ImageReader, json: bool, mut out: W) -> Result<()> {
    let rows = listing(reader);
    if json {
        serde_json::to_writer_pretty(&mut out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "Image ({} entries, {} bytes):", rows.len(), reader.len_bytes())?;
    for row in rows {
        let size = match row.kind {
            EntryKind::Directory => format!("{} children", row.length),
            EntryKind::File => format!("{} bytes", row.length),
        };
        writeln!(
            out,
            "{:>5} {:>5} {:>7} {:>16} {} {}",
            row.id, row.parent_id, row.mode, size, row.modified, row.path
        )?;
    }
    Ok(())
}

/// Recreates the image's tree below `output_dir`.
///
/// File modes are applied as stored. Directories keep owner write so the
/// extracted tree can still be modified or removed.
pub fn extract_to_dir(reader: &ImageReader, output_dir: &Path) -> Result<usize> {
    fs::create_dir_all(output_dir).map_err(ImageError::io(output_dir))?;

    let mut written = 0;
    for entry in reader.entries().iter().filter(|e| e.id > ROOT_ID) {
        if entry.name.is_empty() || entry.name == b"." || entry.name == b".." || entry.name.contains(&b'/') {
            return Err(ImageError::Malformed(format!("unsafe entry name {:?}", entry.name_lossy())));
        }
        let rel = reader
            .path_of(entry.id)
            .ok_or_else(|| ImageError::Malformed(format!("entry {} has no path to the root", entry.id)))?;
        let target = output_dir.join(rel.strip_prefix("/").unwrap_or(&rel));

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(ImageError::io(&target))?;
            fsx::set_unix_permissions(&target, entry.mode | 0o200).map_err(ImageError::io(&target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(ImageError::io(parent))?;
            }
            fs::write(&target, reader.payload(entry)).map_err(ImageError::io(&target))?;
            fsx::set_unix_permissions(&target, entry.mode).map_err(ImageError::io(&target))?;
            written += 1;
        }
    }
    info!("extracted {} files to {}", written, output_dir.display());
    Ok(written)
}
