//! Common types and format constants shared by the collector, encoder and decoder.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ImageError, Result};

/// Size of the image header: a single `i32` entry count.
pub const HEADER_SIZE: u64 = 4;
/// Width of the NUL-padded name field in every record.
pub const NAME_FIELD_LEN: usize = 64;
/// Longest name that survives unchanged; one byte is kept for the terminator.
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;
/// `parent:i32 id:i32 mtime:i32 name:[u8; 64] mode:u32 offset:u32 length:u32`
pub const RECORD_SIZE: u64 = 4 + 4 + 4 + NAME_FIELD_LEN as u64 + 4 + 4 + 4;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
/// Write permission for owner, group and other. Images are read-only media.
pub const WRITE_BITS: u32 = 0o222;

/// Largest accepted modification time (seconds since the epoch).
pub const MAX_MTIME: i64 = (1 << 31) - 2;

/// Identity of the null sentinel. Never a valid parent for real entries.
pub const NULL_ID: u32 = 0;
/// Identity of the tree root; the root is its own parent.
pub const ROOT_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Where a file entry's bytes come from. Never part of the binary format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Directories and the sentinel.
    None,
    /// Read lazily from the host filesystem while the payload region is written.
    Path(PathBuf),
    /// Bytes supplied directly by the caller.
    Inline(Vec<u8>),
}

impl Payload {
    /// Copies the payload into `out`, returning the number of bytes copied.
    /// A source file handle lives only for the duration of this call.
    pub fn copy_to<W: Write>(&self, out: &mut W) -> Result<u64> {
        match self {
            Payload::None => Ok(0),
            Payload::Path(path) => {
                let mut file = File::open(path).map_err(ImageError::io(path))?;
                io::copy(&mut file, out).map_err(ImageError::io(path))
            }
            Payload::Inline(bytes) => {
                out.write_all(bytes)?;
                Ok(bytes.len() as u64)
            }
        }
    }
}

/// One file or directory node of the image, as collected.
///
/// Entries are immutable once built. The layout pass derives a separate
/// [`crate::archive::Record`] for each one instead of patching offsets in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u32,
    pub parent_id: u32,
    /// Full name as found on the host; truncated only when serialized.
    pub name: Vec<u8>,
    pub kind: EntryKind,
    /// Host mode bits with [`WRITE_BITS`] cleared. Carries [`S_IFDIR`] for directories.
    pub mode: u32,
    pub mtime: u32,
    /// Payload length for files, always 0 for directories.
    pub size: u64,
    pub payload: Payload,
    /// Host path the entry was collected from, if any.
    pub origin: Option<PathBuf>,
}

impl Entry {
    /// The null sentinel: `id=0, parent_id=0`, an empty nameless directory.
    pub fn sentinel() -> Self {
        Entry {
            id: NULL_ID,
            parent_id: NULL_ID,
            name: Vec::new(),
            kind: EntryKind::Directory,
            mode: S_IFDIR,
            mtime: 0,
            size: 0,
            payload: Payload::None,
            origin: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Path used in diagnostics: the host origin if known, the name otherwise.
    pub fn describe(&self) -> PathBuf {
        self.origin.clone().unwrap_or_else(|| PathBuf::from(self.display_name()))
    }
}

/// Clears the write bits and forces the directory flag to agree with `kind`.
pub fn read_only_mode(raw_mode: u32, kind: EntryKind) -> u32 {
    let mode = raw_mode & !WRITE_BITS;
    match kind {
        EntryKind::Directory => (mode & !S_IFMT) | S_IFDIR,
        EntryKind::File if mode & S_IFMT == 0 => mode | S_IFREG,
        EntryKind::File => mode & !S_IFDIR,
    }
}

/// Checks that `mtime` fits the signed 32-bit field.
pub fn checked_mtime(mtime: i64, origin: &Path) -> Result<u32> {
    if (0..=MAX_MTIME).contains(&mtime) {
        Ok(mtime as u32)
    } else {
        Err(ImageError::MtimeOutOfRange { path: origin.to_path_buf(), mtime })
    }
}

/// Human-readable UTC timestamp for logs and listings.
pub fn format_mtime(mtime: u32) -> String {
    chrono::DateTime::from_timestamp(mtime as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| mtime.to_string())
}

/// Hands out identities in discovery order, starting at [`ROOT_ID`]. Never reuses one.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: ROOT_ID }
    }

    pub fn next_id(&mut self) -> Result<u32> {
        let id = self.next;
        if id > i32::MAX as u32 {
            return Err(ImageError::TooLarge { what: "entry count", value: id as u64 });
        }
        self.next += 1;
        Ok(id)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered entry sequence that always starts with the null sentinel.
///
/// This is the hand-off between the collector and the encoder. It can also be
/// filled directly by callers that have their own notion of a tree.
#[derive(Debug)]
pub struct EntryList {
    entries: Vec<Entry>,
    ids: IdAllocator,
}

impl EntryList {
    pub fn new() -> Self {
        Self { entries: vec![Entry::sentinel()], ids: IdAllocator::new() }
    }

    /// Adds the root directory. Must be called exactly once, before any other entry.
    pub fn add_root(&mut self, raw_mode: u32, mtime: i64, origin: Option<PathBuf>) -> Result<u32> {
        if self.entries.len() != 1 {
            return Err(ImageError::InvalidSequence {
                id: self.entries.len() as u32,
                reason: "the root must directly follow the null sentinel".into(),
            });
        }
        let diag_path = origin.clone().unwrap_or_else(|| PathBuf::from("/"));
        let mtime = checked_mtime(mtime, &diag_path)?;
        let id = self.ids.next_id()?;
        self.entries.push(Entry {
            id,
            parent_id: id,
            name: b"/".to_vec(),
            kind: EntryKind::Directory,
            mode: read_only_mode(raw_mode, EntryKind::Directory),
            mtime,
            size: 0,
            payload: Payload::None,
            origin,
        });
        Ok(id)
    }

    pub fn add_dir(
        &mut self,
        parent_id: u32,
        name: impl Into<Vec<u8>>,
        raw_mode: u32,
        mtime: i64,
        origin: Option<PathBuf>,
    ) -> Result<u32> {
        self.push(parent_id, name.into(), EntryKind::Directory, raw_mode, mtime, 0, Payload::None, origin)
    }

    /// Adds a file whose bytes are read from `path` at encode time.
    pub fn add_file(
        &mut self,
        parent_id: u32,
        name: impl Into<Vec<u8>>,
        raw_mode: u32,
        mtime: i64,
        size: u64,
        path: PathBuf,
    ) -> Result<u32> {
        let origin = Some(path.clone());
        self.push(parent_id, name.into(), EntryKind::File, raw_mode, mtime, size, Payload::Path(path), origin)
    }

    /// Adds a file whose bytes are held in memory.
    pub fn add_inline_file(
        &mut self,
        parent_id: u32,
        name: impl Into<Vec<u8>>,
        raw_mode: u32,
        mtime: i64,
        bytes: Vec<u8>,
    ) -> Result<u32> {
        let size = bytes.len() as u64;
        self.push(parent_id, name.into(), EntryKind::File, raw_mode, mtime, size, Payload::Inline(bytes), None)
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        parent_id: u32,
        name: Vec<u8>,
        kind: EntryKind,
        raw_mode: u32,
        mtime: i64,
        size: u64,
        payload: Payload,
        origin: Option<PathBuf>,
    ) -> Result<u32> {
        let diag_path = origin.clone().unwrap_or_else(|| PathBuf::from(String::from_utf8_lossy(&name).into_owned()));
        if self.entries.len() < 2 {
            return Err(ImageError::InvalidSequence {
                id: self.entries.len() as u32,
                reason: format!("'{}' added before the root directory", diag_path.display()),
            });
        }
        match self.get(parent_id) {
            Some(parent) if parent.is_dir() && parent_id != NULL_ID => {}
            _ => return Err(ImageError::ParentNotFound { path: diag_path }),
        }
        let mtime = checked_mtime(mtime, &diag_path)?;
        let id = self.ids.next_id()?;
        self.entries.push(Entry {
            id,
            parent_id,
            name,
            kind,
            mode: read_only_mode(raw_mode, kind),
            mtime,
            size,
            payload,
            origin,
        });
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&Entry> {
        // Identities equal positions.
        self.entries.get(id as usize)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Number of entries including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing but the sentinel is present.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for EntryList {
    fn default() -> Self {
        Self::new()
    }
}
