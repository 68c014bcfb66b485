//! Post-write consistency check.
//!
//! Re-reads a finished image and checks everything that can be checked from
//! the bytes alone: sentinel and root records, identity order, parent links,
//! directory child counts, contiguous payload offsets and total length.

use std::path::Path;

use tracing::info;

use crate::archive::data_start;
use crate::common::{NULL_ID, ROOT_ID};
use crate::error::{ImageError, Result};
use crate::extract::ImageReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: usize,
    pub directories: usize,
    pub files: usize,
    pub payload_bytes: u64,
    pub total_bytes: u64,
}

pub fn verify_image(path: &Path) -> Result<VerifyReport> {
    let reader = ImageReader::open(path)?;
    let report = verify_reader(&reader)?;
    info!(
        "verified {}: {} entries ({} dirs, {} files), {} payload bytes",
        path.display(),
        report.entries,
        report.directories,
        report.files,
        report.payload_bytes
    );
    Ok(report)
}

pub fn verify_reader(reader: &ImageReader) -> Result<VerifyReport> {
    let entries = reader.entries();
    let fail = |msg: String| Err(ImageError::Malformed(msg));

    if entries.len() < 2 {
        return fail(format!("{} entries, expected the sentinel, the root and more", entries.len()));
    }
    let sentinel = &entries[0];
    if sentinel.id != NULL_ID || sentinel.parent_id != NULL_ID || !sentinel.is_dir() {
        return fail("first record is not the null sentinel".into());
    }
    let root = &entries[1];
    if root.id != ROOT_ID || root.parent_id != ROOT_ID || !root.is_dir() {
        return fail("second record is not the self-parented root directory".into());
    }

    let mut child_counts = vec![0u32; entries.len()];
    for (pos, entry) in entries.iter().enumerate() {
        if entry.id as usize != pos {
            return fail(format!("record {} carries id {}", pos, entry.id));
        }
        if pos >= 2 && (entry.parent_id < ROOT_ID || entry.parent_id >= entry.id) {
            return fail(format!("entry {} names parent {}, which does not precede it", entry.id, entry.parent_id));
        }
        if !entries[entry.parent_id as usize].is_dir() {
            return fail(format!("entry {} has a file as its parent", entry.id));
        }
        child_counts[entry.parent_id as usize] += 1;
    }

    let start = data_start(entries.len());
    let mut running = 0u64;
    let (mut directories, mut files) = (0, 0);
    for entry in entries {
        if entry.is_dir() {
            directories += 1;
            if entry.offset != 0 {
                return fail(format!("directory {} has offset {}", entry.id, entry.offset));
            }
            if entry.length != child_counts[entry.id as usize] {
                return fail(format!(
                    "directory {} claims {} children, found {}",
                    entry.id, entry.length, child_counts[entry.id as usize]
                ));
            }
        } else {
            files += 1;
            if entry.offset as u64 != start + running {
                return fail(format!(
                    "file {} at offset {}, expected {}",
                    entry.id,
                    entry.offset,
                    start + running
                ));
            }
            running += entry.length as u64;
        }
    }

    if reader.len_bytes() != start + running {
        return fail(format!("image is {} bytes, layout accounts for {}", reader.len_bytes(), start + running));
    }

    Ok(VerifyReport {
        entries: entries.len(),
        directories,
        files,
        payload_bytes: running,
        total_bytes: reader.len_bytes(),
    })
}
