//! Image building from a directory tree to a file on disk.
//!
//! The image is encoded into a temporary file next to the destination and
//! renamed into place only after encoding (and, if enabled, verification)
//! succeeded. A failed build never leaves a partial image at the destination.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::archive::{encode, plan_layout, EncodeSummary};
use crate::collect::{collect_tree, CollectOptions};
use crate::common::Entry;
use crate::error::{ImageError, Result};
use crate::fsx;
use crate::verify::verify_image;

pub const DEFAULT_SOURCE: &str = "initrd";
pub const DEFAULT_OUTPUT: &str = "isofiles/boot/initrd.img";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub source: PathBuf,
    pub output: PathBuf,
    pub collect: CollectOptions,
    /// Re-read and check the image before moving it into place.
    pub verify: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            output: PathBuf::from(DEFAULT_OUTPUT),
            collect: CollectOptions::default(),
            verify: true,
        }
    }
}

/// Collects `config.source` and writes the image to `config.output`.
pub fn build_image(config: &BuildConfig) -> Result<EncodeSummary> {
    let list = collect_tree(&config.source, &config.collect)?;
    write_image(list.entries(), &config.output, config.verify)
}

/// Encodes `entries` into `output`, replacing it atomically.
pub fn write_image(entries: &[Entry], output: &Path, verify: bool) -> Result<EncodeSummary> {
    // Fail on bad input before touching the filesystem.
    plan_layout(entries)?;

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(ImageError::io(dir))?;
    let tmp = NamedTempFile::new_in(dir).map_err(ImageError::io(dir))?;

    // use 1 MiB buffer to keep the many small record writes off the syscall path
    let mut writer = BufWriter::with_capacity(1 << 20, tmp);
    let summary = encode(entries, &mut writer)?;
    writer.flush().map_err(ImageError::io(output))?;
    let tmp = writer.into_inner().map_err(|e| ImageError::Io { source: e.into_error(), path: output.to_path_buf() })?;
    tmp.as_file().sync_all().map_err(ImageError::io(tmp.path()))?;

    if verify {
        verify_image(tmp.path())?;
    }
    fsx::set_unix_permissions(tmp.path(), 0o644).map_err(ImageError::io(tmp.path()))?;
    tmp.persist(output).map_err(|e| ImageError::Io { source: e.error, path: output.to_path_buf() })?;

    info!("wrote {} ({} bytes, {} entries)", output.display(), summary.total_bytes, summary.entry_count);
    Ok(summary)
}
