//! # Tree Collector
//!
//! Walks a source directory top-down and turns it into an [`EntryList`]: the
//! null sentinel, the root (id 1, its own parent) and then every directory
//! and regular file, parents always before their descendants.
//!
//! A directory's direct children all get identities before any of its
//! subdirectories is entered. Within a directory, subdirectories come before
//! files and each group is sorted by name, so the same tree always produces
//! the same identities.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::common::EntryList;
use crate::error::{ImageError, Result};
use crate::fsx;

/// Directory names recorded but never descended into by default. These hold
/// other filesystems that may be mounted in the staging tree on the host.
pub const DEFAULT_NO_DESCEND: [&str; 2] = ["ext2", "fat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    /// Directories with one of these names appear as empty entries.
    pub no_descend: BTreeSet<String>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self { no_descend: DEFAULT_NO_DESCEND.iter().map(|s| s.to_string()).collect() }
    }
}

impl CollectOptions {
    /// Options that descend into every directory.
    pub fn descend_all() -> Self {
        Self { no_descend: BTreeSet::new() }
    }

    pub fn with_no_descend<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { no_descend: names.into_iter().map(Into::into).collect() }
    }

    fn skips(&self, name: &OsStr) -> bool {
        name.to_str().map_or(false, |n| self.no_descend.contains(n))
    }
}

/// Collects `root` and everything below it.
pub fn collect_tree(root: &Path, options: &CollectOptions) -> Result<EntryList> {
    let mut collector = Collector::new(options);
    collector.add_root(root)?;
    collector.walk(root)?;
    info!(
        "collected {} entries from {} ({} not descended)",
        collector.list.len(),
        root.display(),
        collector.not_descended
    );
    Ok(collector.list)
}

struct Collector<'a> {
    options: &'a CollectOptions,
    list: EntryList,
    /// Collected directories by host path. Files are never parents.
    dirs: HashMap<PathBuf, u32>,
    not_descended: usize,
}

impl<'a> Collector<'a> {
    fn new(options: &'a CollectOptions) -> Self {
        Self { options, list: EntryList::new(), dirs: HashMap::new(), not_descended: 0 }
    }

    fn add_root(&mut self, root: &Path) -> Result<()> {
        let meta = std::fs::metadata(root).map_err(ImageError::io(root))?;
        if !meta.is_dir() {
            return Err(ImageError::Io {
                source: io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
                path: root.to_path_buf(),
            });
        }
        let mtime = fsx::mtime_secs(&meta).map_err(ImageError::io(root))?;
        let id = self.list.add_root(fsx::unix_mode(&meta), mtime, Some(root.to_path_buf()))?;
        self.dirs.insert(root.to_path_buf(), id);
        Ok(())
    }

    /// Visits directories in pre-order. Each directory's direct children are
    /// all recorded before any of its subdirectories is entered.
    fn walk(&mut self, root: &Path) -> Result<()> {
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut descend = Vec::new();
            for item in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by(|a, b| {
                    b.file_type()
                        .is_dir()
                        .cmp(&a.file_type().is_dir())
                        .then_with(|| a.file_name().cmp(b.file_name()))
                })
            {
                let dent = item?;
                let path = dent.path();
                let ft = dent.file_type();
                if !ft.is_dir() && !ft.is_file() {
                    warn!("skipping {}: only regular files and directories are stored", path.display());
                    continue;
                }

                let parent_id = self.parent_of(path)?;
                let meta = dent.metadata()?;
                let mtime = fsx::mtime_secs(&meta).map_err(ImageError::io(path))?;
                let mode = fsx::unix_mode(&meta);
                let name = fsx::name_bytes(dent.file_name());

                if ft.is_dir() {
                    let id = self.list.add_dir(parent_id, name, mode, mtime, Some(path.to_path_buf()))?;
                    self.dirs.insert(path.to_path_buf(), id);
                    if self.options.skips(dent.file_name()) {
                        debug!("not descending into {}", path.display());
                        self.not_descended += 1;
                    } else {
                        descend.push(path.to_path_buf());
                    }
                } else {
                    self.list.add_file(parent_id, name, mode, mtime, meta.len(), path.to_path_buf())?;
                }
            }
            // Reversed so the first subdirectory is entered next.
            pending.extend(descend.into_iter().rev());
        }
        Ok(())
    }

    fn parent_of(&self, path: &Path) -> Result<u32> {
        path.parent()
            .and_then(|dir| self.dirs.get(dir))
            .copied()
            .ok_or_else(|| ImageError::ParentNotFound { path: path.to_path_buf() })
    }
}
