//! Host filesystem helpers.
//!
//! The image stores unix mode bits, byte names and whole-second mtimes. On
//! unix these come straight from the metadata. Other hosts get synthesized
//! modes so a tree can still be packed there.

use std::ffi::OsStr;
use std::fs::Metadata;
use std::io;
use std::path::Path;

#[cfg(unix)]
pub fn unix_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
pub fn unix_mode(meta: &Metadata) -> u32 {
    use crate::common::{S_IFDIR, S_IFREG};
    if meta.is_dir() {
        S_IFDIR | 0o755
    } else if meta.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    }
}

/// Modification time in whole seconds since the epoch. Negative before 1970.
#[cfg(unix)]
pub fn mtime_secs(meta: &Metadata) -> io::Result<i64> {
    use std::os::unix::fs::MetadataExt;
    Ok(meta.mtime())
}

#[cfg(not(unix))]
pub fn mtime_secs(meta: &Metadata) -> io::Result<i64> {
    use std::time::UNIX_EPOCH;
    let modified = meta.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    })
}

#[cfg(unix)]
pub fn name_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(not(unix))]
pub fn name_bytes(name: &OsStr) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
pub fn name_from_bytes(bytes: &[u8]) -> std::ffi::OsString {
    use std::os::unix::ffi::OsStrExt;
    OsStr::from_bytes(bytes).to_os_string()
}

#[cfg(not(unix))]
pub fn name_from_bytes(bytes: &[u8]) -> std::ffi::OsString {
    String::from_utf8_lossy(bytes).into_owned().into()
}

/// Set POSIX permission bits on Unix.
#[cfg(unix)]
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

/// No-op elsewhere: POSIX permission bits are not preserved.
#[cfg(not(unix))]
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn mode_and_mtime_of_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();
        set_unix_permissions(&path, 0o100640).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(unix_mode(&meta) & 0o7777, 0o640);
        assert_eq!(unix_mode(&meta) & crate::common::S_IFMT, crate::common::S_IFREG);
        assert!(mtime_secs(&meta).unwrap() > 0);
    }

    #[test]
    fn names_are_raw_bytes() {
        assert_eq!(name_bytes(OsStr::new("ls")), b"ls".to_vec());
        assert_eq!(name_from_bytes(b"ls").as_os_str(), OsStr::new("ls"));
    }
}
