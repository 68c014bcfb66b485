//! Build images from real directory trees and read them back.

use initrd_pack::common::{S_IFDIR, WRITE_BITS};
use initrd_pack::extract::extract_to_dir;
use initrd_pack::{build_image, verify_image, BuildConfig, CollectOptions, ImageReader};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use walkdir::WalkDir;

// ---------- helpers ----------

fn create_tree(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::create_dir_all(root.join("etc/init.d")).unwrap();
    fs::create_dir_all(root.join("fat/EFI")).unwrap();
    fs::create_dir_all(root.join("ext2")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("bin/ls"), b"ABCD").unwrap();
    fs::write(root.join("bin/cat"), vec![0xAB; 4096]).unwrap();
    fs::write(root.join("etc/init.d/rc"), b"#!/bin/sh\n").unwrap();
    fs::write(root.join("etc/zero"), b"").unwrap();
    fs::write(root.join("fat/EFI/boot.efi"), b"should not be packed").unwrap();
    fs::write(root.join("mounts"), b"initrd /\n").unwrap();
}

fn config(src: &Path, out: &Path) -> BuildConfig {
    BuildConfig {
        source: src.to_path_buf(),
        output: out.to_path_buf(),
        collect: CollectOptions::default(),
        verify: true,
    }
}

/// path -> (is_dir, contents) for everything below `root`, relative paths.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, (bool, Vec<u8>)> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|dent| {
            let dent = dent.unwrap();
            let rel = dent.path().strip_prefix(root).unwrap().to_path_buf();
            if dent.file_type().is_dir() {
                (rel, (true, Vec::new()))
            } else {
                (rel, (false, fs::read(dent.path()).unwrap()))
            }
        })
        .collect()
}

// ---------- tests ----------

#[test]
fn decode_reconstructs_tree() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    create_tree(src.path());
    let out = tempdir()?;
    let image_path = out.path().join("initrd.img");
    build_image(&config(src.path(), &image_path))?;

    let image = ImageReader::open(&image_path)?;
    let mut seen = BTreeMap::new();
    for entry in image.entries().iter().skip(2) {
        let path = image.path_of(entry.id).expect("every entry reaches the root");
        let parent = image.get(entry.parent_id).unwrap();
        assert!(parent.is_dir());
        assert_eq!(entry.mode & WRITE_BITS, 0);
        seen.insert(path, (entry.is_dir(), image.payload(entry).to_vec()));
    }

    let mut expected = snapshot(src.path());
    // Present as empty directories, never descended into.
    expected.retain(|p, _| p.components().count() == 1 || !(p.starts_with("fat") || p.starts_with("ext2")));
    let expected: BTreeMap<PathBuf, _> = expected.into_iter().map(|(p, v)| (Path::new("/").join(p), v)).collect();
    assert_eq!(seen, expected);

    let fat = image.entries().iter().find(|e| e.name == b"fat").unwrap();
    assert_eq!(fat.length, 0);
    assert_eq!(fat.mode & S_IFDIR, S_IFDIR);
    Ok(())
}

#[test]
fn same_tree_same_bytes() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    create_tree(src.path());
    let out = tempdir()?;
    let a = out.path().join("a.img");
    let b = out.path().join("b.img");
    build_image(&config(src.path(), &a))?;
    build_image(&config(src.path(), &b))?;
    assert_eq!(fs::read(&a)?, fs::read(&b)?);
    Ok(())
}

#[test]
fn extract_matches_source() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    create_tree(src.path());
    let out = tempdir()?;
    let image_path = out.path().join("initrd.img");
    let config = BuildConfig { collect: CollectOptions::descend_all(), ..config(src.path(), &image_path) };
    let summary = build_image(&config)?;

    let report = verify_image(&image_path)?;
    assert_eq!(report.total_bytes, summary.total_bytes);
    assert_eq!(report.entries, summary.entry_count);

    let dest = tempdir()?;
    let image = ImageReader::open(&image_path)?;
    let files = extract_to_dir(&image, dest.path())?;
    assert_eq!(files, 6);
    assert_eq!(snapshot(dest.path()), snapshot(src.path()));
    Ok(())
}

#[cfg(unix)]
#[test]
fn permission_bits_lose_write_access() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::fs::PermissionsExt;
    let src = tempdir()?;
    let tool = src.path().join("tool");
    fs::write(&tool, b"x")?;
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o777))?;

    let out = tempdir()?;
    let image_path = out.path().join("initrd.img");
    build_image(&config(src.path(), &image_path))?;
    let image = ImageReader::open(&image_path)?;
    let entry = image.entries().iter().find(|e| e.name == b"tool").unwrap();
    assert_eq!(entry.mode & 0o7777, 0o555);
    assert_eq!(fs::metadata(&image_path)?.permissions().mode() & 0o777, 0o644);
    Ok(())
}
