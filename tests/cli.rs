use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_build_list_verify_extract_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a source tree with a nested file and a directory that is not descended into
    let source_dir = tempdir()?;
    fs::create_dir(source_dir.path().join("bin"))?;
    fs::create_dir_all(source_dir.path().join("fat/EFI"))?;
    let mut ls = fs::File::create(source_dir.path().join("bin/ls"))?;
    ls.write_all(b"ABCD")?;
    fs::write(source_dir.path().join("mounts"), b"initrd /\n")?;
    fs::write(source_dir.path().join("fat/EFI/skipped.efi"), b"nope")?;

    let image_dir = tempdir()?;
    let image_path = image_dir.path().join("boot/initrd.img");

    // 2. Build
    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.env_remove("INITRD_NO_DESCEND").arg("build").arg(source_dir.path()).arg("--output").arg(&image_path);
    cmd.assert().success().stdout(predicate::str::contains("Done creating"));
    assert!(image_path.exists());

    // 3. List
    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("list").arg(&image_path);
    cmd.assert().success().stdout(
        predicate::str::contains("/bin/ls")
            .and(predicate::str::contains("/mounts"))
            .and(predicate::str::contains("/fat"))
            .and(predicate::str::contains("skipped.efi").not()),
    );

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("l").arg("--json").arg(&image_path);
    cmd.assert().success().stdout(predicate::str::contains("\"path\": \"/bin/ls\""));

    // 4. Verify
    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("verify").arg(&image_path);
    cmd.assert().success().stdout(predicate::str::starts_with("OK"));

    // 5. Extract and compare
    let extract_dir = tempdir()?;
    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("extract").arg(&image_path).arg("-o").arg(extract_dir.path());
    cmd.assert().success();
    assert_eq!(fs::read(extract_dir.path().join("bin/ls"))?, b"ABCD");
    assert_eq!(fs::read(extract_dir.path().join("mounts"))?, b"initrd /\n");
    assert!(extract_dir.path().join("fat").is_dir());
    assert!(!extract_dir.path().join("fat/EFI").exists());

    Ok(())
}

#[test]
fn test_cli_no_descend_override() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::create_dir_all(source_dir.path().join("fat/EFI"))?;
    fs::create_dir_all(source_dir.path().join("cache/tmp"))?;
    let image_path = source_dir.path().join("out.img");

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.env_remove("INITRD_NO_DESCEND")
        .arg("build")
        .arg(source_dir.path())
        .arg("-o")
        .arg(&image_path)
        .arg("--no-descend")
        .arg("cache");
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("list").arg(&image_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("/fat/EFI").and(predicate::str::contains("/cache/tmp").not()));
    Ok(())
}

#[test]
fn test_cli_no_descend_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::create_dir_all(source_dir.path().join("fat/EFI"))?;
    fs::create_dir_all(source_dir.path().join("cache/tmp"))?;
    let image_dir = tempdir()?;
    let image_path = image_dir.path().join("out.img");

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.env("INITRD_NO_DESCEND", "cache").arg("build").arg(source_dir.path()).arg("-o").arg(&image_path);
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("list").arg(&image_path);
    cmd.assert().success().stdout(
        predicate::str::contains("/cache")
            .and(predicate::str::contains("/cache/tmp").not())
            .and(predicate::str::contains("/fat/EFI")),
    );
    Ok(())
}

#[test]
fn test_cli_bad_arguments_exit_with_usage() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("frobnicate");
    cmd.assert().failure().stderr(predicate::str::contains("Usage").and(predicate::str::contains("Error: ").not()));
    Ok(())
}

#[test]
fn test_cli_missing_source_fails_without_output() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let image_path = work.path().join("initrd.img");

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("build").arg(work.path().join("no-such-dir")).arg("-o").arg(&image_path);
    cmd.assert().failure().stderr(predicate::str::contains("Error:"));
    assert!(!image_path.exists());
    Ok(())
}

#[test]
fn test_cli_verify_rejects_garbage() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let junk = work.path().join("junk.img");
    fs::write(&junk, b"\x05\x00\x00\x00not an image")?;

    let mut cmd = Command::cargo_bin("initrd-pack")?;
    cmd.arg("verify").arg(&junk);
    cmd.assert().failure().stderr(predicate::str::contains("malformed image"));
    Ok(())
}
