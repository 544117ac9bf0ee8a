// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;

#[test]
fn sha256_matches_known_vector() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, b"hello").unwrap();
    assert_eq!(
        sha256_file(&path).unwrap(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();
}

fn make_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn extracts_zip_by_magic() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("pkg.zip");
    make_zip(&package, &[("agent/cms-agent", b"bin"), ("readme.txt", b"hi")]);

    let dest = dir.path().join("out");
    extract_package(&package, &dest).unwrap();
    assert_eq!(std::fs::read(dest.join("agent/cms-agent")).unwrap(), b"bin");
    assert_eq!(std::fs::read(dest.join("readme.txt")).unwrap(), b"hi");
}

#[test]
fn extracts_tar_gz_by_magic_even_with_zip_extension() {
    let dir = tempfile::tempdir().unwrap();
    // Mislabelled: gzipped tar bytes behind a .zip name
    let package = dir.path().join("pkg.zip");
    make_tar_gz(&package, &[("updater/cms-updater", b"upd")]);

    let dest = dir.path().join("out");
    extract_package(&package, &dest).unwrap();
    assert_eq!(std::fs::read(dest.join("updater/cms-updater")).unwrap(), b"upd");
}

#[test]
fn unknown_magic_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("pkg.zip");
    std::fs::write(&package, b"garbage content").unwrap();
    assert!(extract_package(&package, &dir.path().join("out")).is_err());
}

#[test]
fn resolve_prefers_conventional_subdir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("agent")).unwrap();
    std::fs::create_dir_all(dir.path().join("nested/deep")).unwrap();
    std::fs::write(dir.path().join("agent/cms-agent"), b"a").unwrap();
    std::fs::write(dir.path().join("cms-agent"), b"b").unwrap();
    std::fs::write(dir.path().join("nested/deep/cms-agent"), b"c").unwrap();

    let found = resolve_executable(dir.path(), "cms-agent", &["agent"]).unwrap();
    assert_eq!(found, dir.path().join("agent/cms-agent"));
}

#[test]
fn resolve_falls_back_to_direct_child_then_recursive() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cms-updater"), b"u").unwrap();
    let found = resolve_executable(dir.path(), "cms-updater", &["updater"]).unwrap();
    assert_eq!(found, dir.path().join("cms-updater"));

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
    std::fs::write(dir.path().join("x/y/cms-updater"), b"u").unwrap();
    let found = resolve_executable(dir.path(), "cms-updater", &["updater"]).unwrap();
    assert_eq!(found, dir.path().join("x/y/cms-updater"));
}

#[test]
fn resolve_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(resolve_executable(dir.path(), "cms-agent", &["agent"]).is_none());
    assert!(resolve_executable(&dir.path().join("nope"), "cms-agent", &[]).is_none());
}
