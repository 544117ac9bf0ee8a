// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update package helpers: checksum, archive extraction, binary
//! resolution inside an extracted tree.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

/// Streaming SHA-256 of a file, hex-encoded lowercase.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract a package into `dest`. Zip and gzipped tar are recognized by
/// their magic bytes, regardless of the file extension.
pub fn extract_package(package: &Path, dest: &Path) -> std::io::Result<()> {
    let mut magic = [0u8; 2];
    {
        let mut file = std::fs::File::open(package)?;
        file.read_exact(&mut magic)?;
    }
    std::fs::create_dir_all(dest)?;

    match magic {
        [0x50, 0x4b] => {
            debug!(package = %package.display(), "extracting zip package");
            let file = std::fs::File::open(package)?;
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|e| std::io::Error::other(format!("invalid zip archive: {e}")))?;
            archive
                .extract(dest)
                .map_err(|e| std::io::Error::other(format!("zip extraction failed: {e}")))
        }
        [0x1f, 0x8b] => {
            debug!(package = %package.display(), "extracting gzipped tar package");
            let file = std::fs::File::open(package)?;
            let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
            archive.unpack(dest)
        }
        other => Err(std::io::Error::other(format!(
            "unrecognized package format (magic bytes {other:02x?})"
        ))),
    }
}

/// Find `name` inside `dir`: conventional subdirectories first, then a
/// direct child, then a full recursive search.
pub fn resolve_executable(dir: &Path, name: &str, subdirs: &[&str]) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    for subdir in subdirs {
        let candidate = dir.join(subdir).join(name);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "found executable at conventional location");
            return Some(candidate);
        }
    }

    let direct = dir.join(name);
    if direct.is_file() {
        return Some(direct);
    }

    find_recursive(dir, name)
}

fn find_recursive(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && entry.file_name().to_string_lossy() == name {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    subdirs.iter().find_map(|subdir| find_recursive(subdir, name))
}

#[cfg(test)]
#[path = "package_tests.rs"]
mod tests;
