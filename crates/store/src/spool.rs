// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error-report spool: reports that failed to upload wait here as JSON
//! files and are drained best-effort on the next authenticated session.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use cms_core::ErrorReport;

#[derive(Debug, Clone)]
pub struct ErrorSpool {
    dir: PathBuf,
}

impl ErrorSpool {
    pub fn new(dir: PathBuf) -> Self {
        ErrorSpool { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a report for a later drain attempt.
    pub fn save(&self, report: &ErrorReport) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(report.spool_filename());
        let body = serde_json::to_vec_pretty(report)?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), "error report spooled");
        Ok(path)
    }

    /// Spooled report files, oldest first (filenames sort by timestamp).
    pub fn list(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Parse one spooled report; unparseable files yield `None`.
    pub fn read(&self, path: &Path) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn remove(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove spooled report");
        }
    }
}
