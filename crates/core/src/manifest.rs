// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update manifest served by `/check-update`.

use serde::{Deserialize, Serialize};

/// Server-provided record describing an available update version.
/// Consumed by exactly one update-engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub version: String,
    pub download_url: String,
    pub checksum_sha256: String,
}

impl UpdateManifest {
    /// All three fields are required before an update may start.
    pub fn is_complete(&self) -> bool {
        !self.version.trim().is_empty()
            && !self.download_url.trim().is_empty()
            && !self.checksum_sha256.trim().is_empty()
    }

    /// Package filename inside the updates directory.
    pub fn package_filename(&self) -> String {
        format!("agent_update_{}.zip", self.version)
    }

    /// Extraction directory name inside the updates directory.
    pub fn extraction_dirname(&self) -> String {
        format!("new_agent_{}", self.version)
    }
}
