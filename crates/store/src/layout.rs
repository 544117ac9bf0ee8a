// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage root selection and directory layout.
//!
//! An admin agent serves every user of the host and stores under the
//! all-users data directory; otherwise state lives in the invoking user's
//! local data directory. Subdirectories are created owner-only.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Resolve the storage root for `app_name` and create the directory
    /// tree. Fails when no usable base directory exists or creation is
    /// denied.
    pub fn create(app_name: &str, is_admin: bool) -> std::io::Result<StorageLayout> {
        let root = resolve_root(app_name, is_admin)?;
        let layout = StorageLayout { root };
        layout.ensure_tree(is_admin)?;
        Ok(layout)
    }

    /// Use an explicit root (tests, custom installs). Creates the tree.
    pub fn at_root(root: impl Into<PathBuf>) -> std::io::Result<StorageLayout> {
        let layout = StorageLayout { root: root.into() };
        layout.ensure_tree(false)?;
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn error_reports_dir(&self) -> PathBuf {
        self.root.join("error_reports")
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.root.join("updates")
    }

    pub fn state_file(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn token_file(&self) -> PathBuf {
        self.root.join("agent_token.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("agent.lock")
    }

    fn ensure_tree(&self, is_admin: bool) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for dir in
            [self.config_dir(), self.logs_dir(), self.error_reports_dir(), self.updates_dir()]
        {
            std::fs::create_dir_all(&dir)?;
        }
        restrict_to_owner(&self.root, is_admin);
        Ok(())
    }
}

fn resolve_root(app_name: &str, is_admin: bool) -> std::io::Result<PathBuf> {
    if is_admin {
        return Ok(all_users_data_dir().join(app_name));
    }
    dirs::data_local_dir().map(|base| base.join(app_name)).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no local data directory for the current user",
        )
    })
}

#[cfg(windows)]
fn all_users_data_dir() -> PathBuf {
    PathBuf::from(std::env::var_os("PROGRAMDATA").unwrap_or_else(|| "C:\\ProgramData".into()))
}

#[cfg(not(windows))]
fn all_users_data_dir() -> PathBuf {
    PathBuf::from("/var/lib")
}

/// Owner-only access on the root; when admin the owner is the system
/// principal, which is the unix rendering of the SYSTEM grant.
#[cfg(unix)]
fn restrict_to_owner(root: &Path, _is_admin: bool) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o700)) {
        tracing::warn!(root = %root.display(), error = %e, "failed to restrict storage root");
    }
}

#[cfg(not(unix))]
fn restrict_to_owner(_root: &Path, _is_admin: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_expected_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::at_root(dir.path().join("CMSAgent")).unwrap();

        for sub in ["config", "logs", "error_reports", "updates"] {
            assert!(layout.root().join(sub).is_dir(), "missing {sub}/");
        }
        assert_eq!(layout.lock_file(), layout.root().join("agent.lock"));
        assert_eq!(layout.token_file(), layout.root().join("agent_token.json"));
    }

    #[cfg(unix)]
    #[test]
    fn root_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::at_root(dir.path().join("CMSAgent")).unwrap();
        let mode = std::fs::metadata(layout.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
