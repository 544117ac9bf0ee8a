// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot autostart registration.
//!
//! On windows this sets the agent as a value under the registry Run key
//! (`HKLM` for admin agents, `HKCU` otherwise); on unix it writes an XDG
//! autostart entry (system-wide for admin agents, per-user otherwise).

use tracing::info;

#[cfg(windows)]
const RUN_KEY_PATH: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Run";

#[cfg(windows)]
fn run_key_hive(is_admin: bool) -> winreg::RegKey {
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};
    if is_admin {
        winreg::RegKey::predef(HKEY_LOCAL_MACHINE)
    } else {
        winreg::RegKey::predef(HKEY_CURRENT_USER)
    }
}

#[cfg(windows)]
pub fn register(app_name: &str, executable: &str, is_admin: bool) -> std::io::Result<()> {
    let (key, _) = run_key_hive(is_admin).create_subkey(RUN_KEY_PATH)?;
    key.set_value(app_name, &executable.to_string())?;
    info!(app_name, executable, admin = is_admin, "autostart registered in Run key");
    Ok(())
}

#[cfg(windows)]
pub fn unregister(app_name: &str, is_admin: bool) -> std::io::Result<()> {
    use winreg::enums::KEY_SET_VALUE;
    let key = match run_key_hive(is_admin).open_subkey_with_flags(RUN_KEY_PATH, KEY_SET_VALUE) {
        Ok(key) => key,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    match key.delete_value(app_name) {
        Ok(()) => {
            info!(app_name, admin = is_admin, "autostart unregistered from Run key");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
pub fn register(app_name: &str, executable: &str, is_admin: bool) -> std::io::Result<()> {
    let path = entry_path(app_name, is_admin)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let entry = format!(
        "[Desktop Entry]\nType=Application\nName={app_name}\nExec={executable}\nX-GNOME-Autostart-enabled=true\n"
    );
    std::fs::write(&path, entry)?;
    info!(path = %path.display(), "autostart registered");
    Ok(())
}

#[cfg(unix)]
pub fn unregister(app_name: &str, is_admin: bool) -> std::io::Result<()> {
    let path = entry_path(app_name, is_admin)?;
    match std::fs::remove_file(&path) {
        Ok(()) => {
            info!(path = %path.display(), "autostart unregistered");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn entry_path(app_name: &str, is_admin: bool) -> std::io::Result<std::path::PathBuf> {
    let base = if is_admin {
        std::path::PathBuf::from("/etc/xdg/autostart")
    } else {
        dirs::config_dir()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no user config directory")
            })?
            .join("autostart")
    };
    Ok(base.join(format!("{app_name}.desktop")))
}

#[cfg(not(any(unix, windows)))]
pub fn register(_app_name: &str, _executable: &str, _is_admin: bool) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "autostart is not supported on this platform",
    ))
}

#[cfg(not(any(unix, windows)))]
pub fn unregister(_app_name: &str, _is_admin: bool) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "autostart is not supported on this platform",
    ))
}
