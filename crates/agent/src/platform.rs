// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform surface: privilege detection, PID liveness, IPC endpoint
//! naming, adapter discovery.
//!
//! Everything OS-specific the runtime needs funnels through here; the
//! rest of the crate never imports platform primitives directly.

use std::path::PathBuf;

/// Whether the process runs with administrative privileges.
#[cfg(unix)]
pub fn is_running_as_admin() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Elevation probe: the HKLM Run key is writable only by elevated
/// processes, so a successful write-access open means admin.
#[cfg(windows)]
pub fn is_running_as_admin() -> bool {
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ, KEY_WRITE};
    use winreg::RegKey;
    RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey_with_flags(
            r"SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
            KEY_READ | KEY_WRITE,
        )
        .is_ok()
}

#[cfg(not(any(unix, windows)))]
pub fn is_running_as_admin() -> bool {
    false
}

/// Whether `pid` names a live process.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0: existence probe only. EPERM still means the process exists.
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
    // Without a liveness probe, stale detection falls back to the
    // heartbeat timestamp alone.
    true
}

/// IPC endpoint path. Admin agents listen on a system-scoped name; user
/// agents embed the user id so concurrent per-user agents never collide.
/// On unix this is a socket path; on windows, a named-pipe name.
#[cfg(unix)]
pub fn ipc_socket_path(is_admin: bool) -> PathBuf {
    if is_admin {
        return system_runtime_dir().join("CMSAgentIPC_System.sock");
    }
    user_runtime_dir().join(format!("CMSAgentIPC_User_{}.sock", current_user_id()))
}

#[cfg(windows)]
pub fn ipc_socket_path(is_admin: bool) -> PathBuf {
    if is_admin {
        return PathBuf::from(r"\\.\pipe\CMSAgentIPC_System");
    }
    PathBuf::from(format!(r"\\.\pipe\CMSAgentIPC_User_{}", current_user_id()))
}

#[cfg(not(any(unix, windows)))]
pub fn ipc_socket_path(is_admin: bool) -> PathBuf {
    if is_admin {
        return std::env::temp_dir().join("CMSAgentIPC_System.sock");
    }
    std::env::temp_dir().join(format!("CMSAgentIPC_User_{}.sock", current_user_id()))
}

#[cfg(unix)]
fn system_runtime_dir() -> PathBuf {
    PathBuf::from("/run")
}

#[cfg(unix)]
fn user_runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir)
}

#[cfg(unix)]
fn current_user_id() -> String {
    nix::unistd::Uid::current().to_string()
}

#[cfg(not(unix))]
fn current_user_id() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// First usable physical adapter id, for device-identity derivation.
///
/// Loopback, all-zero, and locally-administered adapters are skipped;
/// identity falls back to a random component when none qualifies.
#[cfg(target_os = "linux")]
pub fn physical_adapter_id() -> Option<[u8; 6]> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut names: Vec<String> =
        entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    for name in names {
        if name == "lo" {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(format!("/sys/class/net/{name}/address")) else {
            continue;
        };
        if let Some(mac) = parse_mac(raw.trim()) {
            if mac.iter().any(|b| *b != 0) && mac[0] & 0x02 == 0 {
                return Some(mac);
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn physical_adapter_id() -> Option<[u8; 6]> {
    None
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}
