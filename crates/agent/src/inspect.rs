// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System inspection capability: resource usage samples for status
//! updates and the one-shot hardware inventory upload.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{json, Value};
use sysinfo::{Disks, System};

use cms_net::StatusUpdate;

/// Capability consumed by the connector; test doubles live with the tests.
pub trait SystemInspector: Send + Sync {
    /// CPU / RAM / disk usage as percentages (0–100).
    fn usage_sample(&self) -> StatusUpdate;
    /// Hardware inventory payload for `/hardware-info`.
    fn hardware_inventory(&self) -> Value;
}

/// `sysinfo`-backed inspector. Disk usage is measured on the filesystem
/// holding the storage root.
pub struct SysinfoInspector {
    system: Mutex<System>,
    storage_root: PathBuf,
}

impl SysinfoInspector {
    pub fn new(storage_root: &Path) -> Self {
        SysinfoInspector {
            system: Mutex::new(System::new_all()),
            storage_root: storage_root.to_path_buf(),
        }
    }

    fn disk_usage_percent(&self) -> f32 {
        let disks = Disks::new_with_refreshed_list();
        // Longest matching mount point wins (the root FS matches "/").
        let best = disks
            .list()
            .iter()
            .filter(|d| self.storage_root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());
        match best {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space() - disk.available_space();
                (used as f64 / disk.total_space() as f64 * 100.0) as f32
            }
            _ => 0.0,
        }
    }
}

impl SystemInspector for SysinfoInspector {
    fn usage_sample(&self) -> StatusUpdate {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_usage = system.global_cpu_usage();
        let ram_usage = if system.total_memory() > 0 {
            (system.used_memory() as f64 / system.total_memory() as f64 * 100.0) as f32
        } else {
            0.0
        };
        StatusUpdate { cpu_usage, ram_usage, disk_usage: self.disk_usage_percent() }
    }

    fn hardware_inventory(&self) -> Value {
        let system = self.system.lock();
        let cpu_model =
            system.cpus().first().map(|c| c.brand().to_string()).unwrap_or_default();
        let disks: Vec<Value> = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|d| {
                json!({
                    "mount": d.mount_point().to_string_lossy(),
                    "total_bytes": d.total_space(),
                    "available_bytes": d.available_space(),
                })
            })
            .collect();

        json!({
            "os_name": System::name(),
            "os_version": System::os_version(),
            "kernel_version": System::kernel_version(),
            "hostname": System::host_name(),
            "cpu_model": cpu_model,
            "cpu_cores": system.cpus().len(),
            "total_memory_bytes": system.total_memory(),
            "disks": disks,
            "agent_version": cms_core::AGENT_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_sample_is_in_percent_range() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = SysinfoInspector::new(dir.path());
        let sample = inspector.usage_sample();
        assert!((0.0..=100.0).contains(&sample.ram_usage), "ram {}", sample.ram_usage);
        assert!((0.0..=100.0).contains(&sample.disk_usage), "disk {}", sample.disk_usage);
        assert!(sample.cpu_usage >= 0.0);
    }

    #[test]
    fn inventory_has_required_keys() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = SysinfoInspector::new(dir.path()).hardware_inventory();
        for key in ["os_name", "hostname", "cpu_model", "cpu_cores", "total_memory_bytes", "disks"]
        {
            assert!(inventory.get(key).is_some(), "missing {key}");
        }
        assert_eq!(inventory["agent_version"], cms_core::AGENT_VERSION);
    }
}
