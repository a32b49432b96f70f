// SPDX-License-Identifier: GPL-3.0-only

//! Block device lookup
//!
//! Resolves a device path to its kernel name, size and model via sysfs.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use storage_types::BlockDeviceInfo;
use tracing::debug;

use crate::error::{Result, SysError};
use crate::sysfs::{SysfsSource, block_class_path};

const SECTOR_SIZE: u64 = 512;

/// Generic storage-device lookup
pub trait DeviceLookup: Send + Sync {
    fn exists(&self, device_file: &str) -> bool;

    fn lookup(&self, device_file: &str) -> Result<BlockDeviceInfo>;
}

/// `DeviceLookup` backed by the device node and sysfs
pub struct SysfsDeviceLookup {
    sysfs: Arc<dyn SysfsSource>,
}

impl SysfsDeviceLookup {
    pub fn new(sysfs: Arc<dyn SysfsSource>) -> Self {
        Self { sysfs }
    }

    fn model(&self, kernel_name: &str) -> String {
        let own = block_class_path(kernel_name).join("device/model");
        if let Ok(model) = self.sysfs.read_attribute(&own) {
            return model;
        }

        // Partitions have no device/ link of their own.
        if self
            .sysfs
            .exists(&block_class_path(kernel_name).join("partition"))
        {
            if let Some(parent) = parent_disk_name(kernel_name) {
                let parent_model = block_class_path(&parent).join("device/model");
                if let Ok(model) = self.sysfs.read_attribute(&parent_model) {
                    return model;
                }
            }
        }

        String::new()
    }
}

impl DeviceLookup for SysfsDeviceLookup {
    fn exists(&self, device_file: &str) -> bool {
        Path::new(device_file).exists()
    }

    fn lookup(&self, device_file: &str) -> Result<BlockDeviceInfo> {
        let canonical = fs::canonicalize(device_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SysError::DeviceNotFound(device_file.to_string())
            } else {
                SysError::Io(e)
            }
        })?;

        let kernel_name = canonical
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| SysError::DeviceNotFound(device_file.to_string()))?;

        let size_attr = block_class_path(&kernel_name).join("size");
        let sectors = self
            .sysfs
            .read_attribute(&size_attr)
            .map_err(|_| SysError::DeviceNotFound(format!("{device_file} ({kernel_name})")))?;
        let sectors: u64 = sectors.parse().map_err(|_| {
            SysError::OperationFailed(format!(
                "Unexpected size attribute for {kernel_name}: {sectors}"
            ))
        })?;

        let info = BlockDeviceInfo {
            device_file: device_file.to_string(),
            model: self.model(&kernel_name),
            size_bytes: sectors * SECTOR_SIZE,
            kernel_name,
        };
        debug!("Resolved {} to {:?}", device_file, info);
        Ok(info)
    }
}

/// Whole-disk name of a partition kernel name (`sdb1` -> `sdb`,
/// `nvme0n1p2` -> `nvme0n1`, `mmcblk0p1` -> `mmcblk0`).
pub fn parent_disk_name(kernel_name: &str) -> Option<String> {
    let stem = kernel_name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.is_empty() || stem.len() == kernel_name.len() {
        return None;
    }

    let ends_with_digit_p = stem.ends_with('p')
        && stem[..stem.len() - 1]
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit());
    if ends_with_digit_p {
        return Some(stem[..stem.len() - 1].to_string());
    }

    Some(stem.to_string())
}
