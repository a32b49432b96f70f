//! Block device models
//!
//! What the LUKS layer needs to know about the device underneath a container.

use serde::{Deserialize, Serialize};

/// Storage backend a block device belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Whole disk
    Disk,

    /// Partition of a disk
    Partition,

    /// Software RAID array (md)
    MdRaid,

    /// Device-mapper node (LVM, dm-crypt, multipath)
    DeviceMapper,

    /// Loop device
    Loop,
}

impl BackendKind {
    /// Whether wiping this backend's partition table could damage metadata
    /// that belongs to sibling devices.
    pub fn shares_metadata(&self) -> bool {
        matches!(self, Self::MdRaid | Self::DeviceMapper)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Partition => "partition",
            Self::MdRaid => "mdraid",
            Self::DeviceMapper => "device-mapper",
            Self::Loop => "loop",
        }
    }
}

/// Block device as seen by the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceInfo {
    /// Device path the caller used (e.g., "/dev/disk/by-id/...")
    pub device_file: String,

    /// Canonical kernel name (e.g., "sdb1", "dm-0")
    pub kernel_name: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// Disk model name (empty if unknown)
    pub model: String,
}

impl BlockDeviceInfo {
    /// Get a human-readable display name for the device
    pub fn display_name(&self) -> String {
        if !self.model.is_empty() {
            self.model.clone()
        } else {
            self.kernel_name.clone()
        }
    }
}
