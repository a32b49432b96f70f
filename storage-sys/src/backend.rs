// SPDX-License-Identifier: GPL-3.0-only

//! Storage backend classification

use std::sync::Arc;

use storage_types::{BackendKind, BlockDeviceInfo};

use crate::error::{Result, SysError};
use crate::sysfs::{SysfsSource, block_class_path};

/// Maps a block device to the backend that owns it
pub trait BackendClassifier: Send + Sync {
    fn classify(&self, device: &BlockDeviceInfo) -> Result<BackendKind>;
}

/// Classifies devices from the attribute directories the kernel exposes
pub struct SysfsBackendClassifier {
    sysfs: Arc<dyn SysfsSource>,
}

impl SysfsBackendClassifier {
    pub fn new(sysfs: Arc<dyn SysfsSource>) -> Self {
        Self { sysfs }
    }
}

impl BackendClassifier for SysfsBackendClassifier {
    fn classify(&self, device: &BlockDeviceInfo) -> Result<BackendKind> {
        let base = block_class_path(&device.kernel_name);
        if !self.sysfs.exists(&base) {
            return Err(SysError::DeviceNotFound(format!(
                "{} has no sysfs entry",
                device.kernel_name
            )));
        }

        let kind = if self.sysfs.exists(&base.join("md")) {
            BackendKind::MdRaid
        } else if self.sysfs.exists(&base.join("dm")) {
            BackendKind::DeviceMapper
        } else if self.sysfs.exists(&base.join("loop")) {
            BackendKind::Loop
        } else if self.sysfs.exists(&base.join("partition")) {
            BackendKind::Partition
        } else {
            BackendKind::Disk
        };

        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::sysfs::Sysfs;

    fn device(name: &str) -> BlockDeviceInfo {
        BlockDeviceInfo {
            device_file: format!("/dev/{name}"),
            kernel_name: name.to_string(),
            size_bytes: 0,
            model: String::new(),
        }
    }

    #[test]
    fn classifies_from_attribute_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let block = dir.path().join("class/block");
        fs::create_dir_all(block.join("md0/md")).unwrap();
        fs::create_dir_all(block.join("dm-2/dm")).unwrap();
        fs::create_dir_all(block.join("loop7/loop")).unwrap();
        fs::create_dir_all(block.join("sdb1")).unwrap();
        fs::write(block.join("sdb1/partition"), "1\n").unwrap();
        fs::create_dir_all(block.join("sdc")).unwrap();

        let classifier = SysfsBackendClassifier::new(Arc::new(Sysfs::new(dir.path())));

        assert_eq!(classifier.classify(&device("md0")).unwrap(), BackendKind::MdRaid);
        assert_eq!(
            classifier.classify(&device("dm-2")).unwrap(),
            BackendKind::DeviceMapper
        );
        assert_eq!(classifier.classify(&device("loop7")).unwrap(), BackendKind::Loop);
        assert_eq!(
            classifier.classify(&device("sdb1")).unwrap(),
            BackendKind::Partition
        );
        assert_eq!(classifier.classify(&device("sdc")).unwrap(), BackendKind::Disk);
        assert!(classifier.classify(&device("sdz")).is_err());
    }
}
