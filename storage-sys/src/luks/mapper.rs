// SPDX-License-Identifier: GPL-3.0-only

//! Decrypted-mapping discovery through sysfs holder links

use std::path::Path;

use storage_types::DecryptedMapping;
use tracing::debug;

use crate::sysfs::{SysfsSource, block_class_path};

/// Find the decrypted mapping sitting on top of `kernel_name`.
///
/// Only a single holder is treated as a mapping; no holders, several holders
/// or a missing `holders` directory all mean "not mapped".
pub fn resolve_mapping(
    sysfs: &dyn SysfsSource,
    kernel_name: &str,
    dev_dir: &Path,
    mapper_dir: &Path,
) -> Option<DecryptedMapping> {
    let holders = sysfs
        .list_entries(&block_class_path(kernel_name).join("holders"))
        .ok()?;

    let [holder] = holders.as_slice() else {
        if holders.len() > 1 {
            debug!(
                "{} has {} holders, not treating it as mapped",
                kernel_name,
                holders.len()
            );
        }
        return None;
    };

    if is_dm_node(holder) {
        let name_attr = block_class_path(holder).join("dm/name");
        if let Ok(name) = sysfs.read_attribute(&name_attr) {
            if !name.is_empty() {
                return Some(DecryptedMapping {
                    device_file: mapper_dir.join(&name).to_string_lossy().into_owned(),
                    name,
                });
            }
        }
    }

    Some(DecryptedMapping {
        name: holder.clone(),
        device_file: dev_dir.join(holder).to_string_lossy().into_owned(),
    })
}

/// Kernel device-mapper node name (`dm-<n>`)
fn is_dm_node(name: &str) -> bool {
    name.strip_prefix("dm-")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::sysfs::Sysfs;

    fn holder(root: &Path, device: &str, holder: &str) {
        fs::create_dir_all(root.join("class/block").join(device).join("holders").join(holder))
            .unwrap();
    }

    #[test]
    fn single_dm_holder_resolves_to_mapper_path() {
        let dir = tempfile::tempdir().unwrap();
        holder(dir.path(), "sdb1", "dm-0");
        fs::create_dir_all(dir.path().join("class/block/dm-0/dm")).unwrap();
        fs::write(dir.path().join("class/block/dm-0/dm/name"), "sdb1-crypt\n").unwrap();

        let mapping = resolve_mapping(
            &Sysfs::new(dir.path()),
            "sdb1",
            Path::new("/dev"),
            Path::new("/dev/mapper"),
        )
        .expect("mapped");

        assert_eq!(mapping.name, "sdb1-crypt");
        assert_eq!(mapping.device_file, "/dev/mapper/sdb1-crypt");
    }

    #[test]
    fn non_dm_holder_falls_back_to_raw_path() {
        let dir = tempfile::tempdir().unwrap();
        holder(dir.path(), "sdb1", "md127");

        let mapping = resolve_mapping(
            &Sysfs::new(dir.path()),
            "sdb1",
            Path::new("/dev"),
            Path::new("/dev/mapper"),
        )
        .expect("mapped");

        assert_eq!(mapping.name, "md127");
        assert_eq!(mapping.device_file, "/dev/md127");
    }

    #[test]
    fn dm_holder_without_name_attribute_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        holder(dir.path(), "sdb1", "dm-4");

        let mapping = resolve_mapping(
            &Sysfs::new(dir.path()),
            "sdb1",
            Path::new("/dev"),
            Path::new("/dev/mapper"),
        )
        .expect("mapped");
        assert_eq!(mapping.device_file, "/dev/dm-4");
    }

    #[test]
    fn zero_or_many_holders_or_no_directory_is_unmapped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("class/block/sdc/holders")).unwrap();
        holder(dir.path(), "sdd", "dm-1");
        holder(dir.path(), "sdd", "dm-2");
        let sysfs = Sysfs::new(dir.path());
        let dev = Path::new("/dev");
        let mapper = Path::new("/dev/mapper");

        assert!(resolve_mapping(&sysfs, "sdc", dev, mapper).is_none());
        assert!(resolve_mapping(&sysfs, "sdd", dev, mapper).is_none());
        assert!(resolve_mapping(&sysfs, "sde", dev, mapper).is_none());
    }

    #[test]
    fn recognises_dm_node_names() {
        assert!(is_dm_node("dm-12"));
        assert!(!is_dm_node("dm-"));
        assert!(!is_dm_node("dm-x"));
        assert!(!is_dm_node("sdb1"));
    }
}
