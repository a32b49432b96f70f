// SPDX-License-Identifier: GPL-3.0-only

//! Small-file and directory reads below the sysfs root

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read access to sysfs, addressed by paths relative to its root
pub trait SysfsSource: Send + Sync {
    /// Contents of an attribute file, trimmed
    fn read_attribute(&self, relative: &Path) -> io::Result<String>;

    /// Sorted entry names of a directory
    fn list_entries(&self, relative: &Path) -> io::Result<Vec<String>>;

    fn exists(&self, relative: &Path) -> bool;
}

/// sysfs as mounted on the host (or any directory laid out like it)
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl SysfsSource for Sysfs {
    fn read_attribute(&self, relative: &Path) -> io::Result<String> {
        Ok(fs::read_to_string(self.root.join(relative))?
            .trim()
            .to_string())
    }

    fn list_entries(&self, relative: &Path) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.root.join(relative))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn exists(&self, relative: &Path) -> bool {
        self.root.join(relative).exists()
    }
}

/// `class/block/<name>` relative path
pub fn block_class_path(kernel_name: &str) -> PathBuf {
    Path::new("class/block").join(kernel_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_trimmed_attributes_and_sorted_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let block = dir.path().join("class/block/sdb1");
        fs::create_dir_all(block.join("holders/dm-3")).expect("holders");
        fs::create_dir_all(block.join("holders/dm-1")).expect("holders");
        fs::write(block.join("size"), "2048\n").expect("size");

        let sysfs = Sysfs::new(dir.path());
        let base = block_class_path("sdb1");

        assert_eq!(sysfs.read_attribute(&base.join("size")).unwrap(), "2048");
        assert_eq!(
            sysfs.list_entries(&base.join("holders")).unwrap(),
            vec!["dm-1", "dm-3"]
        );
        assert!(sysfs.exists(&base));
        assert!(sysfs.list_entries(&base.join("slaves")).is_err());
    }
}
