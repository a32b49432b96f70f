// SPDX-License-Identifier: GPL-3.0-only

//! Host configuration for LUKS container management
//!
//! Every field has a default that matches a stock Linux host, so an empty
//! (or absent) TOML file is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use which::which;

use crate::error::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuksConfig {
    /// Program used for all LUKS operations
    pub cryptsetup: String,

    /// Program used to wipe filesystem signatures
    pub wipefs: String,

    /// Program used to zap partition tables
    pub sgdisk: String,

    /// Program used to overwrite the header region
    pub dd: String,

    /// Root of the sysfs mount
    pub sysfs_root: PathBuf,

    /// Directory holding kernel block device nodes
    pub dev_dir: PathBuf,

    /// Directory holding named device-mapper nodes
    pub mapper_dir: PathBuf,

    /// Appended to the device base name to form the mapping name on open
    pub mapper_suffix: String,

    /// Header size assumed when the dump does not report a payload offset
    pub default_header_bytes: u64,

    /// Source of random bytes used when destroying a header
    pub random_source: PathBuf,
}

impl Default for LuksConfig {
    fn default() -> Self {
        Self {
            cryptsetup: "cryptsetup".to_string(),
            wipefs: "wipefs".to_string(),
            sgdisk: "sgdisk".to_string(),
            dd: "dd".to_string(),
            sysfs_root: PathBuf::from("/sys"),
            dev_dir: PathBuf::from("/dev"),
            mapper_dir: PathBuf::from("/dev/mapper"),
            mapper_suffix: "-crypt".to_string(),
            default_header_bytes: 4096,
            random_source: PathBuf::from("/dev/urandom"),
        }
    }
}

impl LuksConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Reading LUKS configuration from {:?}", path);

        let raw = fs::read_to_string(path).map_err(|e| {
            SysError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
            .map_err(|e| SysError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| SysError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_header_bytes == 0 {
            return Err(SysError::Config(
                "default_header_bytes must be greater than zero".to_string(),
            ));
        }

        for (key, program) in self.programs() {
            if program.trim().is_empty() {
                return Err(SysError::Config(format!("{key} must not be empty")));
            }
        }

        Ok(())
    }

    fn programs(&self) -> [(&'static str, &str); 4] {
        [
            ("cryptsetup", self.cryptsetup.as_str()),
            ("wipefs", self.wipefs.as_str()),
            ("sgdisk", self.sgdisk.as_str()),
            ("dd", self.dd.as_str()),
        ]
    }

    /// Check that every configured program can be found
    pub fn verify_tools(&self) -> Result<Vec<PathBuf>> {
        self.programs()
            .into_iter()
            .map(|(_, program)| {
                which(program).map_err(|_| SysError::ToolNotFound {
                    program: program.to_string(),
                })
            })
            .collect()
    }
}
