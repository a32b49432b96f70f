//! Encryption types (LUKS)
//!
//! Types describing a LUKS container as derived from `cryptsetup` output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of key slots in a LUKS header.
pub const LUKS_KEY_SLOTS: u8 = 8;

/// LUKS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LuksVersion {
    /// LUKS version 1
    Luks1,

    /// LUKS version 2
    Luks2,
}

impl LuksVersion {
    /// Convert to the `--type` value understood by cryptsetup
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Luks1 => "luks1",
            Self::Luks2 => "luks2",
        }
    }

    /// Identifier as printed on the `Version:` line of a header dump
    pub fn dump_id(&self) -> &'static str {
        match self {
            Self::Luks1 => "1",
            Self::Luks2 => "2",
        }
    }

    /// Version whose dump identifier is exactly `id`
    pub fn from_dump_id(id: &str) -> Option<Self> {
        [Self::Luks1, Self::Luks2]
            .into_iter()
            .find(|version| version.dump_id() == id)
    }
}

/// Label of a LUKS header.
///
/// LUKS1 headers carry no label at all, which is not the same thing as a
/// LUKS2 header whose label was never set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LuksLabel {
    #[default]
    NotApplicable,
    Unset,
    Set(String),
}

impl fmt::Display for LuksLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplicable => f.write_str("n/a"),
            Self::Unset => Ok(()),
            Self::Set(label) => f.write_str(label),
        }
    }
}

/// Key slot counters as reported by the header dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySlotUsage {
    pub used: u8,
    pub free: u8,
}

impl KeySlotUsage {
    pub fn total(&self) -> u8 {
        self.used.saturating_add(self.free)
    }
}

/// Active decrypted mapping of an open container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMapping {
    /// Device-mapper name (e.g., "sdb1-crypt")
    pub name: String,

    /// Cleartext device path (e.g., "/dev/mapper/sdb1-crypt")
    pub device_file: String,
}

/// LUKS encrypted volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuksInfo {
    /// Device path of encrypted container (e.g., "/dev/sda1")
    pub device: String,

    /// Container UUID
    pub uuid: String,

    /// Version identifier exactly as reported by the header dump
    pub version: String,

    /// Header label
    pub label: LuksLabel,

    /// Cipher specification (e.g., "aes-xts-plain64"), if reported
    pub cipher: Option<String>,

    /// Key slot counters
    pub key_slots: KeySlotUsage,

    /// Indices of the key slots holding a key
    pub occupied_slots: Vec<u8>,

    /// Size of the header region in bytes, if reported
    pub payload_offset_bytes: Option<u64>,

    /// Size of the underlying device in bytes
    pub size_bytes: u64,

    /// Decrypted mapping, present only while the container is open
    pub mapping: Option<DecryptedMapping>,
}

impl LuksInfo {
    /// Parsed version, if it is one this crate knows
    pub fn luks_version(&self) -> Option<LuksVersion> {
        LuksVersion::from_dump_id(&self.version)
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Check if this LUKS container can be unlocked
    pub fn can_unlock(&self) -> bool {
        !self.is_open()
    }

    /// Check if this LUKS container can be locked
    pub fn can_lock(&self) -> bool {
        self.is_open()
    }
}

/// Options for formatting a new container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuksFormatOptions {
    /// Cipher specification passed to `--cipher`
    pub cipher: String,

    /// Optional label (LUKS2 only)
    pub label: Option<String>,

    pub version: LuksVersion,
}

impl Default for LuksFormatOptions {
    fn default() -> Self {
        Self {
            cipher: "aes-xts-plain64".to_string(),
            label: None,
            version: LuksVersion::Luks2,
        }
    }
}
