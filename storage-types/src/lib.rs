// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for LUKS container management
//!
//! These models are shared by every layer that talks about encrypted
//! containers:
//!
//! - **storage-sys**: derives them from `cryptsetup` output and sysfs
//! - **luksctl**: prints them, optionally as JSON
//!
//! `LuksInfo` is the single snapshot type; everything a caller can ask a
//! container about is a field or method on it.

pub mod common;
pub mod device;
pub mod encryption;

pub use common::bytes_to_pretty;
pub use device::{BackendKind, BlockDeviceInfo};
pub use encryption::{
    DecryptedMapping, KeySlotUsage, LUKS_KEY_SLOTS, LuksFormatOptions, LuksInfo, LuksLabel,
    LuksVersion,
};
