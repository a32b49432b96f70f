// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for LUKS containers
//!
//! This crate derives the state of a LUKS container from host tools and
//! sysfs, and drives its lifecycle:
//! - Parsing `cryptsetup luksDump` output
//! - Resolving decrypted mappings through sysfs holder links
//! - Formatting, opening, closing and removing containers
//! - Key-slot management and header backup/restore
//!
//! These operations require elevated privileges. Every host interaction goes
//! through the collaborators in [`SysContext`], so tests can substitute them.

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod luks;
pub mod sysfs;

pub use backend::{BackendClassifier, SysfsBackendClassifier};
pub use command::{CommandOutput, CommandRunner, Invocation, SystemCommandRunner};
pub use config::LuksConfig;
pub use context::SysContext;
pub use device::{DeviceLookup, SysfsDeviceLookup};
pub use error::{Result, SysError};
pub use luks::{KeyMaterial, LuksContainer, Snapshot};
pub use sysfs::{Sysfs, SysfsSource};
