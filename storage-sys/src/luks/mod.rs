// SPDX-License-Identifier: GPL-3.0-only

//! LUKS container management on top of `cryptsetup`

mod container;
pub mod dump;
mod key;
pub mod mapper;

pub use container::{LuksContainer, Snapshot};
pub use dump::{HeaderDump, parse_dump, parse_unlocked_slot};
pub use key::KeyMaterial;
pub use mapper::resolve_mapping;
