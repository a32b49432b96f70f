// SPDX-License-Identifier: GPL-3.0-only

//! `cryptsetup luksDump` parsing
//!
//! The dump is a loosely structured text report. LUKS1 prints flat
//! `Key: value` lines and one `Key Slot <n>: ENABLED|DISABLED` line per slot;
//! LUKS2 groups entries into unindented sections (`Keyslots:`,
//! `Data segments:`, ...) with indented `<n>: <type>` entries.

use storage_types::{KeySlotUsage, LUKS_KEY_SLOTS, LuksLabel, LuksVersion};
use tracing::warn;

use crate::error::{Result, SysError};

const NO_LABEL: &str = "(no label)";
const SECTOR_SIZE: u64 = 512;

/// Fields derived from a header dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderDump {
    /// Identifier from the `Version:` line
    pub version: String,
    pub label: LuksLabel,
    pub key_slots: KeySlotUsage,
    pub occupied_slots: Vec<u8>,
    pub cipher: Option<String>,
    pub payload_offset_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Enabled,
    Disabled,
}

/// Parse the captured lines of `cryptsetup luksDump`
pub fn parse_dump<S: AsRef<str>>(lines: &[S]) -> Result<HeaderDump> {
    let lines: Vec<&str> = lines.iter().map(|line| line.as_ref()).collect();

    let version = top_level_value(&lines, "Version:")
        .ok_or_else(|| SysError::Parse("header dump has no Version: line".to_string()))?
        .to_string();

    let mut dump = HeaderDump {
        version,
        ..HeaderDump::default()
    };

    match LuksVersion::from_dump_id(&dump.version) {
        Some(LuksVersion::Luks1) => {
            dump.occupied_slots = v1_slots(&lines, SlotState::Enabled);
            dump.cipher = v1_cipher(&lines);
            dump.payload_offset_bytes = top_level_value(&lines, "Payload offset:")
                .and_then(|sectors| sectors.parse::<u64>().ok())
                .map(|sectors| sectors * SECTOR_SIZE);
        }
        Some(LuksVersion::Luks2) => {
            dump.label = match top_level_value(&lines, "Label:") {
                Some(NO_LABEL) | Some("") | None => LuksLabel::Unset,
                Some(label) => LuksLabel::Set(label.to_string()),
            };
            dump.occupied_slots = v2_keyslots(&lines);
            dump.cipher = section_value(&lines, "Data segments:", "cipher:").map(str::to_string);
            dump.payload_offset_bytes = section_value(&lines, "Data segments:", "offset:")
                .and_then(|value| value.split_whitespace().next())
                .and_then(|bytes| bytes.parse::<u64>().ok());
        }
        None => {}
    }

    dump.occupied_slots = slot_set(dump.occupied_slots);

    // Applied to every version; LUKS2 dumps do not print this phrasing.
    let free: Vec<u8> = slot_set(v1_slots(&lines, SlotState::Disabled))
        .into_iter()
        .filter(|index| !dump.occupied_slots.contains(index))
        .collect();

    dump.key_slots = KeySlotUsage {
        used: slot_count(dump.occupied_slots.len())?,
        free: slot_count(free.len())?,
    };
    Ok(dump)
}

/// Sorted, de-duplicated slot indices within the eight managed slots
fn slot_set(mut indices: Vec<u8>) -> Vec<u8> {
    indices.retain(|index| {
        let managed = *index < LUKS_KEY_SLOTS;
        if !managed {
            warn!("Ignoring key slot {} beyond the {} managed slots", index, LUKS_KEY_SLOTS);
        }
        managed
    });
    indices.sort_unstable();
    indices.dedup();
    indices
}

fn slot_count(count: usize) -> Result<u8> {
    u8::try_from(count).map_err(|_| SysError::Parse(format!("{count} key slots reported")))
}

/// Slot index reported by `cryptsetup open --test-passphrase --verbose`
pub fn parse_unlocked_slot<S: AsRef<str>>(lines: &[S]) -> Option<u8> {
    lines.iter().find_map(|line| {
        line.as_ref()
            .trim()
            .strip_prefix("Key slot ")
            .and_then(|rest| rest.strip_suffix(" unlocked."))
            .and_then(|index| index.parse().ok())
    })
}

fn top_level_value<'a>(lines: &[&'a str], key: &str) -> Option<&'a str> {
    lines
        .iter()
        .map(|line| line.trim())
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
}

fn v1_slots(lines: &[&str], wanted: SlotState) -> Vec<u8> {
    lines
        .iter()
        .filter_map(|line| parse_v1_slot_line(line.trim()))
        .filter(|(_, state)| *state == wanted)
        .map(|(index, _)| index)
        .collect()
}

fn parse_v1_slot_line(line: &str) -> Option<(u8, SlotState)> {
    let (index, state) = line.strip_prefix("Key Slot ")?.split_once(": ")?;
    let index = index.parse().ok()?;
    let state = match state {
        "ENABLED" => SlotState::Enabled,
        "DISABLED" => SlotState::Disabled,
        _ => return None,
    };
    Some((index, state))
}

fn v1_cipher(lines: &[&str]) -> Option<String> {
    let name = top_level_value(lines, "Cipher name:")?;
    match top_level_value(lines, "Cipher mode:") {
        Some(mode) if !mode.is_empty() => Some(format!("{name}-{mode}")),
        _ => Some(name.to_string()),
    }
}

/// Lines belonging to an unindented `header` section
fn section<'a>(lines: &[&'a str], header: &str) -> Vec<&'a str> {
    let mut inside = false;
    let mut body = Vec::new();

    for line in lines {
        if is_section_header(line) {
            inside = line.trim_end() == header;
            continue;
        }
        if inside {
            body.push(*line);
        }
    }

    body
}

fn is_section_header(line: &str) -> bool {
    !line.starts_with(char::is_whitespace) && line.trim_end().ends_with(':')
}

fn section_value<'a>(lines: &[&'a str], header: &str, key: &str) -> Option<&'a str> {
    section(lines, header)
        .into_iter()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(key))
        .map(str::trim)
}

fn v2_keyslots(lines: &[&str]) -> Vec<u8> {
    section(lines, "Keyslots:")
        .into_iter()
        .filter_map(|line| {
            let (index, kind) = line.trim().split_once(':')?;
            if kind.trim() != "luks2" {
                return None;
            }
            index.parse().ok()
        })
        .collect()
}
