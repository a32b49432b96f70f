// SPDX-License-Identifier: GPL-3.0-only

//! LUKS container bound to one block device
//!
//! Everything a `LuksContainer` knows is derived from `cryptsetup` and sysfs
//! and kept in a snapshot. Queries derive the snapshot on demand; every
//! mutating operation drops it, whatever the outcome, so the next query
//! reads the device again.

use std::path::Path;

use storage_types::{
    BackendKind, DecryptedMapping, LUKS_KEY_SLOTS, LuksFormatOptions, LuksInfo, LuksLabel,
    LuksVersion, bytes_to_pretty,
};
use tracing::{debug, info, warn};

use super::dump::{parse_dump, parse_unlocked_slot};
use super::key::{KeyMaterial, PromptInput};
use super::mapper::resolve_mapping;
use crate::command::{CommandOutput, Invocation};
use crate::context::SysContext;
use crate::error::{Result, SysError};

/// cryptsetup exit status for "no key available with this passphrase"
const EXIT_KEY_REJECTED: i32 = 2;

/// Everything derived in one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub info: LuksInfo,

    /// Raw `luksDump` output the snapshot was parsed from
    pub header_dump: Vec<String>,
}

#[derive(Debug, Clone, Default)]
enum CacheState {
    #[default]
    Stale,
    Valid(Box<Snapshot>),
}

/// A LUKS container on a block device
#[derive(Debug)]
pub struct LuksContainer {
    ctx: SysContext,
    device_file: String,
    state: CacheState,
}

impl LuksContainer {
    /// Bind to `device_file`. Nothing is read until the first query.
    pub fn new(ctx: SysContext, device_file: impl Into<String>) -> Self {
        Self {
            ctx,
            device_file: device_file.into(),
            state: CacheState::Stale,
        }
    }

    pub fn device_file(&self) -> &str {
        &self.device_file
    }

    /// Whether `device_file` carries a LUKS header
    pub fn is_luks_container(ctx: &SysContext, device_file: &str) -> Result<bool> {
        if !ctx.devices.exists(device_file) {
            return Err(SysError::DeviceNotFound(device_file.to_string()));
        }

        let invocation = Invocation::new(ctx.config.cryptsetup.as_str())
            .arg("isLuks")
            .arg(device_file)
            .quiet();
        let output = ctx.runner.run(&invocation)?;
        Ok(output.success())
    }

    // === Cache ===

    /// Whether a derived snapshot is currently held
    pub fn is_cached(&self) -> bool {
        matches!(self.state, CacheState::Valid(_))
    }

    /// Drop the snapshot; the next query derives a new one
    pub fn invalidate(&mut self) {
        self.state = CacheState::Stale;
    }

    /// Derive the snapshot unless one is already held
    pub fn ensure_fresh(&mut self) -> Result<&Snapshot> {
        if let CacheState::Stale = self.state {
            let snapshot = self.derive()?;
            self.state = CacheState::Valid(Box::new(snapshot));
        }

        match &self.state {
            CacheState::Valid(snapshot) => Ok(&**snapshot),
            CacheState::Stale => Err(self.unavailable("snapshot was not stored")),
        }
    }

    /// Drop the snapshot and derive it again
    pub fn refresh(&mut self) -> Result<&LuksInfo> {
        self.invalidate();
        Ok(&self.ensure_fresh()?.info)
    }

    fn derive(&self) -> Result<Snapshot> {
        debug!("Deriving LUKS state for {}", self.device_file);

        let uuid_output = self.run(self.cryptsetup().arg("luksUUID").arg(&self.device_file))?;
        if !uuid_output.success() {
            return Err(self.unavailable(format!(
                "luksUUID exited with status {}",
                uuid_output.status
            )));
        }
        let uuid = uuid_output
            .lines
            .iter()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .ok_or_else(|| self.unavailable("luksUUID printed no UUID"))?
            .to_string();

        let device = self
            .ctx
            .devices
            .lookup(&self.device_file)
            .map_err(|e| self.unavailable(e.to_string()))?;

        let mapping = resolve_mapping(
            self.ctx.sysfs.as_ref(),
            &device.kernel_name,
            &self.ctx.config.dev_dir,
            &self.ctx.config.mapper_dir,
        );

        let dump_output = self.run(self.cryptsetup().arg("luksDump").arg(&self.device_file))?;
        if !dump_output.success() {
            return Err(self.unavailable(format!(
                "luksDump exited with status {}",
                dump_output.status
            )));
        }
        let header = parse_dump(&dump_output.lines)?;

        Ok(Snapshot {
            info: LuksInfo {
                device: self.device_file.clone(),
                uuid,
                version: header.version,
                label: header.label,
                cipher: header.cipher,
                key_slots: header.key_slots,
                occupied_slots: header.occupied_slots,
                payload_offset_bytes: header.payload_offset_bytes,
                size_bytes: device.size_bytes,
                mapping,
            },
            header_dump: dump_output.lines,
        })
    }

    // === Queries ===

    pub fn info(&mut self) -> Result<&LuksInfo> {
        Ok(&self.ensure_fresh()?.info)
    }

    pub fn uuid(&mut self) -> Result<String> {
        Ok(self.info()?.uuid.clone())
    }

    /// Version identifier as printed by the header dump (`"1"`, `"2"`)
    pub fn luks_version(&mut self) -> Result<String> {
        Ok(self.info()?.version.clone())
    }

    pub fn label(&mut self) -> Result<LuksLabel> {
        Ok(self.info()?.label.clone())
    }

    pub fn used_key_slots(&mut self) -> Result<u8> {
        Ok(self.info()?.key_slots.used)
    }

    pub fn free_key_slots(&mut self) -> Result<u8> {
        Ok(self.info()?.key_slots.free)
    }

    pub fn is_open(&mut self) -> Result<bool> {
        Ok(self.info()?.is_open())
    }

    /// Cleartext device path while open
    pub fn decrypted_device_file(&mut self) -> Result<Option<String>> {
        Ok(self
            .info()?
            .mapping
            .as_ref()
            .map(|mapping| mapping.device_file.clone()))
    }

    /// Device-mapper name while open
    pub fn decrypted_name(&mut self) -> Result<Option<String>> {
        Ok(self
            .info()?
            .mapping
            .as_ref()
            .map(|mapping| mapping.name.clone()))
    }

    /// Full header dump text
    pub fn detail(&mut self) -> Result<String> {
        Ok(self.ensure_fresh()?.header_dump.join("\n"))
    }

    /// One-line summary with model, device path and size
    pub fn description(&self) -> Result<String> {
        let device = self.ctx.devices.lookup(&self.device_file)?;
        Ok(format!(
            "LUKS encrypted device {} [{}, {}]",
            device.display_name(),
            self.device_file,
            bytes_to_pretty(&device.size_bytes, false)
        ))
    }

    // === Lifecycle ===

    /// Format the device as a new LUKS container
    pub fn create(&mut self, key: &KeyMaterial, options: &LuksFormatOptions) -> Result<()> {
        self.mutate("create", |this| {
            if !this.ctx.devices.exists(&this.device_file) {
                return Err(SysError::DeviceNotFound(this.device_file.clone()));
            }
            if options.label.is_some() && options.version == LuksVersion::Luks1 {
                return Err(SysError::precondition(
                    &this.device_file,
                    "labels require a LUKS2 header",
                ));
            }
            if key.is_empty() {
                return Err(SysError::precondition(&this.device_file, "empty key"));
            }

            let mut invocation = this
                .cryptsetup()
                .args(["luksFormat", "--batch-mode", "--type"])
                .arg(options.version.as_str())
                .arg("--cipher")
                .arg(&options.cipher);
            if let Some(label) = &options.label {
                invocation = invocation.arg("--label").arg(label);
            }
            let invocation = with_key_file(invocation, key).arg(&this.device_file);

            this.execute_with_key(invocation)?;
            Ok(())
        })
    }

    /// Unlock the container; returns the device-mapper name used
    pub fn open(&mut self, key: &KeyMaterial) -> Result<String> {
        self.mutate("open", |this| {
            let info = &this.require_luks()?.info;
            if !info.can_unlock() {
                let name = info
                    .mapping
                    .as_ref()
                    .map(|mapping| mapping.name.clone())
                    .unwrap_or_default();
                return Err(SysError::precondition(
                    &this.device_file,
                    format!("already open as {name}"),
                ));
            }

            let name = this.mapping_name();
            let invocation = with_key_file(this.cryptsetup().args(["open", "--type", "luks"]), key)
                .arg(&this.device_file)
                .arg(&name);

            this.execute_with_key(invocation)?;
            Ok(name)
        })
    }

    /// Lock the container
    pub fn close(&mut self) -> Result<()> {
        self.mutate("close", |this| {
            let mapping = this.require_open()?;
            this.close_mapping(&mapping)
        })
    }

    /// Enroll `new_key` into a free slot, authenticating with `existing`
    pub fn add_key(&mut self, existing: &KeyMaterial, new_key: &KeyMaterial) -> Result<()> {
        self.mutate("add key", |this| {
            let used = this.require_luks()?.info.key_slots.used;
            if used >= LUKS_KEY_SLOTS {
                return Err(SysError::precondition(
                    &this.device_file,
                    "no free key slot",
                ));
            }
            let invocation = this.key_change_invocation("luksAddKey", existing, new_key)?;
            this.execute_with_key(invocation)?;
            Ok(())
        })
    }

    /// Replace the slot unlocked by `existing` with `new_key`
    pub fn change_key(&mut self, existing: &KeyMaterial, new_key: &KeyMaterial) -> Result<()> {
        self.mutate("change key", |this| {
            this.require_luks()?;
            let invocation = this.key_change_invocation("luksChangeKey", existing, new_key)?;
            this.execute_with_key(invocation)?;
            Ok(())
        })
    }

    /// Remove the slot unlocked by `key`; refuses to remove the last key
    pub fn remove_key(&mut self, key: &KeyMaterial) -> Result<()> {
        self.mutate("remove key", |this| {
            let used = this.require_luks()?.info.key_slots.used;
            if used <= 1 {
                return Err(SysError::precondition(
                    &this.device_file,
                    "refusing to remove the last remaining key",
                ));
            }

            let mut input = PromptInput::default();
            input.push(key, &this.device_file)?;
            let mut invocation = this
                .cryptsetup()
                .args(["luksRemoveKey", "--batch-mode"])
                .arg(&this.device_file);
            if let Some(path) = key.as_file() {
                invocation = invocation.arg(path);
            }
            if let Some(secret) = input.into_secret() {
                invocation = invocation.stdin_secret(secret);
            }

            this.execute_with_key(invocation)?;
            Ok(())
        })
    }

    /// Erase key slot `slot` without asking for any key.
    ///
    /// Killing the last occupied slot makes the container permanently
    /// unopenable.
    pub fn kill_slot(&mut self, slot: u8) -> Result<()> {
        self.mutate("kill slot", |this| {
            if slot >= LUKS_KEY_SLOTS {
                return Err(SysError::precondition(
                    &this.device_file,
                    format!("key slot {slot} is out of range 0-{}", LUKS_KEY_SLOTS - 1),
                ));
            }
            if !this.require_luks()?.info.occupied_slots.contains(&slot) {
                return Err(SysError::precondition(
                    &this.device_file,
                    format!("key slot {slot} is already empty"),
                ));
            }

            let invocation = this
                .cryptsetup()
                .args(["luksKillSlot", "--batch-mode"])
                .arg(&this.device_file)
                .arg(slot.to_string());
            this.execute(invocation)?;
            Ok(())
        })
    }

    /// Slot unlocked by `key`, without creating a mapping
    pub fn test_key(&mut self, key: &KeyMaterial) -> Result<u8> {
        self.mutate("test key", |this| {
            this.require_luks()?;
            let invocation = with_key_file(
                this.cryptsetup()
                    .args(["open", "--test-passphrase", "--verbose"]),
                key,
            )
            .arg(&this.device_file)
            .merge_stderr();

            let output = this.execute_with_key(invocation)?;
            parse_unlocked_slot(&output.lines).ok_or_else(|| {
                SysError::Parse(format!(
                    "no unlocked key slot reported for {}",
                    this.device_file
                ))
            })
        })
    }

    /// Write the header to `backup_file`
    pub fn backup_header(&mut self, backup_file: &Path) -> Result<()> {
        self.mutate("backup header", |this| {
            this.require_luks()?;
            if backup_file.exists() {
                return Err(SysError::precondition(
                    &this.device_file,
                    format!("{} already exists", backup_file.display()),
                ));
            }

            let invocation = this
                .cryptsetup()
                .arg("luksHeaderBackup")
                .arg(&this.device_file)
                .arg("--header-backup-file")
                .arg(backup_file);
            this.execute(invocation)?;
            Ok(())
        })
    }

    /// Overwrite the header from `backup_file`
    pub fn restore_header(&mut self, backup_file: &Path) -> Result<()> {
        self.mutate("restore header", |this| {
            if !backup_file.is_file() {
                return Err(SysError::precondition(
                    &this.device_file,
                    format!("header backup {} not found", backup_file.display()),
                ));
            }

            let invocation = this
                .cryptsetup()
                .args(["luksHeaderRestore", "--batch-mode"])
                .arg(&this.device_file)
                .arg("--header-backup-file")
                .arg(backup_file);
            this.execute(invocation)?;
            Ok(())
        })
    }

    /// Close the container if needed, wipe signatures and destroy the header
    pub fn remove(&mut self) -> Result<()> {
        self.mutate("remove", |this| {
            let device = this
                .ctx
                .devices
                .lookup(&this.device_file)
                .map_err(|e| this.lookup_failure(e))?;
            let backend = this
                .ctx
                .backends
                .classify(&device)
                .map_err(|e| this.lookup_failure(e))?;

            let fresh = this.ensure_fresh().map(|snapshot| snapshot.info.clone());
            let info = match fresh {
                Ok(info) => Some(info),
                Err(SysError::Unavailable { reason, .. }) => {
                    warn!(
                        "No LUKS metadata on {} ({}); destroying header region anyway",
                        this.device_file, reason
                    );
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(mapping) = info.as_ref().and_then(|info| info.mapping.clone()) {
                this.close_mapping(&mapping)?;
            }

            this.wipe_signatures(backend)?;

            let header_bytes = info
                .and_then(|info| info.payload_offset_bytes)
                .filter(|bytes| *bytes > 0)
                .unwrap_or(this.ctx.config.default_header_bytes);
            let invocation = Invocation::new(this.ctx.config.dd.as_str())
                .arg(format!("if={}", this.ctx.config.random_source.display()))
                .arg(format!("of={}", this.device_file))
                .arg(format!("bs={header_bytes}"))
                .args(["count=1", "conv=fsync"]);
            this.execute(invocation)?;
            Ok(())
        })
    }

    // === Helpers ===

    fn mutate<T>(&mut self, operation: &str, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        info!("LUKS {} on {}", operation, self.device_file);
        let result = op(self);
        self.invalidate();

        if let Err(e) = &result {
            warn!("LUKS {} on {} failed: {}", operation, self.device_file, e);
        }
        result
    }

    fn require_luks(&mut self) -> Result<&Snapshot> {
        let device_file = self.device_file.clone();
        self.ensure_fresh().map_err(|e| match e {
            SysError::Unavailable { reason, .. } => {
                SysError::precondition(&device_file, format!("not a LUKS container ({reason})"))
            }
            other => other,
        })
    }

    fn require_open(&mut self) -> Result<DecryptedMapping> {
        let device_file = self.device_file.clone();
        let info = &self.require_luks()?.info;
        match &info.mapping {
            Some(mapping) if info.can_lock() => Ok(mapping.clone()),
            _ => Err(SysError::precondition(&device_file, "container is not open")),
        }
    }

    fn close_mapping(&self, mapping: &DecryptedMapping) -> Result<()> {
        let invocation = self.cryptsetup().arg("close").arg(&mapping.name);
        self.execute(invocation)?;
        Ok(())
    }

    fn wipe_signatures(&self, backend: BackendKind) -> Result<()> {
        let config = &self.ctx.config;
        let invocation = if backend.shares_metadata() {
            Invocation::new(config.wipefs.as_str()).arg("--all")
        } else {
            Invocation::new(config.sgdisk.as_str()).arg("--zap-all")
        }
        .arg(&self.device_file);

        debug!(
            "Wiping {} ({}) with {}",
            self.device_file,
            backend.as_str(),
            invocation.program()
        );
        self.execute(invocation)?;
        Ok(())
    }

    fn key_change_invocation(
        &self,
        action: &str,
        existing: &KeyMaterial,
        new_key: &KeyMaterial,
    ) -> Result<Invocation> {
        let mut input = PromptInput::default();
        input.push(existing, &self.device_file)?;
        input.push(new_key, &self.device_file)?;

        let mut invocation = self.cryptsetup().arg(action).arg("--batch-mode");
        if let Some(path) = existing.as_file() {
            invocation = invocation.arg("--key-file").arg(path);
        }
        invocation = invocation.arg(&self.device_file);
        if let Some(path) = new_key.as_file() {
            invocation = invocation.arg(path);
        }
        if let Some(secret) = input.into_secret() {
            invocation = invocation.stdin_secret(secret);
        }
        Ok(invocation)
    }

    /// `<device base name><suffix>`, restricted to characters valid in a
    /// device-mapper name
    fn mapping_name(&self) -> String {
        let base = Path::new(&self.device_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.device_file.clone());
        let base: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", base, self.ctx.config.mapper_suffix)
    }

    fn cryptsetup(&self) -> Invocation {
        Invocation::new(self.ctx.config.cryptsetup.as_str())
    }

    fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.ctx.runner.run(&invocation)
    }

    fn execute(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.run(invocation.clone())?.check(&invocation)
    }

    /// Like `execute`, reporting rejected key material as `KeyRejected`
    fn execute_with_key(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.execute(invocation).map_err(|e| match e {
            SysError::ToolFailed { status, output, .. } if key_rejected(status, &output) => {
                SysError::KeyRejected {
                    device: self.device_file.clone(),
                    output,
                }
            }
            other => other,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> SysError {
        SysError::Unavailable {
            device: self.device_file.clone(),
            reason: reason.into(),
        }
    }

    fn lookup_failure(&self, err: SysError) -> SysError {
        SysError::DeviceLookup {
            device: self.device_file.clone(),
            reason: err.to_string(),
        }
    }
}

fn with_key_file(invocation: Invocation, key: &KeyMaterial) -> Invocation {
    match key {
        KeyMaterial::KeyFile(path) => invocation.arg("--key-file").arg(path),
        KeyMaterial::Passphrase(secret) => invocation
            .arg("--key-file")
            .arg("-")
            .stdin_secret(secret.clone()),
    }
}

fn key_rejected(status: i32, output: &[String]) -> bool {
    status == EXIT_KEY_REJECTED
        || output.iter().any(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("no key available") || lower.contains("passphrase is incorrect")
        })
}
