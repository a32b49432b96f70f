// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use storage_sys::{KeyMaterial, LuksConfig, LuksContainer, SysContext};
use storage_types::{LuksFormatOptions, LuksVersion};
use tracing_subscriber::{EnvFilter, fmt};
use zeroize::Zeroizing;

#[derive(Debug, Parser)]
#[command(name = "luksctl")]
#[command(about = "Inspect and manage a LUKS container")]
struct Args {
    /// Block device holding the container
    #[arg(long, short)]
    device: String,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print machine-readable output where supported
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summary of the container state
    Info,
    /// Raw header dump
    Dump,
    /// Exit 0 when the device holds a LUKS header
    IsLuks,
    /// Format the device as a new container
    Create {
        #[arg(long, default_value = "aes-xts-plain64")]
        cipher: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        luks1: bool,
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Unlock the container
    Open {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Lock the container
    Close,
    /// Enroll an additional key
    AddKey {
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long)]
        new_key_file: Option<PathBuf>,
    },
    /// Replace an existing key
    ChangeKey {
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long)]
        new_key_file: Option<PathBuf>,
    },
    /// Remove the slot unlocked by a key
    RemoveKey {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Erase a key slot without verifying any key
    KillSlot { slot: u8 },
    /// Report which slot a key unlocks
    TestKey {
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Save the header to a file
    BackupHeader { file: PathBuf },
    /// Restore the header from a file
    RestoreHeader { file: PathBuf },
    /// Close, wipe signatures and destroy the header
    Remove,
}

/// Passphrases not given as files, read one per line from stdin in order
struct StdinKeys {
    lines: io::Lines<io::StdinLock<'static>>,
}

impl StdinKeys {
    fn new() -> Self {
        Self {
            lines: io::stdin().lock().lines(),
        }
    }

    fn key(&mut self, file: Option<PathBuf>) -> Result<KeyMaterial> {
        if let Some(path) = file {
            return Ok(KeyMaterial::key_file(path));
        }

        let line = Zeroizing::new(
            self.lines
                .next()
                .context("Expected a passphrase on standard input")?
                .context("Failed to read passphrase from standard input")?,
        );
        if line.is_empty() {
            bail!("Empty passphrase on standard input");
        }
        Ok(KeyMaterial::passphrase(line.as_bytes()))
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_sys=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => LuksConfig::load(path)?,
        None => LuksConfig::default(),
    };
    let ctx = SysContext::system(config);
    let mut container = LuksContainer::new(ctx.clone(), args.device.clone());
    let mut keys = StdinKeys::new();

    match args.command {
        Command::Info => print_info(&mut container, args.json)?,
        Command::Dump => println!("{}", container.detail()?),
        Command::IsLuks => {
            let is_luks = LuksContainer::is_luks_container(&ctx, &args.device)?;
            if args.json {
                println!("{}", serde_json::json!({ "device": args.device, "luks": is_luks }));
            }
            if !is_luks {
                std::process::exit(1);
            }
        }
        Command::Create {
            cipher,
            label,
            luks1,
            key_file,
        } => {
            let key = keys.key(key_file)?;
            let options = LuksFormatOptions {
                cipher,
                label,
                version: if luks1 {
                    LuksVersion::Luks1
                } else {
                    LuksVersion::Luks2
                },
            };
            container.create(&key, &options)?;
            println!("Created LUKS container on {}", args.device);
        }
        Command::Open { key_file } => {
            let key = keys.key(key_file)?;
            let name = container.open(&key)?;
            let path = container
                .decrypted_device_file()?
                .unwrap_or_else(|| format!("/dev/mapper/{name}"));
            println!("{path}");
        }
        Command::Close => container.close()?,
        Command::AddKey {
            key_file,
            new_key_file,
        } => {
            let existing = keys.key(key_file)?;
            let new_key = keys.key(new_key_file)?;
            container.add_key(&existing, &new_key)?;
        }
        Command::ChangeKey {
            key_file,
            new_key_file,
        } => {
            let existing = keys.key(key_file)?;
            let new_key = keys.key(new_key_file)?;
            container.change_key(&existing, &new_key)?;
        }
        Command::RemoveKey { key_file } => {
            let key = keys.key(key_file)?;
            container.remove_key(&key)?;
        }
        Command::KillSlot { slot } => container.kill_slot(slot)?,
        Command::TestKey { key_file } => {
            let key = keys.key(key_file)?;
            let slot = container.test_key(&key)?;
            if args.json {
                println!("{}", serde_json::json!({ "slot": slot }));
            } else {
                println!("Key slot {slot} unlocked");
            }
        }
        Command::BackupHeader { file } => container.backup_header(&file)?,
        Command::RestoreHeader { file } => container.restore_header(&file)?,
        Command::Remove => container.remove()?,
    }

    Ok(())
}

fn print_info(container: &mut LuksContainer, json: bool) -> Result<()> {
    if json {
        let info = container.info()?;
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }

    let description = container.description()?;
    let info = container.info()?;
    println!("{description}");
    println!("  UUID:       {}", info.uuid);
    println!("  Version:    {}", info.version);
    println!("  Label:      {}", info.label);
    if let Some(cipher) = &info.cipher {
        println!("  Cipher:     {cipher}");
    }
    println!(
        "  Key slots:  {} used, {} free",
        info.key_slots.used, info.key_slots.free
    );
    match &info.mapping {
        Some(mapping) => println!("  Open:       {} ({})", mapping.device_file, mapping.name),
        None => println!("  Open:       no"),
    }
    Ok(())
}
