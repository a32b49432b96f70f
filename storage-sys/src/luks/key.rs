// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::error::{Result, SysError};

/// Key material used to unlock or enroll a key slot
#[derive(Clone)]
pub enum KeyMaterial {
    /// Inline passphrase, delivered on the child's standard input
    Passphrase(Zeroizing<Vec<u8>>),

    /// Key file, passed to cryptsetup by path
    KeyFile(PathBuf),
}

impl KeyMaterial {
    pub fn passphrase(secret: impl AsRef<[u8]>) -> Self {
        Self::Passphrase(Zeroizing::new(secret.as_ref().to_vec()))
    }

    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self::KeyFile(path.into())
    }

    pub fn as_file(&self) -> Option<&Path> {
        match self {
            Self::KeyFile(path) => Some(path),
            Self::Passphrase(_) => None,
        }
    }

    /// Whether this key survives line-oriented prompt input unchanged.
    ///
    /// Key files always do; a passphrase must not contain a newline, which
    /// would end the prompt early.
    pub fn fits_prompt(&self) -> bool {
        match self {
            Self::Passphrase(secret) => !secret.contains(&b'\n'),
            Self::KeyFile(_) => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Passphrase(secret) => secret.is_empty(),
            Self::KeyFile(path) => path.as_os_str().is_empty(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Standard-input payload for commands that prompt for several passphrases.
///
/// Without `--key-file -`, cryptsetup reads one passphrase per line from a
/// non-terminal stdin, in the order it would have prompted for them.
#[derive(Default)]
pub(crate) struct PromptInput {
    buffer: Zeroizing<Vec<u8>>,
}

impl PromptInput {
    /// Queue `key` if it is a passphrase; key files travel as arguments.
    ///
    /// Passphrases containing a newline are refused, since cryptsetup would
    /// silently enroll or match only the part before it.
    pub(crate) fn push(&mut self, key: &KeyMaterial, device: &str) -> Result<()> {
        if !key.fits_prompt() {
            return Err(SysError::precondition(
                device,
                "passphrase contains a line break and cannot be entered at a prompt",
            ));
        }
        if let KeyMaterial::Passphrase(secret) = key {
            self.buffer.extend_from_slice(secret);
            self.buffer.push(b'\n');
        }
        Ok(())
    }

    pub(crate) fn into_secret(self) -> Option<Zeroizing<Vec<u8>>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_passphrase() {
        let key = KeyMaterial::passphrase("correct horse");
        assert_eq!(format!("{key:?}"), "Passphrase(<redacted>)");
        assert!(!key.is_empty());
    }

    #[test]
    fn prompt_input_skips_key_files() {
        let mut input = PromptInput::default();
        input.push(&KeyMaterial::passphrase("old"), "/dev/sdb1").unwrap();
        input
            .push(&KeyMaterial::key_file("/etc/keys/new.key"), "/dev/sdb1")
            .unwrap();
        input.push(&KeyMaterial::passphrase("other"), "/dev/sdb1").unwrap();

        let secret = input.into_secret().expect("passphrases queued");
        assert_eq!(secret.as_slice(), b"old\nother\n");
        assert!(PromptInput::default().into_secret().is_none());
    }

    #[test]
    fn prompt_input_refuses_line_breaks() {
        for secret in ["be\nta", "alpha\n", "\n"] {
            let key = KeyMaterial::passphrase(secret);
            assert!(!key.fits_prompt());

            let mut input = PromptInput::default();
            let err = input.push(&key, "/dev/sdb1").unwrap_err();
            assert!(matches!(err, SysError::Precondition { .. }), "{err:?}");
            assert!(input.into_secret().is_none());
        }
        assert!(KeyMaterial::key_file("/etc/keys/with\nnewline.key").fits_prompt());
    }
}
