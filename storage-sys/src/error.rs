// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("{program} not found in PATH")]
    ToolNotFound { program: String },

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {}", diagnostic(.output))]
    ToolFailed {
        command: String,
        status: i32,
        output: Vec<String>,
    },

    #[error("Key rejected for {device}: {}", diagnostic(.output))]
    KeyRejected { device: String, output: Vec<String> },

    #[error("Cannot operate on {device}: {reason}")]
    Precondition { device: String, reason: String },

    #[error("LUKS metadata unavailable for {device}: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("Device lookup failed for {device}: {reason}")]
    DeviceLookup { device: String, reason: String },

    #[error("Unexpected cryptsetup output: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SysError {
    pub(crate) fn precondition(device: &str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            device: device.to_string(),
            reason: reason.into(),
        }
    }

    /// Exit status of the failed tool invocation, if that is what failed
    pub fn tool_status(&self) -> Option<i32> {
        match self {
            Self::ToolFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn diagnostic(output: &[String]) -> String {
    let text = output
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if text.is_empty() {
        "no additional output".to_string()
    } else {
        text
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
