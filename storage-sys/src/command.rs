// SPDX-License-Identifier: GPL-3.0-only

//! External command execution
//!
//! Commands are always built as an argument vector; nothing here goes through
//! a shell. Secret material is written to the child's standard input and is
//! never part of the rendered command line.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{Result, SysError};

/// One command to run
#[derive(Clone, Default)]
pub struct Invocation {
    program: String,
    args: Vec<OsString>,
    stdin: Option<Zeroizing<Vec<u8>>>,
    quiet: bool,
    merge_stderr: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes to write to the child's standard input
    pub fn stdin_secret(mut self, secret: Zeroizing<Vec<u8>>) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Discard all output; only the exit status is of interest
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Capture standard error together with standard output
    pub fn merge_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref().map(Vec::as_slice)
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn merges_stderr(&self) -> bool {
        self.merge_stderr
    }

    /// Command line for logs and error messages
    pub fn render(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.render())
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("quiet", &self.quiet)
            .field("merge_stderr", &self.merge_stderr)
            .finish()
    }
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the child was killed by a signal
    pub status: i32,

    /// Standard output lines (plus standard error when merged)
    pub lines: Vec<String>,

    /// Standard error lines when not merged
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Output worth showing when the command failed
    pub fn diagnostic_lines(&self) -> Vec<String> {
        let mut lines = self.stderr.clone();
        lines.extend(self.lines.iter().cloned());
        lines
    }

    /// Turn a non-zero exit into `SysError::ToolFailed`
    pub fn check(self, invocation: &Invocation) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(SysError::ToolFailed {
            command: invocation.render(),
            status: self.status,
            output: self.diagnostic_lines(),
        })
    }
}

/// Something that can run an `Invocation`
///
/// `Err` is reserved for failing to run the command at all; a command that
/// ran and exited non-zero is an `Ok` with that status.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs commands on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!("Running {}", invocation.render());

        let mut command = Command::new(invocation.program());
        command.args(invocation.arguments());

        if invocation.is_quiet() {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        command.stdin(if invocation.stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .map_err(|e| spawn_error(invocation.program(), e))?;

        if let Some(secret) = invocation.stdin() {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(secret) {
                    // The child may exit before reading everything (e.g. a
                    // rejected key); its exit status is what matters then.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        drop(stdin);
                        reap(&mut child, invocation.program());
                        return Err(SysError::Io(e));
                    }
                }
            }
        }

        let output = child.wait_with_output()?;
        let status = output.status.code().unwrap_or(-1);

        let mut lines = split_lines(&output.stdout);
        let mut stderr = split_lines(&output.stderr);
        if invocation.merges_stderr() {
            lines.append(&mut stderr);
        }

        if status != 0 {
            warn!("{} exited with status {}", invocation.program(), status);
        }

        Ok(CommandOutput {
            status,
            lines,
            stderr,
        })
    }
}

/// Kill and wait for a child that will not be read from
fn reap(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill {}: {}", program, e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to wait for {}: {}", program, e);
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> SysError {
    match err.kind() {
        std::io::ErrorKind::NotFound => SysError::ToolNotFound {
            program: program.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => {
            SysError::PermissionDenied(format!("cannot execute {program}: {err}"))
        }
        _ => SysError::Spawn {
            program: program.to_string(),
            source: err,
        },
    }
}

fn split_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn renders_argv_without_secret() {
        let invocation = Invocation::new("cryptsetup")
            .args(["open", "--key-file", "-", "/dev/sdb1", "sdb1-crypt"])
            .stdin_secret(Zeroizing::new(b"hunter2".to_vec()));

        assert_eq!(
            invocation.render(),
            "cryptsetup open --key-file - /dev/sdb1 sdb1-crypt"
        );
        assert!(!format!("{invocation:?}").contains("hunter2"));
    }

    #[test]
    fn captures_stdout_lines_and_status() {
        let output = SystemCommandRunner
            .run(&sh("printf 'one\\ntwo\\n'; echo oops >&2; exit 3"))
            .expect("run sh");

        assert_eq!(output.status, 3);
        assert_eq!(output.lines, vec!["one", "two"]);
        assert_eq!(output.stderr, vec!["oops"]);
    }

    #[test]
    fn merges_stderr_into_lines() {
        let output = SystemCommandRunner
            .run(&sh("echo out; echo err >&2").merge_stderr())
            .expect("run sh");

        assert!(output.success());
        assert_eq!(output.lines, vec!["out", "err"]);
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn quiet_discards_output() {
        let output = SystemCommandRunner
            .run(&sh("echo noise; echo more >&2; exit 1").quiet())
            .expect("run sh");

        assert_eq!(output.status, 1);
        assert!(output.lines.is_empty());
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn delivers_secret_on_stdin() {
        let output = SystemCommandRunner
            .run(&sh("cat").stdin_secret(Zeroizing::new(b"first\nsecond\n".to_vec())))
            .expect("run sh");

        assert_eq!(output.lines, vec!["first", "second"]);
    }

    #[test]
    fn missing_program_is_tool_not_found() {
        let err = SystemCommandRunner
            .run(&Invocation::new("definitely-not-a-real-binary-xyz"))
            .unwrap_err();
        assert!(matches!(err, SysError::ToolNotFound { .. }));
    }

    #[test]
    fn non_executable_program_is_permission_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("cryptsetup");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").expect("script");

        let err = SystemCommandRunner
            .run(&Invocation::new(script.to_string_lossy()))
            .unwrap_err();
        assert!(matches!(err, SysError::PermissionDenied(_)), "{err:?}");
    }

    #[test]
    fn reap_leaves_no_running_child() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .spawn()
            .expect("spawn sleep");

        reap(&mut child, "sh");
        assert!(child.try_wait().expect("try_wait").is_some());
    }

    #[test]
    fn spawn_errors_are_classified_by_kind() {
        use std::io::{Error, ErrorKind};

        assert!(matches!(
            spawn_error("cryptsetup", Error::from(ErrorKind::NotFound)),
            SysError::ToolNotFound { .. }
        ));
        assert!(matches!(
            spawn_error("cryptsetup", Error::from(ErrorKind::PermissionDenied)),
            SysError::PermissionDenied(_)
        ));
        assert!(matches!(
            spawn_error("cryptsetup", Error::from(ErrorKind::Other)),
            SysError::Spawn { .. }
        ));
    }

    #[test]
    fn check_maps_failure_to_tool_failed() {
        let invocation = Invocation::new("cryptsetup").arg("luksUUID").arg("/dev/sdb1");
        let output = CommandOutput {
            status: 1,
            lines: Vec::new(),
            stderr: vec!["Device /dev/sdb1 is not a valid LUKS device.".into()],
        };

        match output.check(&invocation) {
            Err(SysError::ToolFailed {
                command, status, ..
            }) => {
                assert_eq!(command, "cryptsetup luksUUID /dev/sdb1");
                assert_eq!(status, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
