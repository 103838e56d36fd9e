//! Command execution against a target machine
//!
//! The engine never spawns processes itself. Resources receive a [`Runner`]
//! and describe what to do as shell commands. Implementations decide where
//! the command runs: [`LocalRunner`] on this machine, [`SshRunner`] on a
//! remote one, [`SudoRunner`] wrapping either with `sudo`.

mod local;
mod mock;
mod ssh;
mod sudo;

pub use local::LocalRunner;
pub use mock::{Invocation, MockRunner};
pub use ssh::SshRunner;
pub use sudo::SudoRunner;

use crate::context::ApplyContext;
use log::{debug, trace};
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failure of a single command.
///
/// [`RunError::Exit`] means the command ran and reported failure. The
/// other variants mean it could not be run to completion at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("command exited with {code}")]
    Exit { code: i32, output: String },

    #[error("command cancelled")]
    Cancelled,

    #[error("failed to start command: {0}")]
    Spawn(#[from] io::Error),

    #[error("{message}")]
    Transport { message: String, output: String },
}

impl RunError {
    /// Exit code, if the command ran and exited non-zero
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Combined output captured before the failure
    pub fn output(&self) -> &str {
        match self {
            Self::Exit { output, .. } | Self::Transport { output, .. } => output,
            Self::Cancelled | Self::Spawn(_) => "",
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }
}

/// Executes shell commands on a target.
pub trait Runner: Send + Sync {
    /// Run `cmd` through a shell, optionally feeding `stdin`.
    ///
    /// Returns combined stdout and stderr on success.
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError>;
}

impl<R: Runner + ?Sized> Runner for &R {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        (**self).run_command(ctx, cmd, stdin)
    }
}

impl<R: Runner + ?Sized> Runner for Box<R> {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        (**self).run_command(ctx, cmd, stdin)
    }
}

impl<R: Runner + ?Sized> Runner for Arc<R> {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        (**self).run_command(ctx, cmd, stdin)
    }
}

/// Quote `s` for a POSIX shell using single quotes
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Process exit status plus captured output
pub(crate) struct Finished {
    pub status: ExitStatus,
    pub output: String,
}

impl Finished {
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Spawn `command`, feed `stdin`, and wait for it while watching for
/// cancellation. stdout and stderr are concatenated.
pub(crate) fn spawn_and_wait(
    mut command: Command,
    ctx: &ApplyContext,
    stdin: Option<&[u8]>,
) -> Result<Finished, RunError> {
    if ctx.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || pipe.write_all(&input)))
        }
        _ => None,
    };
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = wait_or_kill(&mut child, ctx)?;

    if let Some(writer) = writer {
        // A command that exits without reading all of stdin is not an error.
        let _ = writer.join();
    }
    let mut output = collect(stdout);
    output.push_str(&collect(stderr));
    trace!("output: {output}");

    Ok(Finished { status, output })
}

fn wait_or_kill(child: &mut Child, ctx: &ApplyContext) -> Result<ExitStatus, RunError> {
    loop {
        if ctx.is_cancelled() {
            debug!("cancelling pid {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(RunError::Cancelled);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("echo hi"), "'echo hi'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_run_error_accessors() {
        let err = RunError::Exit {
            code: 3,
            output: "nope".into(),
        };
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.output(), "nope");
        assert_eq!(err.to_string(), "command exited with 3");
        assert!(err.is_exit());
        assert_eq!(RunError::Cancelled.exit_code(), None);
        assert_eq!(RunError::Cancelled.output(), "");
    }
}
