//! Error types for concrete resources.
//!
//! Command failures keep the command line and its combined output, since
//! that output is usually the only explanation a package manager gives.

use plan::RunError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Output fragments that mean another process holds a package manager lock.
const LOCK_MARKERS: &[&str] = &[
    "Resource temporarily unavailable",
    "Could not get lock",
    "Another app is currently holding the yum lock",
];

/// Errors raised by resources in this crate
#[derive(Debug, Error)]
pub enum Error {
    /// A command ran and failed, or could not be run
    #[error("command {command:?} failed: {source}; output: {}", .source.output().trim())]
    Command {
        command: String,
        #[source]
        source: RunError,
    },

    /// Command output did not have the expected shape
    #[error("cannot parse {what}: {line:?}")]
    Parse { what: &'static str, line: String },

    /// A fact file was readable but empty
    #[error("{0} is blank")]
    Blank(&'static str),

    /// Undo would delete a system directory
    #[error("deletion aborted because dir is protected: {0}")]
    ProtectedDir(String),

    /// A kubectl manifest names none of its content sources
    #[error("no manifest content provided")]
    NoContent,

    /// `kubeadm init` printed no join command
    #[error("kubeadm join command not found")]
    JoinCommandNotFound,

    /// A required flag is missing from the join command
    #[error("{0} not found in kubeadm join command")]
    JoinFlagNotFound(&'static str),

    /// Operating system not recognised from `/etc/os-release`
    #[error("unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("undo is not implemented for {0}")]
    UndoUnsupported(&'static str),

    #[error("failed to fetch {url}: {message}")]
    Http { url: String, message: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn command(command: impl Into<String>, source: RunError) -> Self {
        Self::Command {
            command: command.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Combined output of a failed command, empty for other errors
    pub fn output(&self) -> &str {
        match self {
            Self::Command { source, .. } => source.output(),
            _ => "",
        }
    }

    /// Exit code of a failed command
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Command { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// Whether retrying could help, i.e. a package manager lock was held
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Command { source, .. } => is_lock_contention(source),
            _ => false,
        }
    }
}

/// The command exited non-zero because a package manager lock was held
pub fn is_lock_contention(err: &RunError) -> bool {
    err.is_exit() && LOCK_MARKERS.iter().any(|m| err.output().contains(m))
}

/// Result type for this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn exit(code: i32, output: &str) -> RunError {
        RunError::Exit {
            code,
            output: output.to_string(),
        }
    }

    #[test]
    fn test_lock_contention() {
        assert!(is_lock_contention(&exit(
            100,
            "E: Could not get lock /var/lib/dpkg/lock-frontend"
        )));
        assert!(is_lock_contention(&exit(1, "Resource temporarily unavailable")));
        assert!(!is_lock_contention(&exit(100, "E: Unable to locate package foo")));
        assert!(!is_lock_contention(&RunError::Transport {
            message: "ssh".into(),
            output: "Resource temporarily unavailable".into(),
        }));
    }

    #[test]
    fn test_command_error_display() {
        let err = Error::command("yum -y install docker", exit(1, "No package docker available.\n"));
        assert_eq!(
            err.to_string(),
            "command \"yum -y install docker\" failed: command exited with 1; output: No package docker available."
        );
        assert_eq!(err.exit_code(), Some(1));
        assert!(!err.is_retryable());
    }
}
