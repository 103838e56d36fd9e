use super::{RunError, Runner, spawn_and_wait};
use crate::context::ApplyContext;
use log::debug;
use std::path::PathBuf;
use std::process::Command;

/// ssh reserves this exit code for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Runs commands on a remote machine through the system `ssh` client.
///
/// Authentication is key based and non-interactive (`BatchMode=yes`).
#[derive(Debug, Clone)]
pub struct SshRunner {
    user: String,
    host: String,
    port: u16,
    key: Option<PathBuf>,
}

impl SshRunner {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: 22,
            key: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Arguments passed to `ssh` for `cmd`
    pub fn args(&self, cmd: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(self.destination());
        args.push("--".to_string());
        args.push(cmd.to_string());
        args
    }
}

impl Runner for SshRunner {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        debug!("{}: {cmd}", self.destination());
        let mut command = Command::new("ssh");
        command.args(self.args(cmd));

        let finished = spawn_and_wait(command, ctx, stdin)?;
        match finished.code() {
            0 => Ok(finished.output),
            SSH_TRANSPORT_FAILURE => Err(RunError::Transport {
                message: format!("ssh to {} failed", self.destination()),
                output: finished.output,
            }),
            code => Err(RunError::Exit {
                code,
                output: finished.output,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_port_no_key() {
        let ssh = SshRunner::new("root", "10.0.0.1");
        assert_eq!(
            ssh.args("uptime"),
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "22",
                "root@10.0.0.1",
                "--",
                "uptime"
            ]
        );
    }

    #[test]
    fn test_args_with_key_and_port() {
        let ssh = SshRunner::new("centos", "node-1")
            .with_port(2222)
            .with_key("/home/me/.ssh/cluster");
        let args = ssh.args("true");
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/home/me/.ssh/cluster"]));
        assert_eq!(args.last().map(String::as_str), Some("true"));
    }
}
