use super::{RunError, Runner, spawn_and_wait};
use crate::context::ApplyContext;
use log::debug;
use std::process::Command;

/// Runs commands on this machine through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl Runner for LocalRunner {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        debug!("local: {cmd}");
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);

        let finished = spawn_and_wait(command, ctx, stdin)?;
        if finished.status.success() {
            Ok(finished.output)
        } else {
            Err(RunError::Exit {
                code: finished.code(),
                output: finished.output,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use std::time::{Duration, Instant};

    #[test]
    fn test_captures_stdout_and_stderr() {
        let out = LocalRunner
            .run_command(&ApplyContext::new(), "echo out; echo err >&2", None)
            .unwrap();
        assert_eq!(out, "out\nerr\n");
    }

    #[test]
    fn test_exit_code_is_typed() {
        let err = LocalRunner
            .run_command(&ApplyContext::new(), "echo missing; exit 3", None)
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.output(), "missing\n");
    }

    #[test]
    fn test_stdin_is_fed() {
        let out = LocalRunner
            .run_command(&ApplyContext::new(), "cat", Some(b"hello"))
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let err = LocalRunner
            .run_command(&ApplyContext::with_cancel(token), "echo never", None)
            .unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }

    #[test]
    fn test_cancel_kills_running_command() {
        let token = CancelToken::new();
        let ctx = ApplyContext::with_cancel(token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            token.cancel();
        });

        let started = Instant::now();
        let err = LocalRunner.run_command(&ctx, "exec sleep 30", None).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, RunError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
