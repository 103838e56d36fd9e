use super::{RunError, Runner, shell_quote};
use crate::context::ApplyContext;

/// Wraps another runner so every command runs as root through
/// non-interactive `sudo`.
#[derive(Debug, Clone)]
pub struct SudoRunner<R> {
    inner: R,
}

impl<R: Runner> SudoRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

/// `sudo -n -- sh -c '<cmd>'`
pub fn sudo_command(cmd: &str) -> String {
    format!("sudo -n -- sh -c {}", shell_quote(cmd))
}

impl<R: Runner> Runner for SudoRunner<R> {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        self.inner.run_command(ctx, &sudo_command(cmd), stdin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    #[test]
    fn test_wraps_and_escapes() {
        let mock = MockRunner::new();
        let sudo = SudoRunner::new(&mock);
        sudo.run_command(&ApplyContext::new(), "echo 'hi' > /etc/x", None)
            .unwrap();
        assert_eq!(
            mock.commands(),
            vec![r"sudo -n -- sh -c 'echo '\''hi'\'' > /etc/x'".to_string()]
        );
    }
}
