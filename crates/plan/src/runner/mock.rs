use super::{RunError, Runner};
use crate::context::ApplyContext;
use std::sync::{Mutex, PoisonError};

/// A command seen by [`MockRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone)]
enum Response {
    Output(String),
    Exit(i32, String),
    Transport(String),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    response: Response,
    remaining: Option<usize>,
}

/// Scripted runner for tests.
///
/// Responses are matched by substring against the command, first matching
/// rule wins. Unmatched commands succeed with empty output. Every command
/// is recorded.
///
/// ```
/// use plan::{ApplyContext, runner::{MockRunner, Runner}};
///
/// let mock = MockRunner::new();
/// mock.fail_once("rpm -q", 1, "package docker is not installed");
/// mock.on("rpm -q", "docker 19.03 1.el7");
///
/// let ctx = ApplyContext::new();
/// assert!(mock.run_command(&ctx, "rpm -q docker", None).is_err());
/// assert_eq!(mock.run_command(&ctx, "rpm -q docker", None).unwrap(), "docker 19.03 1.el7");
/// assert_eq!(mock.count("rpm -q"), 2);
/// ```
#[derive(Debug, Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` succeed with `output`
    pub fn on(&self, pattern: &str, output: &str) -> &Self {
        self.push(pattern, Response::Output(output.to_string()), None)
    }

    /// Next command containing `pattern` succeeds with `output`
    pub fn on_once(&self, pattern: &str, output: &str) -> &Self {
        self.push(pattern, Response::Output(output.to_string()), Some(1))
    }

    /// Commands containing `pattern` exit with `code`
    pub fn fail(&self, pattern: &str, code: i32, output: &str) -> &Self {
        self.push(pattern, Response::Exit(code, output.to_string()), None)
    }

    /// Next command containing `pattern` exits with `code`
    pub fn fail_once(&self, pattern: &str, code: i32, output: &str) -> &Self {
        self.push(pattern, Response::Exit(code, output.to_string()), Some(1))
    }

    /// Commands containing `pattern` fail to reach the target
    pub fn unreachable(&self, pattern: &str, message: &str) -> &Self {
        self.push(pattern, Response::Transport(message.to_string()), None)
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|i| i.command)
            .collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of commands containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Forget recorded commands, keep the rules
    pub fn clear(&self) {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, pattern: &str, response: Response, remaining: Option<usize>) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                pattern: pattern.to_string(),
                response,
                remaining,
            });
        self
    }

    fn respond(&self, cmd: &str) -> Response {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .iter_mut()
            .find(|r| cmd.contains(&r.pattern) && r.remaining != Some(0));
        match rule {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.response.clone()
            }
            None => Response::Output(String::new()),
        }
    }
}

impl Runner for MockRunner {
    fn run_command(
        &self,
        ctx: &ApplyContext,
        cmd: &str,
        stdin: Option<&[u8]>,
    ) -> Result<String, RunError> {
        if ctx.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                command: cmd.to_string(),
                stdin: stdin.map(|b| String::from_utf8_lossy(b).into_owned()),
            });

        match self.respond(cmd) {
            Response::Output(output) => Ok(output),
            Response::Exit(code, output) => Err(RunError::Exit { code, output }),
            Response::Transport(message) => Err(RunError::Transport {
                message,
                output: String::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_commands_succeed_and_are_recorded() {
        let mock = MockRunner::new();
        let ctx = ApplyContext::new();
        assert_eq!(mock.run_command(&ctx, "true", Some(b"in")).unwrap(), "");
        assert_eq!(
            mock.invocations(),
            vec![Invocation {
                command: "true".into(),
                stdin: Some("in".into()),
            }]
        );
        mock.clear();
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_once_rules_are_consumed() {
        let mock = MockRunner::new();
        mock.fail_once("systemctl", 3, "inactive").on("systemctl", "active");
        let ctx = ApplyContext::new();

        let err = mock.run_command(&ctx, "systemctl is-active x", None).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(mock.run_command(&ctx, "systemctl is-active x", None).unwrap(), "active");
        assert_eq!(mock.run_command(&ctx, "systemctl is-active x", None).unwrap(), "active");
    }

    #[test]
    fn test_unreachable() {
        let mock = MockRunner::new();
        mock.unreachable("", "no route to host");
        let err = mock.run_command(&ApplyContext::new(), "uptime", None).unwrap_err();
        assert_eq!(err.to_string(), "no route to host");
        assert_eq!(err.exit_code(), None);
    }
}
