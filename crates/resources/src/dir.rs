//! Directories on the target.

use crate::catalog::ResourceType;
use crate::error::Error;
use anyhow::Result;
use plan::runner::shell_quote;
use plan::{ApplyContext, Diff, ParamString, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};

/// Directories undo refuses to delete
const PROTECTED_DIRS: &[&str] = &[
    "/", "/etc", "/var", "/dev", "/usr", "/root", "/home", "/opt", "/bin", "/sbin",
];

/// A directory. It is never queried, so apply always runs `mkdir -p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dir {
    pub path: ParamString,
    /// Undo removes the whole tree instead of only an empty directory
    #[serde(default)]
    pub recursive_delete: bool,
}

impl Dir {
    pub fn new(path: impl Into<ParamString>) -> Self {
        Self {
            path: path.into(),
            recursive_delete: false,
        }
    }

    pub fn recursive(mut self) -> Self {
        self.recursive_delete = true;
        self
    }
}

impl Resource for Dir {
    fn type_name(&self) -> &'static str {
        ResourceType::Dir.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        let cmd = format!("mkdir -p {}", shell_quote(&self.path.render()));
        runner
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(&cmd, e))?;
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        let rendered = self.path.render();
        let trimmed = rendered.trim_end_matches('/');
        let path = if trimmed.is_empty() { "/" } else { trimmed };
        if PROTECTED_DIRS.contains(&path) {
            return Err(Error::ProtectedDir(path.to_string()).into());
        }

        let quoted = shell_quote(path);
        let cmd = if self.recursive_delete {
            format!("rm -rvf -- {quoted}")
        } else {
            format!("[ ! -e {quoted} ] || rmdir -v --ignore-fail-on-non-empty -- {quoted}")
        };
        runner
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(&cmd, e))?;
        Ok(())
    }
}
