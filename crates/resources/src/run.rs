//! Scripts run for their side effects.

use crate::catalog::ResourceType;
use crate::error::Error;
use anyhow::Result;
use plan::{ApplyContext, Diff, Output, ParamString, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Runs a script (possibly a single command).
///
/// Run realises no state, so apply always runs the script. Its output can be
/// captured into an [`Output`] slot for later resources to render into
/// their own commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub script: ParamString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_script: Option<ParamString>,
    /// Undone when there is no undo script
    #[serde(skip)]
    pub undo_resource: Option<Arc<dyn Resource>>,
    #[serde(skip)]
    pub output: Option<Output>,
}

impl Run {
    pub fn new(script: impl Into<ParamString>) -> Self {
        Self {
            script: script.into(),
            undo_script: None,
            undo_resource: None,
            output: None,
        }
    }

    pub fn with_undo_script(mut self, script: impl Into<ParamString>) -> Self {
        self.undo_script = Some(script.into());
        self
    }

    pub fn with_undo_resource(mut self, resource: impl Resource + 'static) -> Self {
        self.undo_resource = Some(Arc::new(resource));
        self
    }

    /// Capture the script's output into `output`
    pub fn with_output(mut self, output: Output) -> Self {
        self.output = Some(output);
        self
    }
}

impl Resource for Run {
    fn type_name(&self) -> &'static str {
        ResourceType::Run.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        let script = self.script.render();
        let result = runner.run_command(ctx, &script, None);
        if let Some(slot) = &self.output {
            slot.set(match &result {
                Ok(output) => output.as_str(),
                Err(e) => e.output(),
            });
        }
        result.map_err(|e| Error::command(script, e))?;
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        match (&self.undo_script, &self.undo_resource) {
            (Some(script), _) => {
                let script = script.render();
                runner
                    .run_command(ctx, &script, None)
                    .map_err(|e| Error::command(script, e))?;
                Ok(())
            }
            (None, Some(resource)) => resource.undo(ctx, runner, &State::empty()),
            (None, None) => Ok(()),
        }
    }
}
