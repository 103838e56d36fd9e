//! Scriptable resource for engine tests.
//!
//! A [`Fake`] talks to its runner with `query <name>`, `apply <name>` and
//! `undo <name>`, so tests drive it through [`MockRunner`] rules and assert
//! on the recorded commands.
//!
//! [`MockRunner`]: crate::runner::MockRunner

use crate::context::ApplyContext;
use crate::resource::{Diff, Resource};
use crate::runner::Runner;
use crate::state::{State, to_state};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fake {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(skip)]
    pub propagate: bool,
}

impl Fake {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn propagating(mut self) -> Self {
        self.propagate = true;
        self
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }
}

impl Resource for Fake {
    fn type_name(&self) -> &'static str {
        "Fake"
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &["secret"]
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        let out = runner.run_command(ctx, &format!("query {}", self.name), None)?;
        if out.trim() == "present" {
            Ok(self.state())
        } else {
            Ok(State::empty())
        }
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        runner.run_command(ctx, &format!("apply {}", self.name), None)?;
        Ok(self.propagate)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        runner.run_command(ctx, &format!("undo {}", self.name), None)?;
        Ok(())
    }
}

pub fn decode(type_name: &str, fields: Value) -> Result<Box<dyn Resource>> {
    match type_name {
        "Fake" => Ok(Box::new(serde_json::from_value::<Fake>(fields)?)),
        other => bail!("unknown resource type {other}"),
    }
}
