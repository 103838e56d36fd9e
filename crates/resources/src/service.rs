//! systemd services.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::parsing::{keyval, line};
use anyhow::{Result, anyhow};
use log::debug;
use plan::{ApplyContext, Diff, RunError, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};

/// Service not started
pub const INACTIVE: &str = "inactive";
/// Service starting
pub const ACTIVATING: &str = "activating";
/// Service started
pub const ACTIVE: &str = "active";
/// Service failed to start
pub const FAILED: &str = "failed";

/// A systemd unit.
///
/// Only [`ACTIVE`] and [`INACTIVE`] make sense as a desired `status`;
/// queries can report any systemd active state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub status: String,
    pub enabled: bool,
}

impl Service {
    /// Enabled and running
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ACTIVE.to_string(),
            enabled: true,
        }
    }

    /// Disabled and stopped
    pub fn stopped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: INACTIVE.to_string(),
            enabled: false,
        }
    }

    fn systemctl(
        &self,
        ctx: &ApplyContext,
        runner: &dyn Runner,
        verb: &str,
    ) -> Result<String, RunError> {
        runner.run_command(ctx, &format!("systemctl {verb} {}", self.name), None)
    }

    /// Run `systemctl <verb>`. Returns false if the unit is not loaded,
    /// which leaves nothing to undo.
    fn undo_step(&self, ctx: &ApplyContext, runner: &dyn Runner, verb: &str) -> Result<bool> {
        match self.systemctl(ctx, runner, verb) {
            Ok(_) => Ok(true),
            Err(e) if e.output().contains("not loaded") => {
                debug!("service {}: not loaded, nothing to {verb}", self.name);
                Ok(false)
            }
            Err(e) => Err(Error::command(format!("systemctl {verb} {}", self.name), e).into()),
        }
    }
}

impl Resource for Service {
    fn type_name(&self) -> &'static str {
        ResourceType::Service.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        // `systemctl is-active` exits non-zero for inactive units, `show` does not
        let output = self
            .systemctl(ctx, runner, "show -p ActiveState")
            .map_err(|e| Error::command(format!("systemctl show {}", self.name), e))?;
        let status = keyval(&output, "ActiveState").unwrap_or_default();
        if status.is_empty() {
            return Err(anyhow!(
                "service {}: query: could not query active state",
                self.name
            ));
        }

        // is-enabled exits non-zero for disabled units
        let enabled = match self.systemctl(ctx, runner, "is-enabled") {
            Ok(output) => line(&output) == "enabled",
            Err(e) if line(e.output()) == "disabled" => false,
            Err(e) => {
                return Err(Error::command(format!("systemctl is-enabled {}", self.name), e)
                    .into());
            }
        };

        Ok(to_state(&Self {
            name: self.name.clone(),
            status: status.to_string(),
            enabled,
        }))
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        let current = &diff.current_state;
        let currently_enabled = current.bool("enabled");
        let current_status = current.string("status");

        let enable = match (currently_enabled, self.enabled) {
            (false, true) => Some("enable"),
            (true, false) => Some("disable"),
            _ => None,
        };
        let start = if self.status == ACTIVE && current_status == INACTIVE {
            Some("start")
        } else if self.status == INACTIVE && current_status != INACTIVE {
            Some("stop")
        } else {
            None
        };

        for verb in enable.into_iter().chain(start) {
            self.systemctl(ctx, runner, verb)
                .map_err(|e| Error::command(format!("systemctl {verb} {}", self.name), e))?;
        }
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, current: &State) -> Result<()> {
        if current.bool("enabled") && !self.undo_step(ctx, runner, "disable")? {
            return Ok(());
        }
        if current.string("status") != INACTIVE {
            self.undo_step(ctx, runner, "stop")?;
        }
        Ok(())
    }
}
