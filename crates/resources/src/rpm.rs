//! RPM packages managed through yum.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::parsing::{compare_rpm_evr, line};
use crate::retry::RetryingRunner;
use anyhow::Result;
use log::debug;
use plan::{ApplyContext, Diff, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An installed RPM package.
///
/// `version` and `release` are optional; a release without a version is
/// meaningless. An installed package satisfies the resource when its
/// `name-version-release` label starts with the desired label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rpm {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    /// Passed to `yum --disableexcludes`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disable_excludes: String,
}

impl Rpm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn with_disable_excludes(mut self, repo: impl Into<String>) -> Self {
        self.disable_excludes = repo.into();
        self
    }

    /// `name`, `name-version` or `name-version-release`
    pub fn label(&self) -> String {
        label(&self.name, &self.version, &self.release)
    }

    fn query_command(&self) -> String {
        format!(
            "rpm -q --queryformat '%{{NAME}} %{{VERSION}} %{{RELEASE}}\\n' {}",
            self.label()
        )
    }

    /// Whether `current` fails to satisfy this package
    fn differs_from(&self, current: &State) -> bool {
        if current.is_empty() {
            return true;
        }
        let installed = label(
            &current.string("name"),
            &current.string("version"),
            &current.string("release"),
        );
        !installed.starts_with(&self.label())
    }

    fn install_command(&self, current: &State) -> String {
        let version = current.string("version");
        let release = current.string("release");
        let installed = (version.as_str(), release.as_str());
        let desired = (self.version.as_str(), self.release.as_str());

        let mut cmd = if current.is_empty() {
            format!("yum -y install {}", self.label())
        } else {
            match compare_rpm_evr(installed, desired) {
                Ordering::Less => format!("yum -y upgrade-to {}", self.label()),
                Ordering::Greater => {
                    format!("yum -y remove {} && yum -y install {}", self.name, self.label())
                }
                Ordering::Equal => format!("yum -y install {}", self.label()),
            }
        };
        if !self.disable_excludes.is_empty() {
            cmd = format!("{cmd} --disableexcludes {}", self.disable_excludes);
        }
        cmd
    }
}

fn label(name: &str, version: &str, release: &str) -> String {
    match (version.is_empty(), release.is_empty()) {
        (_, false) => format!("{name}-{version}-{release}"),
        (false, true) => format!("{name}-{version}"),
        (true, true) => name.to_string(),
    }
}

impl Resource for Rpm {
    fn type_name(&self) -> &'static str {
        ResourceType::Rpm.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        let cmd = self.query_command();
        let output = match runner.run_command(ctx, &cmd, None) {
            Ok(output) => output,
            Err(e) if e.output().contains("is not installed") => return Ok(State::empty()),
            Err(e) => return Err(Error::command(cmd, e).into()),
        };

        let first = line(&output);
        let parts: Vec<&str> = first.split(' ').collect();
        let [name, version, release] = parts[..] else {
            return Err(Error::Parse {
                what: "rpm query output",
                line: first.to_string(),
            }
            .into());
        };
        Ok(to_state(&Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            disable_excludes: String::new(),
        }))
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        if !self.differs_from(&diff.current_state) {
            debug!("rpm {}: installed version satisfies {}", self.name, self.label());
            return Ok(false);
        }
        let cmd = self.install_command(&diff.current_state);
        RetryingRunner::new(runner)
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(&cmd, e))?;
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, current: &State) -> Result<()> {
        if current.is_empty() {
            return Ok(());
        }
        let cmd = format!("yum -y remove {}", self.label());
        RetryingRunner::new(runner)
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(&cmd, e))?;
        Ok(())
    }
}
