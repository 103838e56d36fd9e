//! Debian packages managed through apt and dpkg.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::parsing::compare_deb_versions;
use crate::retry::RetryingRunner;
use anyhow::{Context as _, Result};
use log::debug;
use plan::runner::shell_quote;
use plan::{ApplyContext, Diff, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const APT_ENV: &str = "LC_ALL=C DEBIAN_FRONTEND=noninteractive";
const APT_GET: &str = "apt-get";
const DPKG_QUERY: &str = "dpkg-query";

/// A `.deb` package.
///
/// `suffix` is either `=` followed by a version (`=1.14.1-00`) or `/`
/// followed by a release stream (`/stable`). Empty means any version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deb {
    pub name: String,
    #[serde(default)]
    pub suffix: String,
}

/// A package as reported by `dpkg-query`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebPackage {
    pub name: String,
    pub version: String,
}

impl From<&DebPackage> for Deb {
    fn from(pkg: &DebPackage) -> Self {
        Self {
            name: pkg.name.clone(),
            suffix: format!("={}", pkg.version),
        }
    }
}

impl Deb {
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
        }
    }

    /// `Deb` pinned to `version`
    pub fn pinned(name: impl Into<String>, version: &str) -> Self {
        Self::new(name, format!("={version}"))
    }

    /// Whether `installed` is a strictly lower revision than this package.
    /// Release streams and unpinned packages never compare lower.
    fn is_upgrade_from(&self, installed: &Self) -> bool {
        self.suffix.starts_with('=')
            && compare_deb_versions(&installed.suffix, &self.suffix) == Ordering::Less
    }
}

/// Installed packages named `name`. A package dpkg does not know is not an
/// error.
pub fn show_installed(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    name: &str,
) -> Result<Vec<DebPackage>, Error> {
    let cmd = format!(
        "{DPKG_QUERY} --showformat '${{Package}}\\t${{Version}}\\n' -W {}",
        shell_quote(name)
    );
    let output = match runner.run_command(ctx, &cmd, None) {
        Ok(output) => output,
        Err(e) if e.exit_code() == Some(1) => return Ok(Vec::new()),
        Err(e) => return Err(Error::command(cmd, e)),
    };

    output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| match l.split('\t').collect::<Vec<_>>()[..] {
            [name, version] => Ok(DebPackage {
                name: name.to_string(),
                version: version.to_string(),
            }),
            _ => Err(Error::Parse {
                what: "dpkg-query output",
                line: l.to_string(),
            }),
        })
        .collect()
}

/// apt-get invocations, each retried on lock contention
struct Apt<'a> {
    runner: RetryingRunner<'a>,
}

impl<'a> Apt<'a> {
    fn new(runner: &'a dyn Runner) -> Self {
        Self {
            runner: RetryingRunner::new(runner),
        }
    }

    fn run(&self, ctx: &ApplyContext, args: &str) -> Result<(), Error> {
        let cmd = format!("{APT_ENV} {APT_GET} {args}");
        self.runner
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(cmd, e))?;
        Ok(())
    }

    fn update_cache(&self, ctx: &ApplyContext) -> Result<(), Error> {
        self.run(ctx, "--yes --quiet update")
    }

    fn install(&self, ctx: &ApplyContext, name: &str, suffix: &str) -> Result<(), Error> {
        self.run(
            ctx,
            &format!(
                "--yes --quiet --verbose-versions --no-install-recommends --allow-downgrades install {}",
                shell_quote(&format!("{name}{suffix}"))
            ),
        )
    }

    fn upgrade(&self, ctx: &ApplyContext, name: &str, suffix: &str) -> Result<(), Error> {
        self.run(
            ctx,
            &format!(
                "--yes --quiet --verbose-versions --no-install-recommends --only-upgrade install {}",
                shell_quote(&format!("{name}{suffix}"))
            ),
        )
    }

    fn purge(&self, ctx: &ApplyContext, name: &str) -> Result<(), Error> {
        match self.run(
            ctx,
            &format!("--yes --quiet --verbose-versions --auto-remove purge {}", shell_quote(name)),
        ) {
            Err(e) if e.output().contains(&format!("E: Unable to locate package {name}")) => {
                debug!("deb {name}: unknown to apt, nothing to purge");
                Ok(())
            }
            other => other,
        }
    }
}

impl Resource for Deb {
    fn type_name(&self) -> &'static str {
        ResourceType::Deb.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        let installed = show_installed(ctx, runner, &self.name)?;
        Ok(installed
            .first()
            .map_or_else(State::empty, |pkg| Self::from(pkg).state()))
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        let apt = Apt::new(runner);
        apt.update_cache(ctx).context("update cache failed")?;

        let installed = show_installed(ctx, runner, &self.name)?;
        match installed.first() {
            Some(pkg) if self.is_upgrade_from(&Self::from(pkg)) => {
                apt.upgrade(ctx, &self.name, &self.suffix)?;
            }
            _ => apt.install(ctx, &self.name, &self.suffix)?,
        }
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        Apt::new(runner).purge(ctx, &self.name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::runner::MockRunner;

    #[test]
    fn test_query_parses_dpkg_output() {
        let mock = MockRunner::new();
        mock.on("dpkg-query", "kubelet\t1.14.1-00\n");
        let state = Deb::pinned("kubelet", "1.14.1-00")
            .query_state(&ApplyContext::new(), &mock)
            .unwrap();
        assert_eq!(state, Deb::pinned("kubelet", "1.14.1-00").state());
        assert_eq!(
            mock.commands()[0],
            "dpkg-query --showformat '${Package}\\t${Version}\\n' -W 'kubelet'"
        );
    }

    #[test]
    fn test_query_unknown_package_is_empty() {
        let mock = MockRunner::new();
        mock.fail("dpkg-query", 1, "dpkg-query: no packages found matching kubelet");
        let state = Deb::new("kubelet", "")
            .query_state(&ApplyContext::new(), &mock)
            .unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_query_rejects_malformed_lines() {
        let mock = MockRunner::new();
        mock.on("dpkg-query", "kubelet 1.14.1-00\n");
        let err = show_installed(&ApplyContext::new(), &mock, "kubelet").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_apply_installs_missing_package() {
        let mock = MockRunner::new();
        mock.fail("dpkg-query", 1, "");
        Deb::pinned("kubelet", "1.14.1-00")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap();

        let apt: Vec<String> = mock
            .commands()
            .into_iter()
            .filter(|c| c.contains("apt-get"))
            .collect();
        assert_eq!(
            apt,
            [
                "LC_ALL=C DEBIAN_FRONTEND=noninteractive apt-get --yes --quiet update",
                "LC_ALL=C DEBIAN_FRONTEND=noninteractive apt-get --yes --quiet --verbose-versions --no-install-recommends --allow-downgrades install 'kubelet=1.14.1-00'",
            ]
        );
    }

    #[test]
    fn test_apply_upgrades_lower_revision() {
        let mock = MockRunner::new();
        mock.on("dpkg-query", "kubelet\t1.13.5-00\n");
        Deb::pinned("kubelet", "1.14.1-00")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap();
        assert_eq!(mock.count("--only-upgrade install 'kubelet=1.14.1-00'"), 1);
    }

    #[test]
    fn test_apply_downgrade_uses_install() {
        let mock = MockRunner::new();
        mock.on("dpkg-query", "kubelet\t1.15.0-00\n");
        Deb::pinned("kubelet", "1.14.1-00")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap();
        assert_eq!(mock.count("--allow-downgrades install"), 1);
        assert_eq!(mock.count("--only-upgrade"), 0);
    }

    #[test]
    fn test_apply_reports_update_failure() {
        let mock = MockRunner::new();
        mock.fail("update", 100, "E: Failed to fetch");
        let err = Deb::new("docker.io", "")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap_err();
        assert!(format!("{err:#}").starts_with("update cache failed: "));
    }

    #[test]
    fn test_undo_tolerates_unknown_package() {
        let mock = MockRunner::new();
        mock.fail("purge", 100, "E: Unable to locate package kubelet\n");
        Deb::new("kubelet", "")
            .undo(&ApplyContext::new(), &mock, &State::empty())
            .unwrap();

        let mock = MockRunner::new();
        mock.fail("purge", 100, "E: dpkg was interrupted\n");
        assert!(
            Deb::new("docker.io", "")
                .undo(&ApplyContext::new(), &mock, &State::empty())
                .is_err()
        );
    }
}
