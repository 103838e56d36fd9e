//! Facts about the target operating system.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::parsing::keyval;
use anyhow::Result;
use log::error;
use plan::runner::shell_quote;
use plan::{ApplyContext, Diff, Resource, RunError, Runner, State, to_state};
use serde::{Deserialize, Serialize};

/// Where a fact is read from, first readable file wins
struct Fact {
    name: &'static str,
    files: &'static [&'static str],
}

const MACHINE_ID: Fact = Fact {
    name: "MachineID",
    files: &["/etc/machine-id", "/var/lib/dbus/machine-id"],
};

const SYSTEM_UUID: Fact = Fact {
    name: "SystemUUID",
    files: &["/sys/class/dmi/id/product_uuid", "/etc/machine-id"],
};

impl Fact {
    /// `cat a 2>/dev/null || cat b 2>/dev/null`
    fn command(&self) -> String {
        self.files
            .iter()
            .map(|f| format!("cat {f} 2>/dev/null"))
            .collect::<Vec<_>>()
            .join(" || ")
    }

    fn read(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<String, Error> {
        let cmd = self.command();
        let output = runner
            .run_command(ctx, &cmd, None)
            .map_err(|e| Error::command(cmd, e))?;
        let value = output.trim();
        if value.is_empty() {
            return Err(Error::Blank(self.name));
        }
        Ok(value.to_string())
    }
}

/// Identity of the target machine.
///
/// A read-only resource: applying it only gathers facts, so it never
/// reports a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Os {
    #[serde(rename = "MachineID", default)]
    pub machine_id: String,
    #[serde(rename = "SystemUUID", default)]
    pub system_uuid: String,
}

impl Os {
    /// Gather the facts of the machine behind `runner`
    pub fn identify(ctx: &ApplyContext, runner: &dyn Runner) -> Result<Self, Error> {
        let gathered = Self {
            machine_id: MACHINE_ID.read(ctx, runner)?,
            system_uuid: SYSTEM_UUID.read(ctx, runner)?,
        };
        Ok(gathered)
    }
}

impl Resource for Os {
    fn type_name(&self) -> &'static str {
        ResourceType::Os.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<State> {
        let os = Self::identify(ctx, runner).inspect_err(|e| error!("{e}"))?;
        Ok(os.state())
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        Self::identify(ctx, runner)?;
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelinuxStatus {
    Unknown,
    NotInstalled,
    Installed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelinuxMode {
    Unknown,
    Enforcing,
    Permissive,
    Disabled,
}

/// Package format of the distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Rpm,
    Deb,
}

/// Whether `cmd` is on the target's `PATH`.
///
/// A non-zero exit means not found; failing to run at all is an error.
pub fn has_command(ctx: &ApplyContext, runner: &dyn Runner, cmd: &str) -> Result<bool, RunError> {
    let check = format!("command -v -- {} >/dev/null 2>&1", shell_quote(cmd));
    match runner.run_command(ctx, &check, None) {
        Ok(_) => Ok(true),
        Err(e) if e.is_exit() => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_selinux_mode(ctx: &ApplyContext, runner: &dyn Runner, mode: &str) -> Result<bool, RunError> {
    let cmd = format!("sestatus | grep 'Current mode' | grep {mode}");
    match runner.run_command(ctx, &cmd, None) {
        Ok(_) => Ok(true),
        Err(e) if e.exit_code() == Some(1) => Ok(false),
        Err(e) => Err(e),
    }
}

/// SELinux installation status and mode.
///
/// `selinuxenabled` exits 1 when SELinux is disabled; otherwise `sestatus`
/// tells permissive from enforcing.
pub fn selinux_status(
    ctx: &ApplyContext,
    runner: &dyn Runner,
) -> Result<(SelinuxStatus, SelinuxMode), RunError> {
    const CMD: &str = "selinuxenabled";

    if !has_command(ctx, runner, CMD)? {
        return Ok((SelinuxStatus::NotInstalled, SelinuxMode::Unknown));
    }
    match runner.run_command(ctx, CMD, None) {
        Ok(_) => {
            if is_selinux_mode(ctx, runner, "permissive")? {
                Ok((SelinuxStatus::Installed, SelinuxMode::Permissive))
            } else if is_selinux_mode(ctx, runner, "enforcing")? {
                Ok((SelinuxStatus::Installed, SelinuxMode::Enforcing))
            } else {
                Ok((SelinuxStatus::Installed, SelinuxMode::Unknown))
            }
        }
        Err(e) if e.exit_code() == Some(1) => Ok((SelinuxStatus::Installed, SelinuxMode::Disabled)),
        Err(e) => Err(e),
    }
}

/// Whether PID 1 runs inside a docker container
pub fn is_in_container_vm(ctx: &ApplyContext, runner: &dyn Runner) -> Result<bool, RunError> {
    let environ = runner.run_command(ctx, "cat /proc/1/environ", None)?;
    Ok(environ.contains("container=docker"))
}

/// Package format, from `ID` and `ID_LIKE` in `/etc/os-release`
pub fn package_type(ctx: &ApplyContext, runner: &dyn Runner) -> Result<PackageType, Error> {
    const CMD: &str = "cat /etc/os-release";
    let release = runner
        .run_command(ctx, CMD, None)
        .map_err(|e| Error::command(CMD, e))?;

    let ids: Vec<&str> = ["ID", "ID_LIKE"]
        .iter()
        .filter_map(|key| keyval(&release, key))
        .flat_map(|v| v.trim_matches('"').split_whitespace())
        .collect();
    for id in &ids {
        match *id {
            "rhel" | "centos" | "fedora" | "amzn" => return Ok(PackageType::Rpm),
            "debian" | "ubuntu" => return Ok(PackageType::Deb),
            _ => {}
        }
    }
    Err(Error::UnsupportedOs(ids.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::runner::MockRunner;

    const CENTOS_RELEASE: &str = "NAME=\"CentOS Linux\"\nVERSION=\"7 (Core)\"\nID=\"centos\"\nID_LIKE=\"rhel fedora\"\n";
    const UBUNTU_RELEASE: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";

    #[test]
    fn test_fact_commands_fall_back() {
        assert_eq!(
            MACHINE_ID.command(),
            "cat /etc/machine-id 2>/dev/null || cat /var/lib/dbus/machine-id 2>/dev/null"
        );
    }

    #[test]
    fn test_identify() {
        let mock = MockRunner::new();
        mock.on("machine-id 2>/dev/null || cat /var", "0b1c6b2ab2b94b1a\n")
            .on("product_uuid", "EC2E1E55-0A5B-4A2E\n");

        let ctx = ApplyContext::new();
        let os = Os::identify(&ctx, &mock).unwrap();
        assert_eq!(os.machine_id, "0b1c6b2ab2b94b1a");
        assert_eq!(os.system_uuid, "EC2E1E55-0A5B-4A2E");

        let state = os.query_state(&ctx, &mock).unwrap();
        assert_eq!(state.string("MachineID"), "0b1c6b2ab2b94b1a");
        assert!(!os.apply(&ctx, &mock, &Diff::empty()).unwrap());
    }

    #[test]
    fn test_blank_fact_is_an_error() {
        let mock = MockRunner::new();
        mock.on("cat /etc/machine-id", "  \n");
        let err = Os::identify(&ApplyContext::new(), &mock).unwrap_err();
        assert_eq!(err.to_string(), "MachineID is blank");
    }

    #[test]
    fn test_has_command() {
        let mock = MockRunner::new();
        mock.fail("'kubeadm'", 1, "")
            .unreachable("'kubectl'", "connection reset");
        let ctx = ApplyContext::new();

        assert!(has_command(&ctx, &mock, "docker").unwrap());
        assert!(!has_command(&ctx, &mock, "kubeadm").unwrap());
        assert!(has_command(&ctx, &mock, "kubectl").is_err());
        assert_eq!(mock.commands()[0], "command -v -- 'docker' >/dev/null 2>&1");
    }

    #[test]
    fn test_selinux_status() {
        let ctx = ApplyContext::new();

        let absent = MockRunner::new();
        absent.fail("command -v", 1, "");
        assert_eq!(
            selinux_status(&ctx, &absent).unwrap(),
            (SelinuxStatus::NotInstalled, SelinuxMode::Unknown)
        );

        // `command -v` must match before the bare `selinuxenabled` rule
        let disabled = MockRunner::new();
        disabled.on("command -v", "").fail("selinuxenabled", 1, "");
        assert_eq!(
            selinux_status(&ctx, &disabled).unwrap(),
            (SelinuxStatus::Installed, SelinuxMode::Disabled)
        );

        let enforcing = MockRunner::new();
        enforcing.fail("grep permissive", 1, "");
        assert_eq!(
            selinux_status(&ctx, &enforcing).unwrap(),
            (SelinuxStatus::Installed, SelinuxMode::Enforcing)
        );
    }

    #[test]
    fn test_container_detection() {
        let mock = MockRunner::new();
        mock.on("/proc/1/environ", "PATH=/usr/bin\0container=docker\0");
        assert!(is_in_container_vm(&ApplyContext::new(), &mock).unwrap());
    }

    #[test]
    fn test_package_type() {
        let ctx = ApplyContext::new();
        let centos = MockRunner::new();
        centos.on("os-release", CENTOS_RELEASE);
        assert_eq!(package_type(&ctx, &centos).unwrap(), PackageType::Rpm);

        let ubuntu = MockRunner::new();
        ubuntu.on("os-release", UBUNTU_RELEASE);
        assert_eq!(package_type(&ctx, &ubuntu).unwrap(), PackageType::Deb);

        let alpine = MockRunner::new();
        alpine.on("os-release", "ID=alpine\n");
        assert!(matches!(
            package_type(&ctx, &alpine),
            Err(Error::UnsupportedOs(id)) if id == "alpine"
        ));
    }
}
