//! Manifests applied with kubectl.

use crate::catalog::ResourceType;
use crate::error::Error;
use crate::script::{without_proxy, write_file};
use anyhow::{Context as _, Result};
use log::{debug, error};
use plan::runner::shell_quote;
use plan::{ApplyContext, Diff, Resource, Runner, State, to_state};
use serde::{Deserialize, Serialize};
use std::fs;
use std::thread;
use std::time::Duration;

const MANIFEST_MODE: u32 = 0o660;
const MAX_MANIFEST_SIZE: u64 = 16 * 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `kubectl apply` of one manifest.
///
/// Realises no state, so every apply applies the manifest again. Content
/// comes from the first of `manifest`, `opaque_manifest`, `manifest_url`
/// and `manifest_path` that is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubectlApply {
    /// Prefix of the remote temp file name
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest_path: String,
    #[serde(rename = "manifestURL", default, skip_serializing_if = "String::is_empty")]
    pub manifest_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// `kubectl wait --for` condition checked after applying, e.g.
    /// `condition=established` for CRDs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wait_condition: String,
    /// Like `manifest`, but kept out of serialized plans
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub opaque_manifest: String,
}

impl KubectlApply {
    pub fn from_manifest(filename: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            manifest: manifest.into(),
            ..Self::default()
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            manifest_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            manifest_url: url.into(),
            ..Self::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn waiting_for(mut self, condition: impl Into<String>) -> Self {
        self.wait_condition = condition.into();
        self
    }

    fn content(&self) -> Result<Vec<u8>, Error> {
        if !self.manifest.is_empty() {
            return Ok(self.manifest.clone().into_bytes());
        }
        if !self.opaque_manifest.is_empty() {
            return Ok(self.opaque_manifest.clone().into_bytes());
        }
        if !self.manifest_url.is_empty() {
            return fetch(&self.manifest_url);
        }
        if !self.manifest_path.is_empty() {
            return fs::read(&self.manifest_path).map_err(|e| Error::io(&self.manifest_path, e));
        }
        Err(Error::NoContent)
    }
}

fn fetch(url: &str) -> Result<Vec<u8>, Error> {
    let http = |message: String| Error::Http {
        url: url.to_string(),
        message,
    };
    let agent = ureq::Agent::new_with_defaults();
    let mut response = agent
        .get(url)
        .header("User-Agent", "wksctl")
        .call()
        .map_err(|e| http(e.to_string()))?;
    response
        .body_mut()
        .with_config()
        .limit(MAX_MANIFEST_SIZE)
        .read_to_vec()
        .map_err(|e| http(e.to_string()))
}

impl Resource for KubectlApply {
    fn type_name(&self) -> &'static str {
        ResourceType::KubectlApply.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &["opaqueManifest"]
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        let content = self.content()?;
        run_kubectl_apply(
            ctx,
            runner,
            &KubectlApplyArgs {
                content: &content,
                namespace: &self.namespace,
                wait_condition: &self.wait_condition,
            },
            &self.filename,
        )?;
        Ok(true)
    }
}

/// Inputs of [`run_kubectl_apply`]
#[derive(Debug, Clone, Copy, Default)]
pub struct KubectlApplyArgs<'a> {
    /// Manifest to apply, must not be empty
    pub content: &'a [u8],
    pub namespace: &'a str,
    /// `kubectl wait --for` condition, skipped when empty
    pub wait_condition: &'a str,
}

fn write_temp_file(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    content: &[u8],
    fname: &str,
) -> Result<String> {
    let mktemp = format!("mktemp -t {}", shell_quote(&format!("{fname}XXXXXXXXXX")));
    let path = runner
        .run_command(ctx, &mktemp, None)
        .map_err(|e| Error::command(&mktemp, e))
        .context("mktemp")?
        .trim()
        .to_string();

    if let Err(e) = write_file(ctx, runner, content, &path, MANIFEST_MODE) {
        if let Err(rm) = runner.run_command(ctx, &format!("rm -vf {}", shell_quote(&path)), None) {
            error!("failed to clean up the temp file {path}: {rm}");
        }
        return Err(anyhow::Error::new(e).context("write manifest"));
    }
    Ok(path)
}

/// Upload `args.content` to a temp file on the target, `kubectl apply` it,
/// and optionally wait for a condition. The temp file is always removed.
pub fn run_kubectl_apply(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    args: &KubectlApplyArgs<'_>,
    fname: &str,
) -> Result<()> {
    let path = write_temp_file(ctx, runner, args.content, fname)?;
    let result = apply_and_wait(ctx, runner, args, &path);
    if let Err(e) = runner.run_command(ctx, &format!("rm -vf {}", shell_quote(&path)), None) {
        debug!("failed to remove {path}: {e}");
    }
    result
}

fn apply_and_wait(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    args: &KubectlApplyArgs<'_>,
    path: &str,
) -> Result<()> {
    let quoted = shell_quote(path);
    let mut apply = format!("kubectl apply -f {quoted}");
    if !args.namespace.is_empty() {
        apply.push_str(&format!(" --namespace={}", shell_quote(args.namespace)));
    }
    runner
        .run_command(ctx, &without_proxy(&apply), None)
        .map_err(|e| {
            debug!("failed to apply Kubernetes manifest {path}: {}", e.output());
            Error::command(&apply, e)
        })
        .context("kubectl apply")?;

    if !args.wait_condition.is_empty() {
        let wait = format!(
            "kubectl wait --for={} -f {quoted}",
            shell_quote(args.wait_condition)
        );
        runner
            .run_command(ctx, &without_proxy(&wait), None)
            .map_err(|e| Error::command(&wait, e))
            .context("kubectl wait")?;
    }
    Ok(())
}

/// Waits for Kubernetes objects to exist and then to reach a condition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubectlWait {
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "typeWaitedFor")]
    pub wait_type: String,
    /// Label selector; every object of the type when empty
    #[serde(rename = "itemsWaitedFor", default)]
    pub selector: String,
    #[serde(rename = "waitFor")]
    pub condition: String,
    /// kubectl's own default applies when empty
    #[serde(rename = "waitTimeout", default)]
    pub timeout: String,
}

impl KubectlWait {
    fn flags(&self, timeout: bool) -> String {
        let mut flags = String::new();
        if !self.selector.is_empty() {
            flags.push_str(&format!(" --selector={}", shell_quote(&self.selector)));
        }
        if timeout && !self.timeout.is_empty() {
            flags.push_str(&format!(" --timeout={}", shell_quote(&self.timeout)));
        }
        if !self.namespace.is_empty() {
            flags.push_str(&format!(" --namespace={}", shell_quote(&self.namespace)));
        }
        flags
    }

    /// Polls until `kubectl get` finds the objects. The wait timeout only
    /// starts once they exist.
    fn wait_for_objects(&self, ctx: &ApplyContext, runner: &dyn Runner) -> Result<()> {
        let get = without_proxy(&format!(
            "kubectl get {}{}",
            shell_quote(&self.wait_type),
            self.flags(false)
        ));
        loop {
            ctx.check_cancelled()?;
            match runner.run_command(ctx, &get, None) {
                Ok(output) if !output.contains("No resources found") => return Ok(()),
                Ok(_) => debug!("no {} found yet", self.wait_type),
                Err(e) => debug!("kubectl get {}: {e}", self.wait_type),
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Resource for KubectlWait {
    fn type_name(&self) -> &'static str {
        ResourceType::KubectlWait.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        self.wait_for_objects(ctx, runner)?;
        let wait = format!(
            "kubectl wait {} --for={}{}",
            shell_quote(&self.wait_type),
            shell_quote(&self.condition),
            self.flags(true)
        );
        runner
            .run_command(ctx, &without_proxy(&wait), None)
            .map_err(|e| Error::command(&wait, e))
            .context("kubectl wait")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::CancelToken;
    use plan::runner::MockRunner;
    use std::io::Write as _;

    const TMP: &str = "/tmp/weave-netAbCdEfGhIj";

    #[test]
    fn test_apply_inline_manifest() {
        let ka = KubectlApply::from_manifest("weave-net", "kind: DaemonSet\n")
            .in_namespace("kube-system")
            .waiting_for("condition=established");
        let mock = MockRunner::new();
        mock.on("mktemp", &format!("{TMP}\n"));

        assert!(ka.apply(&ApplyContext::new(), &mock, &Diff::empty()).unwrap());

        let invocations = mock.invocations();
        assert_eq!(invocations[0].command, "mktemp -t 'weave-netXXXXXXXXXX'");
        assert!(invocations[1].command.contains(&format!("w {TMP}")));
        assert_eq!(invocations[1].stdin.as_deref(), Some("kind: DaemonSet\n"));
        assert!(invocations[2].command.contains(&format!(
            "kubectl apply -f '{TMP}' --namespace='kube-system'"
        )));
        assert!(invocations[2].command.starts_with("( unset http_proxy"));
        assert!(invocations[3].command.contains(&format!(
            "kubectl wait --for='condition=established' -f '{TMP}'"
        )));
        assert_eq!(invocations[4].command, format!("rm -vf '{TMP}'"));
        assert_eq!(invocations.len(), 5);
    }

    #[test]
    fn test_failed_apply_still_removes_temp_file() {
        let mock = MockRunner::new();
        mock.on("mktemp", TMP)
            .fail("kubectl apply", 1, "error: unable to recognize");

        let err = KubectlApply::from_manifest("weave-net", "bogus")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap_err();
        assert!(format!("{err:#}").contains("unable to recognize"));
        assert_eq!(mock.commands().last().unwrap(), &format!("rm -vf '{TMP}'"));
        assert_eq!(mock.count("kubectl wait"), 0);
    }

    #[test]
    fn test_failed_upload_removes_temp_file() {
        let mock = MockRunner::new();
        mock.on("mktemp", TMP).fail("sed -n", 4, "No space left on device");

        let err = KubectlApply::from_manifest("weave-net", "kind: Pod\n")
            .apply(&ApplyContext::new(), &mock, &Diff::empty())
            .unwrap_err();
        assert!(format!("{err:#}").contains("No space left on device"));
        assert_eq!(mock.count("rm -vf"), 1);
        assert_eq!(mock.count("kubectl apply"), 0);
    }

    #[test]
    fn test_content_sources() {
        let mut local = tempfile::NamedTempFile::new().unwrap();
        local.write_all(b"kind: ConfigMap\n").unwrap();
        let path = local.path().to_string_lossy().to_string();
        assert_eq!(KubectlApply::from_path(&path).content().unwrap(), b"kind: ConfigMap\n");

        let opaque = KubectlApply {
            opaque_manifest: "kind: Secret\n".into(),
            manifest_path: path,
            ..KubectlApply::default()
        };
        assert_eq!(opaque.content().unwrap(), b"kind: Secret\n");

        assert!(matches!(KubectlApply::default().content(), Err(Error::NoContent)));
        assert!(matches!(
            KubectlApply::from_path("/nonexistent/manifest.yaml").content(),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_opaque_manifest_is_hidden() {
        let ka = KubectlApply {
            filename: "secret".into(),
            opaque_manifest: "data: c2VjcmV0".into(),
            ..KubectlApply::default()
        };
        let visible = plan::visible_state(&ka);
        assert!(!visible.contains("opaqueManifest"));
        assert_eq!(visible.string("filename"), "secret");
    }

    fn wait() -> KubectlWait {
        KubectlWait {
            namespace: "weavek8sops".into(),
            wait_type: "pods".into(),
            selector: "name=flux".into(),
            condition: "condition=Ready".into(),
            timeout: "300s".into(),
        }
    }

    #[test]
    fn test_wait_polls_until_objects_exist() {
        let mock = MockRunner::new();
        mock.on_once("kubectl get", "No resources found in weavek8sops namespace.\n");

        assert!(wait().apply(&ApplyContext::new(), &mock, &Diff::empty()).unwrap());
        assert_eq!(mock.count("kubectl get"), 2);
        let commands = mock.commands();
        assert!(commands[0].contains(
            "kubectl get 'pods' --selector='name=flux' --namespace='weavek8sops'"
        ));
        assert!(commands[2].contains(
            "kubectl wait 'pods' --for='condition=Ready' --selector='name=flux' \
             --timeout='300s' --namespace='weavek8sops'"
        ));
    }

    #[test]
    fn test_wait_stops_when_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mock = MockRunner::new();

        let err = wait()
            .apply(&ApplyContext::with_cancel(cancel), &mock, &Diff::empty())
            .unwrap_err();
        assert!(err.to_string().contains("cancel"));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_wait_serialized_names() {
        let state = wait().state();
        assert_eq!(state.string("typeWaitedFor"), "pods");
        assert_eq!(state.string("itemsWaitedFor"), "name=flux");
        assert_eq!(state.string("waitFor"), "condition=Ready");
        assert_eq!(state.string("waitTimeout"), "300s");
    }
}
