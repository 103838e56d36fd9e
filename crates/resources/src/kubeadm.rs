//! Cluster bootstrap through kubeadm.
//!
//! [`KubeadmInit`] turns the first machine into a control plane and reads
//! the join parameters back out of `kubeadm init`'s output. [`KubeadmJoin`]
//! adds further machines using those parameters.

use crate::catalog::ResourceType;
use crate::dir::Dir;
use crate::error::Error;
use crate::file::File;
use crate::parsing::version_less_than;
use crate::run::Run;
use crate::script::{remove_file, without_proxy, write_file};
use anyhow::{Context as _, Result};
use log::{debug, info, warn};
use plan::{
    ApplyContext, Builder, Diff, Output, ParamString, Plan, Resource, Runner, State, to_state,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::LazyLock;

const CONFIG_PATH: &str = "/tmp/wks_kubeadm_init_config.yaml";
const CONFIG_MODE: u32 = 0o660;

/// First version where the control plane flags lost their `experimental-`
/// prefix
const STABLE_CONTROL_PLANE: &str = "1.16.0";

const STATIC_POD_MANIFESTS: &[&str] = &[
    "kube-apiserver.yaml",
    "kube-controller-manager.yaml",
    "kube-scheduler.yaml",
    "etcd.yaml",
];

/// Join parameters read from `kubeadm init`, filled once it has run
#[derive(Debug, Clone, Default)]
pub struct JoinOutputs {
    pub command: Output,
    pub ca_cert_hash: Output,
    /// Empty when init printed no certificate key
    pub certificate_key: Output,
}

/// `kubeadm init` on the first control plane node.
///
/// Not idempotent: every apply resets the node first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmInit {
    #[serde(rename = "publicIP")]
    pub public_ip: String,
    #[serde(rename = "privateIP")]
    pub private_ip: String,
    pub kubernetes_version: String,
    #[serde(default)]
    pub control_plane_endpoint: String,
    #[serde(default)]
    pub ignore_preflight_errors: Vec<String>,
    #[serde(rename = "useIPTables", default)]
    pub use_iptables: bool,
    /// Pre-rendered kubeadm configuration; generated when empty
    #[serde(default)]
    pub config: String,
    #[serde(skip)]
    pub join: JoinOutputs,
}

impl KubeadmInit {
    /// The kubeadm configuration to upload
    pub fn kubeadm_config(&self) -> String {
        if !self.config.is_empty() {
            return self.config.clone();
        }
        let mut yaml = String::from(
            "apiVersion: kubeadm.k8s.io/v1beta1\nkind: ClusterConfiguration\n",
        );
        let _ = writeln!(yaml, "kubernetesVersion: {}", self.kubernetes_version);
        if !self.control_plane_endpoint.is_empty() {
            let _ = writeln!(yaml, "controlPlaneEndpoint: {}", self.control_plane_endpoint);
        }
        let sans: Vec<&str> = [self.public_ip.as_str(), self.private_ip.as_str()]
            .into_iter()
            .filter(|ip| !ip.is_empty())
            .collect();
        if !sans.is_empty() {
            yaml.push_str("apiServer:\n  certSANs:\n");
            for san in sans {
                let _ = writeln!(yaml, "  - {san}");
            }
        }
        yaml
    }

    fn upload_certs_flag(&self) -> &'static str {
        if version_less_than(&self.kubernetes_version, STABLE_CONTROL_PLANE) {
            "--experimental-upload-certs"
        } else {
            "--upload-certs"
        }
    }

    /// Steps of an init. `init_output` receives the output of
    /// `kubeadm init` itself.
    fn init_plan(&self, init_output: Output) -> plan::Result<Plan> {
        let mut b = Builder::with_id(&["kubeadm", "init"]);
        if self.use_iptables {
            b.add_resource(
                "configure:iptables",
                Run::new("sysctl net.bridge.bridge-nf-call-iptables=1"),
                &[],
            );
        }

        let init = format!(
            "kubeadm init --config={CONFIG_PATH} --ignore-preflight-errors={} {}",
            self.ignore_preflight_errors.join(","),
            self.upload_certs_flag()
        );
        b.add_resource("kubeadm:reset", Run::new("kubeadm reset --force"), &[])
            .add_resource(
                "kubeadm:config:images",
                Run::new(format!("kubeadm config images pull --config={CONFIG_PATH}")),
                &["kubeadm:reset"],
            )
            .add_resource(
                "kubeadm:run-init",
                Run::new(without_proxy(&init))
                    .with_undo_resource(run_init_undo_plan()?)
                    .with_output(init_output),
                &["kubeadm:config:images"],
            );

        let home = Output::new();
        b.add_resource(
            "kubeadm:get-homedir",
            Run::new("echo -n $HOME").with_output(home.clone()),
            &[],
        )
        .add_resource(
            "kubeadm:config:kubectl-dir",
            Dir::new(ParamString::template("{}/.kube", vec![home.clone()])),
            &["kubeadm:get-homedir"],
        )
        .add_resource(
            "kubeadm:config:copy",
            Run::new(ParamString::template(
                "cp /etc/kubernetes/admin.conf {}/.kube/config",
                vec![home.clone()],
            )),
            &["kubeadm:run-init", "kubeadm:config:kubectl-dir"],
        )
        .add_resource(
            "kubeadm:config:set-ownership",
            Run::new(ParamString::template(
                "chown -R $(id -u):$(id -g) {}/.kube",
                vec![home],
            )),
            &["kubeadm:config:copy"],
        );
        b.plan()
    }

    fn record_join(&self, init_output: &str) -> Result<(), Error> {
        let command = extract_join_command(init_output)?;
        debug!("{command}");
        let ca_cert_hash = extract_ca_cert_hash(&command)
            .ok_or(Error::JoinFlagNotFound("discovery token CA cert hash"))?;
        let certificate_key = extract_certificate_key(&command).unwrap_or_default();

        self.join.ca_cert_hash.set(ca_cert_hash);
        self.join.certificate_key.set(certificate_key);
        self.join.command.set(command);
        Ok(())
    }
}

/// Removes what `kubeadm init` leaves behind
fn run_init_undo_plan() -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["kubeadm", "init", "undo"]);
    for manifest in STATIC_POD_MANIFESTS {
        b.add_resource(
            format!("file:{manifest}"),
            File::at(format!("/etc/kubernetes/manifests/{manifest}")),
            &[],
        );
    }
    b.add_resource("dir:etcd", Dir::new("/var/lib/etcd").recursive(), &[]);
    b.plan()
}

impl Resource for KubeadmInit {
    fn type_name(&self) -> &'static str {
        ResourceType::KubeadmInit.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &["config"]
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        info!("initializing Kubernetes cluster");

        let config = self.kubeadm_config();
        write_file(ctx, runner, config.as_bytes(), CONFIG_PATH, CONFIG_MODE)
            .context("failed to upload kubeadm's configuration")?;
        debug!("uploaded kubeadm's configuration:\n{config}");

        let init_output = Output::new();
        let result = self
            .init_plan(init_output.clone())
            .map_err(anyhow::Error::from)
            .and_then(|p| p.apply(ctx, runner, &Diff::empty()));
        if let Err(e) = remove_file(ctx, runner, CONFIG_PATH) {
            warn!("{e}");
        }
        result.context("failed to initialize Kubernetes cluster with kubeadm")?;

        self.record_join(&init_output.get())?;
        Ok(true)
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, _current: &State) -> Result<()> {
        self.init_plan(Output::new())?
            .undo(ctx, runner, &State::empty())
    }
}

/// `kubeadm join` on every other node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmJoin {
    #[serde(default)]
    pub is_master: bool,
    #[serde(rename = "nodeIP", default)]
    pub node_ip: String,
    #[serde(default)]
    pub node_name: String,
    /// Hidden: it changes between control plane nodes without the node
    /// plan changing
    #[serde(rename = "masterIP", default)]
    pub master_ip: String,
    pub master_port: u16,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub discovery_token_ca_cert_hash: String,
    #[serde(default)]
    pub certificate_key: String,
    #[serde(default)]
    pub ignore_preflight_errors: Vec<String>,
    /// Used instead of the master's address when set
    #[serde(default)]
    pub external_load_balancer: String,
    #[serde(default)]
    pub version: String,
}

impl KubeadmJoin {
    fn api_server_endpoint(&self) -> String {
        let host = if self.external_load_balancer.is_empty() {
            &self.master_ip
        } else {
            &self.external_load_balancer
        };
        format!("{host}:{}", self.master_port)
    }

    /// The join command, without proxy handling
    pub fn join_command(&self) -> String {
        let mut cmd = String::from("kubeadm join");
        if !self.ignore_preflight_errors.is_empty() {
            let _ = write!(
                cmd,
                " --ignore-preflight-errors={}",
                self.ignore_preflight_errors.join(",")
            );
        }
        if self.is_master {
            let flag = if version_less_than(&self.version, STABLE_CONTROL_PLANE) {
                "--experimental-control-plane"
            } else {
                "--control-plane"
            };
            let _ = write!(cmd, " {flag} --certificate-key {}", self.certificate_key);
        }
        let _ = write!(
            cmd,
            " --node-name={} --token {} --discovery-token-ca-cert-hash {} {}",
            self.node_name,
            self.token,
            self.discovery_token_ca_cert_hash,
            self.api_server_endpoint()
        );
        cmd
    }
}

impl Resource for KubeadmJoin {
    fn type_name(&self) -> &'static str {
        ResourceType::KubeadmJoin.name()
    }

    fn state(&self) -> State {
        to_state(self)
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &[
            "masterIP",
            "token",
            "discoveryTokenCaCertHash",
            "certificateKey",
        ]
    }

    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        info!("joining Kubernetes cluster");
        let cmd = without_proxy(&self.join_command());
        if let Err(e) = runner.run_command(ctx, &cmd, None) {
            debug!("failed to join cluster: {}", e.output());
            // the command line carries the token
            return Err(anyhow::Error::new(e).context("failed to join cluster"));
        }
        Ok(true)
    }

    fn undo(&self, _ctx: &ApplyContext, _runner: &dyn Runner, _current: &State) -> Result<()> {
        Err(Error::UndoUnsupported(ResourceType::KubeadmJoin.name()).into())
    }
}

/// The `kubeadm join` command printed by `kubeadm init`, with backslash
/// line continuations joined into one line
pub fn extract_join_command(init_output: &str) -> Result<String, Error> {
    let mut parts: Vec<&str> = Vec::new();
    let mut within = false;
    for line in init_output.lines() {
        if !within && !line.contains("kubeadm join") {
            continue;
        }
        within = true;
        parts.push(line.trim_end_matches('\\').trim());
        if !line.ends_with('\\') {
            break;
        }
    }
    if parts.is_empty() {
        return Err(Error::JoinCommandNotFound);
    }
    Ok(parts.join(" "))
}

/// `--flag value` or `--flag=value`. `None` only if the pattern fails to
/// compile, which the tests rule out.
static CA_CERT_HASH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"--discovery-token-ca-cert-hash(?:=|\s+)(\S+)").ok());
static CERTIFICATE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"--certificate-key(?:=|\s+)(\S+)").ok());

fn flag_value(re: &LazyLock<Option<Regex>>, join_command: &str) -> Option<String> {
    re.as_ref()?
        .captures(join_command)
        .map(|c| c[1].to_string())
}

/// Value of `--discovery-token-ca-cert-hash`, in either flag form
pub fn extract_ca_cert_hash(join_command: &str) -> Option<String> {
    flag_value(&CA_CERT_HASH, join_command)
}

/// Value of `--certificate-key`, in either flag form
pub fn extract_certificate_key(join_command: &str) -> Option<String> {
    flag_value(&CERTIFICATE_KEY, join_command)
}
