//! Cluster configuration, read from `wksctl.toml`.
//!
//! ```toml
//! [ssh]
//! user = "centos"
//! host = "10.0.0.1"
//! key = "~/.ssh/id_rsa"
//!
//! [cluster]
//! kubernetes_version = "1.16.3"
//! pkg_type = "auto"
//!
//! [cluster.runtime]
//! kind = "docker"
//! version = "19.03.5"
//!
//! [[files]]
//! destination = "/etc/docker/daemon.json"
//! source = "./daemon.json"
//!
//! [[manifests]]
//! url = "https://cloud.weave.works/k8s/net"
//! namespace = "kube-system"
//! ```

use anyhow::{Context, Result, bail};
use resources::{File, KubectlApply};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config path used when neither `--config` nor `WKSCTL_CONFIG` is given
pub const DEFAULT_CONFIG: &str = "wksctl.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Required unless running with `--local`
    pub ssh: Option<SshConfig>,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub files: Vec<FileConfig>,
    #[serde(default)]
    pub manifests: Vec<ManifestConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    pub user: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key, `~` is expanded
    pub key: Option<String>,
    /// Run every command through `sudo`
    #[serde(default = "default_true")]
    pub sudo: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PkgType {
    /// Detected from `/etc/os-release` on the target
    #[default]
    Auto,
    Rpm,
    /// RPM based, plus the CentOS `container-selinux` package
    Rhel,
    Deb,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub kubernetes_version: String,
    #[serde(default)]
    pub pkg_type: PkgType,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub control_plane_endpoint: String,
    #[serde(default)]
    pub ignore_preflight_errors: Vec<String>,
    #[serde(default = "default_true")]
    pub use_iptables: bool,
    #[serde(default)]
    pub disable_swap: bool,
    /// Pre-rendered kubeadm configuration used instead of the generated one
    pub kubeadm_config: Option<PathBuf>,
}

impl ClusterConfig {
    /// Address kubelet advertises: the private IP, else the public one
    pub fn node_ip(&self) -> &str {
        if self.private_ip.is_empty() {
            &self.public_ip
        } else {
            &self.private_ip
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub kind: RuntimeKind,
    /// Package name; `docker-ce` for RPM and `docker.io` for Deb when unset
    pub package: Option<String>,
    pub version: Option<String>,
}

/// A file copied to the target, with either inline `content` or a local
/// `source`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub destination: String,
    pub content: Option<String>,
    pub source: Option<PathBuf>,
}

/// A manifest applied once the cluster is up
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub namespace: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.kubernetes_version.trim().is_empty() {
            bail!("cluster.kubernetes_version must not be empty");
        }
        for file in &self.files {
            if file.content.is_some() == file.source.is_some() {
                bail!(
                    "file {} needs exactly one of content or source",
                    file.destination
                );
            }
        }
        for (idx, manifest) in self.manifests.iter().enumerate() {
            if manifest.path.is_some() == manifest.url.is_some() {
                bail!("manifest #{idx} needs exactly one of path or url");
            }
        }
        Ok(())
    }

    /// Load `path`, falling back to `~/.config/wksctl/wksctl.toml` when the
    /// default path does not exist in the working directory
    pub fn load_or_user(path: &Path) -> Result<Self> {
        if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
            if let Some(user) = user_config_path().filter(|p| p.exists()) {
                return Self::load(&user);
            }
        }
        Self::load(path)
    }

    /// SSH settings, required when not running locally
    pub fn ssh(&self) -> Result<&SshConfig> {
        self.ssh
            .as_ref()
            .context("No [ssh] table in config; use --local to run on this machine")
    }

    /// File resources for `[[files]]`, reading local sources
    pub fn file_resources(&self) -> Result<Vec<File>> {
        self.files
            .iter()
            .map(|f| match (&f.content, &f.source) {
                (Some(content), _) => Ok(File::with_content(&f.destination, content)),
                (None, Some(source)) => {
                    let source = expand_path(&source.to_string_lossy());
                    File::from_source(&f.destination, source.to_string_lossy())
                        .with_context(|| format!("file {}", f.destination))
                }
                (None, None) => bail!("file {} has no content", f.destination),
            })
            .collect()
    }

    /// KubectlApply resources for `[[manifests]]`
    pub fn manifest_resources(&self) -> Vec<KubectlApply> {
        self.manifests
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                let mut apply = match (&m.url, &m.path) {
                    (Some(url), _) => KubectlApply::from_url(url),
                    (None, path) => KubectlApply::from_path(
                        path.as_deref()
                            .map(|p| expand_path(&p.to_string_lossy()))
                            .unwrap_or_default()
                            .to_string_lossy(),
                    ),
                };
                apply.filename = format!("manifest-{idx:02}-");
                if let Some(ns) = &m.namespace {
                    apply.namespace.clone_from(ns);
                }
                apply
            })
            .collect()
    }

    /// Contents of `cluster.kubeadm_config`, empty when unset
    pub fn kubeadm_config(&self) -> Result<String> {
        let Some(path) = &self.cluster.kubeadm_config else {
            return Ok(String::new());
        };
        let path = expand_path(&path.to_string_lossy());
        fs::read_to_string(&path).with_context(|| format!("Could not read {}", path.display()))
    }
}

impl SshConfig {
    pub fn key_path(&self) -> Option<PathBuf> {
        self.key.as_deref().map(expand_path)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wksctl").join(DEFAULT_CONFIG))
}

/// Expand a leading `~`
fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
