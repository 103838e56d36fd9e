//! Node plans built from the cluster configuration.
//!
//! Each stage is its own plan, nested in the node plan so failures report
//! which stage broke.

use crate::config::{ClusterConfig, PkgType, RuntimeConfig, RuntimeKind};
use anyhow::{Context as _, Result};
use plan::{ApplyContext, Builder, Plan, Runner};
use resources::os::{self, PackageType};
use resources::parsing::version_less_than;
use resources::script::without_proxy;
use resources::{Deb, Dir, File, KubeadmInit, KubectlApply, Rpm, Run, Service};

/// Package format the recipes install with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packages {
    Rpm,
    /// RPM, plus CentOS extras Docker needs on RHEL
    Rhel,
    Deb,
}

/// Settle `auto` by asking the target
pub fn resolve_packages(
    configured: PkgType,
    ctx: &ApplyContext,
    runner: &dyn Runner,
) -> Result<Packages> {
    Ok(match configured {
        PkgType::Rpm => Packages::Rpm,
        PkgType::Rhel => Packages::Rhel,
        PkgType::Deb => Packages::Deb,
        PkgType::Auto => match os::package_type(ctx, runner)
            .context("Could not detect the target's package format")?
        {
            PackageType::Rpm => Packages::Rpm,
            PackageType::Deb => Packages::Deb,
        },
    })
}

/// Everything a node plan is built from
#[derive(Debug)]
pub struct NodeRecipe<'a> {
    pub cluster: &'a ClusterConfig,
    pub packages: Packages,
    pub files: Vec<File>,
    pub manifests: Vec<KubectlApply>,
    /// Pre-rendered kubeadm configuration, empty to generate one
    pub kubeadm_config: String,
}

/// Base tooling. Never undone, other software may rely on it.
pub fn base_plan(packages: Packages) -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["base"]);
    match packages {
        Packages::Rpm | Packages::Rhel => {
            b.add_resource("install:yum-utils", Rpm::new("yum-utils"), &[])
                .add_resource(
                    "install:yum-versionlock",
                    Rpm::new("yum-plugin-versionlock"),
                    &[],
                )
                .add_resource(
                    "install:device-mapper-persistent-data",
                    Rpm::new("device-mapper-persistent-data"),
                    &[],
                )
                .add_resource("install:lvm2", Rpm::new("lvm2"), &[]);
        }
        Packages::Deb => {
            b.add_resource("install:gnupg", Deb::new("gnupg", ""), &[])
                .add_resource(
                    "install:thin-provisioning-tools",
                    Deb::new("thin-provisioning-tools", ""),
                    &[],
                )
                .add_resource("install:lvm2", Deb::new("lvm2", ""), &[]);
        }
    }
    b.set_undo_condition(|_, _| false);
    b.plan()
}

/// Configuration files, copied before anything that reads them is installed
pub fn config_plan(files: Vec<File>) -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["config"]);
    for (idx, file) in files.into_iter().enumerate() {
        b.add_resource(format!("install:config-file-{idx}"), file, &[]);
    }
    b.plan()
}

/// Container runtime. Docker is the only one supported.
pub fn cri_plan(runtime: &RuntimeConfig, packages: Packages) -> plan::Result<Plan> {
    let RuntimeKind::Docker = runtime.kind;
    let mut b = Builder::with_id(&["cri"]);
    let version = runtime.version.clone().unwrap_or_default();

    match packages {
        Packages::Rhel => {
            b.add_resource(
                "install:container-selinux",
                Run::new(
                    "yum install -y http://mirror.centos.org/centos/7/extras/x86_64/Packages/container-selinux-2.107-1.el7_6.noarch.rpm || true",
                )
                .with_undo_script("yum remove -y container-selinux || true"),
                &[],
            )
            .add_resource(
                "install:docker",
                Rpm::new(runtime.package.as_deref().unwrap_or("docker-ce")).with_version(version),
                &["install:container-selinux"],
            );
        }
        Packages::Rpm => {
            b.add_resource(
                "install:docker",
                Rpm::new(runtime.package.as_deref().unwrap_or("docker-ce")).with_version(version),
                &[],
            );
        }
        Packages::Deb => {
            let name = runtime.package.as_deref().unwrap_or("docker.io");
            let docker = if version.is_empty() {
                Deb::new(name, "")
            } else {
                Deb::pinned(name, &version)
            };
            b.add_resource("install:docker", docker, &[]);
        }
    }

    b.add_resource(
        "systemd:daemon-reload",
        Run::new("systemctl daemon-reload"),
        &["install:docker"],
    )
    .add_resource(
        "service-init:docker-service",
        Service::running("docker"),
        &["systemd:daemon-reload"],
    );
    b.plan()
}

/// kubelet, kubeadm and kubectl at the cluster's version, and a running
/// kubelet
pub fn k8s_plan(cluster: &ClusterConfig, packages: Packages) -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["k8s"]);
    let version = cluster.kubernetes_version.as_str();

    match packages {
        Packages::Rpm | Packages::Rhel => {
            let rpm = |name: &str| {
                Rpm::new(name)
                    .with_version(version)
                    .with_disable_excludes("kubernetes")
            };
            b.add_resource("install:kubelet", rpm("kubelet"), &[])
                .add_resource("install:kubectl", rpm("kubectl"), &[])
                .add_resource(
                    "install:kubeadm",
                    rpm("kubeadm"),
                    &["install:kubectl", "install:kubelet"],
                );
        }
        Packages::Deb => {
            let repo_line = "deb https://apt.kubernetes.io/ kubernetes-xenial main";
            let repo_file = "/etc/apt/sources.list.d/wks-google.list";
            b.add_resource(
                "configure:kubernetes-repo-key",
                Run::new(
                    "curl -fsSL https://packages.cloud.google.com/apt/doc/apt-key.gpg \
                     -o /etc/apt/trusted.gpg.d/cloud-google-com.gpg",
                ),
                &[],
            )
            .add_resource(
                "configure:kubernetes-repo",
                Run::new(format!("echo '{repo_line}' | tee -a '{repo_file}'")).with_undo_script(
                    format!("test ! -f '{repo_file}' || sed -i '\\!{repo_line}!d' '{repo_file}'"),
                ),
                &["configure:kubernetes-repo-key"],
            );
            let pinned = format!("{version}-00");
            for name in ["kubelet", "kubeadm", "kubectl"] {
                b.add_resource(
                    format!("install:{name}"),
                    Deb::pinned(name, &pinned),
                    &["configure:kubernetes-repo"],
                );
            }
        }
    }

    b.add_resource(
        "create-dir:kubelet.service.d",
        Dir::new("/etc/systemd/system/kubelet.service.d"),
        &[],
    );
    let mut kubelet_deps = vec!["create-dir:kubelet.service.d"];

    let mut args = format!("KUBELET_EXTRA_ARGS=--node-ip={}", cluster.node_ip());
    if cluster.disable_swap {
        b.add_resource(
            "configure:kubernetes-swap-disable",
            Run::new("/sbin/swapoff -a"),
            &["create-dir:kubelet.service.d"],
        );
        kubelet_deps.push("configure:kubernetes-swap-disable");
    } else {
        args = args.replacen("=--node-ip", "=--fail-swap-on=false --node-ip", 1);
    }
    let (id, destination) = match packages {
        Packages::Rpm | Packages::Rhel => ("configure:kubelet-sysconfig", "/etc/sysconfig/kubelet"),
        Packages::Deb => ("configure:kubelet-default", "/etc/default/kubelet"),
    };
    b.add_resource(
        id,
        File::with_content(destination, format!("{args}\n")),
        &["install:kubelet"],
    );
    kubelet_deps.push(id);

    b.add_resource(
        "systemd:daemon-reload",
        Run::new("systemctl daemon-reload"),
        &["install:kubelet"],
    );
    kubelet_deps.push("systemd:daemon-reload");
    b.add_resource("service-init:kubelet", Service::running("kubelet"), &kubelet_deps);
    b.plan()
}

/// Manifests applied one after the other, in configuration order
pub fn manifests_plan(manifests: Vec<KubectlApply>) -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["manifests"]);
    let mut previous: Option<String> = None;
    for (idx, manifest) in manifests.into_iter().enumerate() {
        let id = format!("install:manifest-{idx:02}");
        match &previous {
            Some(prev) => b.add_resource(id.clone(), manifest, &[prev.as_str()]),
            None => b.add_resource(id.clone(), manifest, &[]),
        };
        previous = Some(id);
    }
    b.plan()
}

/// Role of the machine being upgraded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum NodeRole {
    /// The control plane `kubeadm init` ran on
    #[default]
    OriginalMaster,
    /// A control plane that joined later
    SecondaryMaster,
    Worker,
}

/// Upgrade kubeadm, the node and then kubelet and kubectl to `version`.
/// Packages are unlocked first and locked again at the end.
pub fn upgrade_plan(packages: Packages, version: &str, role: NodeRole) -> plan::Result<Plan> {
    let mut b = Builder::with_id(&["upgrade"]);
    let (unlock, lock) = match packages {
        Packages::Rpm | Packages::Rhel => (
            "yum versionlock delete 'kube*' || true",
            "yum versionlock add 'kube*' || true",
        ),
        Packages::Deb => ("apt-mark unhold 'kube*' || true", "apt-mark hold 'kube*' || true"),
    };
    let package = |b: &mut Builder, id: &str, name: &str, dep: &str| {
        match packages {
            Packages::Rpm | Packages::Rhel => b.add_resource(
                id,
                Rpm::new(name)
                    .with_version(version)
                    .with_disable_excludes("kubernetes"),
                &[dep],
            ),
            Packages::Deb => b.add_resource(id, Deb::pinned(name, &format!("{version}-00")), &[dep]),
        };
    };

    b.add_resource("upgrade:node-unlock-kubernetes", Run::new(unlock), &[]);
    package(
        &mut b,
        "upgrade:node-install-kubeadm",
        "kubeadm",
        "upgrade:node-unlock-kubernetes",
    );

    let upgrade = match role {
        NodeRole::OriginalMaster => {
            format!("kubeadm upgrade plan && kubeadm upgrade apply -y {version}")
        }
        NodeRole::SecondaryMaster if version_less_than(version, "1.16.0") => {
            "kubeadm upgrade node experimental-control-plane".to_string()
        }
        NodeRole::SecondaryMaster => "kubeadm upgrade node".to_string(),
        NodeRole::Worker => format!("kubeadm upgrade node config --kubelet-version {version}"),
    };
    b.add_resource(
        "upgrade:node-kubeadm-upgrade",
        Run::new(without_proxy(&upgrade)),
        &["upgrade:node-install-kubeadm"],
    );

    package(&mut b, "upgrade:node-kubelet", "kubelet", "upgrade:node-kubeadm-upgrade");
    b.add_resource(
        "upgrade:node-restart-kubelet",
        Run::new("systemctl restart kubelet"),
        &["upgrade:node-kubelet"],
    );
    package(&mut b, "upgrade:node-kubectl", "kubectl", "upgrade:node-restart-kubelet");
    b.add_resource(
        "upgrade:node-lock-kubernetes",
        Run::new(lock),
        &["upgrade:node-kubectl"],
    );
    b.plan()
}

impl NodeRecipe<'_> {
    fn kubeadm_init(&self) -> KubeadmInit {
        KubeadmInit {
            public_ip: self.cluster.public_ip.clone(),
            private_ip: self.cluster.private_ip.clone(),
            kubernetes_version: self.cluster.kubernetes_version.clone(),
            control_plane_endpoint: self.cluster.control_plane_endpoint.clone(),
            ignore_preflight_errors: self.cluster.ignore_preflight_errors.clone(),
            use_iptables: self.cluster.use_iptables,
            config: self.kubeadm_config.clone(),
            ..KubeadmInit::default()
        }
    }

    /// The full plan for a control plane node
    pub fn node_plan(self) -> plan::Result<Plan> {
        let init = self.kubeadm_init();
        let mut b = Builder::with_id(&["node"]);
        b.add_resource("install:base", base_plan(self.packages)?, &[])
            .add_resource("install:config", config_plan(self.files)?, &["install:base"])
            .add_resource(
                "install:cri",
                cri_plan(&self.cluster.runtime, self.packages)?,
                &["install:config"],
            )
            .add_resource(
                "install:k8s",
                k8s_plan(self.cluster, self.packages)?,
                &["install:cri"],
            )
            .add_resource("kubeadm:init", init, &["install:k8s"])
            .add_resource(
                "install:manifests",
                manifests_plan(self.manifests)?,
                &["kubeadm:init"],
            );
        b.plan()
    }
}
