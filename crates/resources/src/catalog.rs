//! The closed set of resource types and their JSON decoder.

use crate::deb::Deb;
use crate::dir::Dir;
use crate::file::File;
use crate::kubeadm::{KubeadmInit, KubeadmJoin};
use crate::kubectl::{KubectlApply, KubectlWait};
use crate::os::Os;
use crate::rpm::Rpm;
use crate::run::Run;
use crate::service::Service;
use plan::{Resource, ResourceDecoder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Every concrete resource type, by its serialized type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Rpm,
    Deb,
    File,
    Dir,
    Service,
    Run,
    Os,
    KubeadmInit,
    KubeadmJoin,
    KubectlApply,
    KubectlWait,
}

impl ResourceType {
    pub const ALL: [Self; 11] = [
        Self::Rpm,
        Self::Deb,
        Self::File,
        Self::Dir,
        Self::Service,
        Self::Run,
        Self::Os,
        Self::KubeadmInit,
        Self::KubeadmJoin,
        Self::KubectlApply,
        Self::KubectlWait,
    ];

    /// Type tag in serialized plans
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::Deb => "Deb",
            Self::File => "File",
            Self::Dir => "Dir",
            Self::Service => "Service",
            Self::Run => "Run",
            Self::Os => "OS",
            Self::KubeadmInit => "KubeadmInit",
            Self::KubeadmJoin => "KubeadmJoin",
            Self::KubectlApply => "KubectlApply",
            Self::KubectlWait => "KubectlWait",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Build a resource of this type from its serialized fields
    pub fn decode(self, fields: Value) -> serde_json::Result<Box<dyn Resource>> {
        match self {
            Self::Rpm => boxed::<Rpm>(fields),
            Self::Deb => boxed::<Deb>(fields),
            Self::File => boxed::<File>(fields),
            Self::Dir => boxed::<Dir>(fields),
            Self::Service => boxed::<Service>(fields),
            Self::Run => boxed::<Run>(fields),
            Self::Os => boxed::<Os>(fields),
            Self::KubeadmInit => boxed::<KubeadmInit>(fields),
            Self::KubeadmJoin => boxed::<KubeadmJoin>(fields),
            Self::KubectlApply => boxed::<KubectlApply>(fields),
            Self::KubectlWait => boxed::<KubectlWait>(fields),
        }
    }
}

fn boxed<R: Resource + DeserializeOwned + 'static>(
    fields: Value,
) -> serde_json::Result<Box<dyn Resource>> {
    Ok(Box::new(serde_json::from_value::<R>(fields)?))
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decodes every type in [`ResourceType`], for [`plan::Plan::from_json`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Catalog;

impl ResourceDecoder for Catalog {
    fn decode(&self, type_name: &str, fields: Value) -> anyhow::Result<Box<dyn Resource>> {
        let Some(kind) = ResourceType::from_name(type_name) else {
            anyhow::bail!("unknown resource type {type_name}");
        };
        Ok(kind.decode(fields)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan::{Builder, Plan, equal_plans};

    #[test]
    fn test_names_round_trip() {
        for kind in ResourceType::ALL {
            assert_eq!(ResourceType::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ResourceType::from_name("Rpm"), None);
        assert_eq!(ResourceType::Os.to_string(), "OS");
    }

    fn node_plan() -> Plan {
        let mut docker = Builder::with_id(&["install", "docker"]);
        docker
            .add_resource("rpm:docker", Rpm::new("docker").with_version("19.03.5"), &[])
            .add_resource(
                "file:daemon.json",
                File::with_content("/etc/docker/daemon.json", "{\"log-driver\": \"json-file\"}\n"),
                &["rpm:docker"],
            )
            .add_resource(
                "service:docker",
                Service::running("docker"),
                &["rpm:docker", "file:daemon.json"],
            );

        let mut node = Builder::with_id(&["node"]);
        node.add_resource("install:docker", docker.plan().unwrap(), &[])
            .add_resource("deb:kubelet", Deb::pinned("kubelet", "1.16.3-00"), &[])
            .add_resource("dir:kube", Dir::new("/root/.kube"), &[])
            .add_resource("run:swapoff", Run::new("swapoff -a"), &[])
            .add_resource("os", Os::default(), &[])
            .add_resource(
                "kubectl:weave",
                KubectlApply::from_url("https://cloud.weave.works/k8s/net"),
                &["install:docker"],
            )
            .add_resource(
                "kubectl:wait:flux",
                KubectlWait {
                    wait_type: "pods".into(),
                    condition: "condition=Ready".into(),
                    ..KubectlWait::default()
                },
                &["kubectl:weave"],
            )
            .add_resource(
                "kubeadm:join",
                KubeadmJoin {
                    master_ip: "10.0.0.1".into(),
                    master_port: 6443,
                    token: "secret-token".into(),
                    ..KubeadmJoin::default()
                },
                &["install:docker", "deb:kubelet"],
            );
        node.plan().unwrap()
    }

    #[test]
    fn test_plan_round_trip_through_catalog() {
        let plan = node_plan();
        let json = plan.to_json().unwrap();
        assert!(!json.contains("secret-token"));
        assert!(json.contains("\"RPM\""));
        assert!(json.contains("\"OS\""));

        let back = Plan::from_json(json.as_bytes(), &Catalog).unwrap();
        assert_eq!(back.len(), plan.len());
        assert_eq!(back.order(), plan.order());
        let inner = back.resource("install:docker").unwrap().as_plan().unwrap();
        assert_eq!(inner.dependencies("service:docker"), ["rpm:docker", "file:daemon.json"]);
        assert_eq!(
            back.resource("deb:kubelet").unwrap().state().string("suffix"),
            "=1.16.3-00"
        );
    }

    #[test]
    fn test_plan_without_hidden_fields_round_trips_equal() {
        let mut b = Builder::new();
        b.add_resource("rpm:docker", Rpm::new("docker"), &[])
            .add_resource("service:docker", Service::running("docker"), &["rpm:docker"])
            .add_resource("run:hello", Run::new("echo hello"), &["service:docker"]);
        let plan = b.plan().unwrap();
        let back = Plan::from_json(plan.to_json().unwrap().as_bytes(), &Catalog).unwrap();
        assert!(equal_plans(&plan, &back));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"x": {"Mystery": {}, "meta": {"dependsOn": []}}}"#;
        let err = Plan::from_json(json.as_bytes(), &Catalog).unwrap_err();
        assert!(err.to_string().contains("unknown resource type Mystery"));
    }

    #[test]
    fn test_bad_fields_are_rejected() {
        let json = r#"{"svc": {"Service": {"status": "active"}, "meta": {"dependsOn": []}}}"#;
        assert!(Plan::from_json(json.as_bytes(), &Catalog).is_err());
    }
}
