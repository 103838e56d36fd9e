//! # Resources
//!
//! Concrete [`plan::Resource`] implementations for bootstrapping Kubernetes
//! nodes: packages, files, directories, systemd units, shell scripts,
//! machine facts, kubeadm and kubectl.
//!
//! Every resource speaks to the machine only through a [`plan::Runner`],
//! so the same plan runs locally, over ssh, or against a
//! [`plan::runner::MockRunner`] in tests.
//!
//! ```ignore
//! use plan::Builder;
//! use resources::{Rpm, Service};
//!
//! let mut b = Builder::with_id(&["install", "docker"]);
//! b.add_resource("rpm:docker", Rpm::new("docker"), &[])
//!     .add_resource("service:docker", Service::running("docker"), &["rpm:docker"]);
//! let plan = b.plan()?;
//! ```
//!
//! Serialized plans are decoded with [`Catalog`].

pub mod catalog;
pub mod deb;
pub mod dir;
pub mod error;
pub mod file;
pub mod kubeadm;
pub mod kubectl;
pub mod os;
pub mod parsing;
pub mod retry;
pub mod rpm;
pub mod run;
pub mod script;
pub mod service;

pub use catalog::{Catalog, ResourceType};
pub use deb::Deb;
pub use dir::Dir;
pub use error::{Error, Result};
pub use file::File;
pub use kubeadm::{JoinOutputs, KubeadmInit, KubeadmJoin};
pub use kubectl::{KubectlApply, KubectlWait};
pub use os::{Os, PackageType};
pub use retry::{RetryConfig, RetryingRunner};
pub use rpm::Rpm;
pub use run::Run;
pub use service::Service;
