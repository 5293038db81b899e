//! Collaborator traits for the machine actuator
//!
//! The actuator owns reconciliation decisions only. Everything that talks to
//! the outside world is reached through these traits:
//!
//! - [`CloudProvider`]: resolve an authenticated cloud session for a machine
//! - [`ComputeService`]: list, create and delete instances
//! - [`NetworkService`]: subnets, networks and floating IPs
//! - [`ClusterInfo`]: the cluster's stable infrastructure name
//! - [`MachineStore`] / [`SecretStore`]: the control plane's records
//! - [`ScriptRenderer`]: startup-script templating

pub mod cluster;
pub mod compute;
pub mod network;
pub mod renderer;
pub mod store;

pub use cluster::{CloudProvider, CloudSession, ClusterInfo};
pub use compute::{ComputeService, CreateInstanceRequest, Instance, InstanceAddress, InstanceListOpts, Port};
pub use network::{FloatingIp, Network, NetworkService, Subnet};
pub use renderer::ScriptRenderer;
pub use store::{MachineStore, Secret, SecretStore};
