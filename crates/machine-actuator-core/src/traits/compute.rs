// # Compute Service Trait
//
// Defines the interface for instance lifecycle calls against the cloud.
//
// ## Lookup Contract
//
// Instances are found by {name, image, flavor}. A lookup returns zero or more
// matches and callers take the first one.
//
// ## Usage
//
// ```rust,ignore
// use machine_actuator_core::traits::{ComputeService, InstanceListOpts};
//
// let opts = InstanceListOpts::new("worker-0", "rhcos", "m1.large");
// let instance = compute.list_instances(&opts).await?.into_iter().next();
// ```

use crate::machine::OpenstackProviderSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Filter for instance lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceListOpts {
    pub name: String,
    pub image: String,
    pub flavor: String,
}

impl InstanceListOpts {
    pub fn new(name: impl Into<String>, image: impl Into<String>, flavor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            flavor: flavor.into(),
        }
    }

    /// Lookup for the instance backing a machine with `spec`
    pub fn for_machine(name: &str, spec: &OpenstackProviderSpec) -> Self {
        Self::new(name, spec.image.as_str(), spec.flavor.as_str())
    }
}

/// The cloud's view of a compute instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    /// Instance identifier
    pub id: String,
    /// Instance name
    pub name: String,
    /// Lifecycle status string, e.g. `ACTIVE` or `BUILD`
    pub status: String,
    pub availability_zone: String,
    /// Access IPv4 address, when the cloud reports one
    pub access_ipv4: Option<String>,
    /// Addresses keyed by network name
    pub addresses: BTreeMap<String, Vec<InstanceAddress>>,
}

/// One address of an instance on a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddress {
    pub address: String,
    /// IP version, 4 or 6
    pub version: u8,
    /// `fixed` or `floating`, when reported
    pub kind: Option<String>,
}

impl InstanceAddress {
    pub fn v4(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: 4,
            kind: Some("fixed".to_string()),
        }
    }

    pub fn v6(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: 6,
            kind: Some("fixed".to_string()),
        }
    }
}

/// Everything the compute service needs to boot an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    /// Instance name, equal to the machine name
    pub name: String,
    /// `<namespace>-<cluster label>`
    pub cluster_name: String,
    pub availability_zone: String,
    pub spec: OpenstackProviderSpec,
    /// Rendered user data, possibly empty
    pub user_data: String,
    /// Whether the instance backs a control-plane machine
    pub control_plane: bool,
}

/// A network port attached to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: String,
}

/// Trait for compute service implementations
///
/// Implementations wrap a single cloud API and must not retry, cache, or make
/// reconciliation decisions; every call is a single request whose failure is
/// returned to the actuator.
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// List instances matching `opts`
    async fn list_instances(&self, opts: &InstanceListOpts) -> Result<Vec<Instance>, crate::Error>;

    /// Boot a new instance
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance, crate::Error>;

    /// Delete an instance
    async fn delete_instance(&self, instance: &Instance) -> Result<(), crate::Error>;

    /// The port floating IPs are associated with
    async fn management_port(&self, instance: &Instance) -> Result<Port, crate::Error>;

    /// Whether an image with this name exists
    async fn image_exists(&self, image: &str) -> Result<bool, crate::Error>;

    /// Whether a flavor with this name exists
    async fn flavor_exists(&self, flavor: &str) -> Result<bool, crate::Error>;

    /// Whether an availability zone with this name exists
    async fn availability_zone_exists(&self, zone: &str) -> Result<bool, crate::Error>;
}
