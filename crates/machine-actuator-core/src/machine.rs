//! Machine record types
//!
//! The machine record is owned by the control plane. These types model the
//! subset of it that the actuator reads and writes; unknown provider-spec
//! fields pass through untouched inside [`ProviderSpec::value`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label naming the cluster a machine belongs to
pub const CLUSTER_LABEL: &str = "machine.openshift.io/cluster-api-cluster";
/// Label recording the region the instance runs in
pub const REGION_LABEL: &str = "machine.openshift.io/region";
/// Label recording the availability zone the instance runs in
pub const ZONE_LABEL: &str = "machine.openshift.io/zone";
/// Label recording the flavor of the instance
pub const INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";
/// Label marking a control-plane machine
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/master";

/// A machine record: desired spec plus observed status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Machine name, also the instance name
    pub name: String,

    /// Namespace of the machine record
    #[serde(default)]
    pub namespace: String,

    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Free-form annotations; the actuator's own keys are managed through
    /// [`crate::annotations::InstanceAnnotations`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Version used for optimistic concurrency by the record store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Desired state
    #[serde(default)]
    pub spec: MachineSpec,

    /// Observed state
    #[serde(default)]
    pub status: MachineStatus,
}

/// Desired state of a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Metadata propagated to the node backed by this machine
    #[serde(default)]
    pub metadata: NodeMetadata,

    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,
}

/// Node metadata carried inside the machine spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Opaque provider-spec payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ProviderSpec {
    /// Wrap a typed OpenStack spec
    pub fn from_openstack(spec: &OpenstackProviderSpec) -> Result<Self> {
        Ok(Self {
            value: Some(serde_json::to_value(spec)?),
        })
    }
}

/// The OpenStack view of the provider-spec payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackProviderSpec {
    /// Image to boot from
    #[serde(default)]
    pub image: String,

    /// Flavor (instance type)
    #[serde(default)]
    pub flavor: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub availability_zone: String,

    /// Subnet whose network carries the machine's primary address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_subnet: String,

    /// Floating IP to associate with the instance's management port
    #[serde(default, rename = "floatingIP", skip_serializing_if = "String::is_empty")]
    pub floating_ip: String,

    /// Secret holding the user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,

    /// Boot from a volume instead of the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,
}

/// Reference to a secret by name and optional namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Root volume settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootVolume {
    #[serde(default, rename = "sourceUUID")]
    pub source_uuid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_type: String,

    #[serde(default)]
    pub disk_size: u32,
}

/// Observed state of a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Addresses of the node backed by this machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,
}

/// A single node address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: NodeAddressType,
    pub address: String,
}

/// Kind of node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAddressType {
    InternalIP,
    Hostname,
    InternalDNS,
}

impl Machine {
    /// Create a machine with the given identity and an empty spec
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// `namespace/name`, for logs and events
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Decode the OpenStack provider spec
    pub fn provider_spec(&self) -> Result<OpenstackProviderSpec> {
        let value = self.spec.provider_spec.value.clone().ok_or_else(|| {
            Error::invalid_configuration(format!("machine {} has no providerSpec value", self.name))
        })?;
        serde_json::from_value(value).map_err(|e| {
            Error::invalid_configuration(format!("Cannot unmarshal providerSpec field: {}", e))
        })
    }

    /// Value of the cluster-membership label, empty when unset
    pub fn cluster_label(&self) -> &str {
        self.labels.get(CLUSTER_LABEL).map(String::as_str).unwrap_or_default()
    }

    /// Whether this machine belongs to the control plane
    pub fn is_control_plane(&self) -> bool {
        self.labels.contains_key(CONTROL_PLANE_LABEL)
    }

    /// Set region, zone and instance-type labels unless all three are set
    pub fn set_placement_labels(&mut self, region: &str, availability_zone: &str, flavor: &str) {
        let set = |key: &str| self.labels.get(key).is_some_and(|v| !v.is_empty());
        if set(REGION_LABEL) && set(ZONE_LABEL) && set(INSTANCE_TYPE_LABEL) {
            return;
        }

        self.labels.insert(REGION_LABEL.to_string(), region.to_string());
        self.labels
            .insert(ZONE_LABEL.to_string(), availability_zone.to_string());
        self.labels
            .insert(INSTANCE_TYPE_LABEL.to_string(), flavor.to_string());
    }

    /// Node addresses the machine status should report for `primary_ip`
    pub fn node_addresses(&self, primary_ip: &str) -> Vec<NodeAddress> {
        vec![
            NodeAddress {
                address_type: NodeAddressType::InternalIP,
                address: primary_ip.to_string(),
            },
            NodeAddress {
                address_type: NodeAddressType::Hostname,
                address: self.name.clone(),
            },
            NodeAddress {
                address_type: NodeAddressType::InternalDNS,
                address: self.name.clone(),
            },
        ]
    }
}
