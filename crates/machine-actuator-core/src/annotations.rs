//! Typed view of the annotations the actuator owns
//!
//! Annotations are the actuator's only persistent memory. They live in the
//! machine record's string map; this module converts them to and from typed
//! values so the rest of the crate never looks keys up by hand.

use crate::error::Result;
use crate::machine::{Machine, MachineSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Annotation holding the instance identifier
pub const INSTANCE_ID_ANNOTATION: &str = "openstack-resourceId";
/// Annotation holding the resolved primary IP
pub const PRIMARY_IP_ANNOTATION: &str = "openstack-ip-address";
/// Annotation holding the lifecycle state marker
pub const INSTANCE_STATE_ANNOTATION: &str = "machine.openshift.io/instance-state";
/// Annotation holding the observed-machine snapshot
pub const INSTANCE_STATUS_ANNOTATION: &str = "instance-status";
/// Lifecycle state written when the last reconciliation failed
pub const ERROR_STATE: &str = "ERROR";

/// Lifecycle state marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    /// Status string reported by the cloud for the live instance
    Status(String),
    /// The last reconciliation failed
    Error,
}

impl InstanceState {
    fn parse(raw: &str) -> Self {
        if raw == ERROR_STATE {
            InstanceState::Error
        } else {
            InstanceState::Status(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Status(status) => status,
            InstanceState::Error => ERROR_STATE,
        }
    }
}

/// Instance identity, primary address and lifecycle state of a machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceAnnotations {
    pub instance_id: Option<String>,
    pub primary_ip: Option<String>,
    pub state: Option<InstanceState>,
}

impl InstanceAnnotations {
    /// Read the typed state from a machine. Empty values count as unset.
    pub fn from_machine(machine: &Machine) -> Self {
        let get = |key: &str| {
            machine
                .annotations
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
        };

        Self {
            instance_id: get(INSTANCE_ID_ANNOTATION),
            primary_ip: get(PRIMARY_IP_ANNOTATION),
            state: get(INSTANCE_STATE_ANNOTATION).map(|s| InstanceState::parse(&s)),
        }
    }

    /// State recorded for a live instance
    pub fn for_instance(instance_id: &str, primary_ip: &str, status: &str) -> Self {
        Self {
            instance_id: Some(instance_id.to_string()),
            primary_ip: Some(primary_ip.to_string()),
            state: Some(InstanceState::Status(status.to_string())),
        }
    }

    /// Whether an instance was ever recorded for this machine
    pub fn has_recorded_instance(&self) -> bool {
        self.instance_id.is_some()
    }

    /// Write the typed state back. Unset fields remove their key.
    pub fn apply_to(&self, machine: &mut Machine) {
        let annotations = &mut machine.annotations;
        set_or_remove(annotations, INSTANCE_ID_ANNOTATION, self.instance_id.as_deref());
        set_or_remove(annotations, PRIMARY_IP_ANNOTATION, self.primary_ip.as_deref());
        set_or_remove(
            annotations,
            INSTANCE_STATE_ANNOTATION,
            self.state.as_ref().map(InstanceState::as_str),
        );
    }
}

fn set_or_remove(annotations: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            annotations.insert(key.to_string(), value.to_string());
        }
        None => {
            annotations.remove(key);
        }
    }
}

/// Force the lifecycle state to the error marker, keeping everything else
pub fn mark_error(machine: &mut Machine) {
    let mut state = InstanceAnnotations::from_machine(machine);
    state.state = Some(InstanceState::Error);
    state.apply_to(machine);
}

/// Snapshot of a machine as it was when its instance was last recorded.
///
/// Update compares the incoming machine against this snapshot to decide
/// whether the instance has to be replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedMachine {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub spec: MachineSpec,
}

impl ObservedMachine {
    /// Capture the parts of `machine` that describe its instance
    pub fn capture(machine: &Machine) -> Self {
        Self {
            name: machine.name.clone(),
            namespace: machine.namespace.clone(),
            labels: machine.labels.clone(),
            spec: machine.spec.clone(),
        }
    }

    /// Read the snapshot stored on `machine`, if any
    pub fn read(machine: &Machine) -> Option<Self> {
        let raw = machine
            .annotations
            .get(INSTANCE_STATUS_ANNOTATION)
            .filter(|v| !v.is_empty())?;

        match serde_json::from_str(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(machine = %machine.key(), error = %e, "Ignoring unreadable instance status snapshot");
                None
            }
        }
    }

    /// Store this snapshot on `machine`
    pub fn write(&self, machine: &mut Machine) -> Result<()> {
        let serialized = serde_json::to_string(self)?;
        machine
            .annotations
            .insert(INSTANCE_STATUS_ANNOTATION.to_string(), serialized);
        Ok(())
    }

    /// A machine record carrying the snapshot's identity and spec
    pub fn to_machine(&self) -> Machine {
        Machine {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels: self.labels.clone(),
            spec: self.spec.clone(),
            ..Default::default()
        }
    }
}
