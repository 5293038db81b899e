// # Record Store Traits
//
// The machine record and the secrets next to it belong to the control plane.
// The actuator reads and writes them through these traits.
//
// ## Optimistic Concurrency
//
// Machine records carry a `resource_version`. A write whose version is stale
// must fail with `Error::Conflict`; the actuator then re-fetches the record and
// re-applies its change. Stores must never silently overwrite a newer record.

use crate::machine::Machine;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Trait for machine record stores
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Fetch the current record, `None` if it no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Machine>, crate::Error>;

    /// Write metadata and spec. Status is left untouched.
    ///
    /// Returns the stored record with its new resource version, or
    /// `Error::Conflict` when `machine.resource_version` is stale.
    async fn update(&self, machine: &Machine) -> Result<Machine, crate::Error>;

    /// Write the status only, with the same conflict rules as
    /// [`MachineStore::update`]
    async fn update_status(&self, machine: &Machine) -> Result<Machine, crate::Error>;
}

/// A secret: a named bag of byte values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add a value, builder style
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Trait for secret stores
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, crate::Error>;

    /// Create a secret. Fails if it already exists.
    async fn create(&self, secret: &Secret) -> Result<(), crate::Error>;
}
