// # Memory Stores
//
// In-memory implementations of MachineStore and SecretStore.
//
// ## Concurrency
//
// The machine store behaves like the control plane's API: every write bumps
// the record's resource version, and a write carrying a stale version is
// rejected with `Error::Conflict`. This lets tests exercise the actuator's
// re-fetch/re-apply path against the same rules production stores enforce.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::machine::Machine;
use crate::traits::store::{MachineStore, Secret, SecretStore};
use crate::Error;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory machine record store
///
/// # Example
///
/// ```rust,no_run
/// use machine_actuator_core::machine::Machine;
/// use machine_actuator_core::store::MemoryMachineStore;
/// use machine_actuator_core::traits::MachineStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryMachineStore::new();
///     let stored = store.insert(Machine::new("openshift-machine-api", "worker-0")).await;
///
///     let fetched = store.get("openshift-machine-api", "worker-0").await?;
///     assert_eq!(fetched, Some(stored));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryMachineStore {
    inner: Arc<RwLock<HashMap<Key, Machine>>>,
}

impl MemoryMachineStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record unconditionally, assigning a fresh version
    pub async fn insert(&self, mut machine: Machine) -> Machine {
        let mut guard = self.inner.write().await;
        let k = key(&machine.namespace, &machine.name);
        let version = guard
            .get(&k)
            .map(|existing| next_version(existing.resource_version.as_deref()))
            .unwrap_or_else(|| "1".to_string());
        machine.resource_version = Some(version);
        guard.insert(k, machine.clone());
        machine
    }

    /// Remove a record
    pub async fn remove(&self, namespace: &str, name: &str) -> Option<Machine> {
        self.inner.write().await.remove(&key(namespace, name))
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    async fn write<F>(&self, machine: &Machine, apply: F) -> Result<Machine, Error>
    where
        F: FnOnce(&mut Machine, &Machine),
    {
        let mut guard = self.inner.write().await;
        let stored = guard
            .get_mut(&key(&machine.namespace, &machine.name))
            .ok_or_else(|| Error::not_found(format!("machine {}", machine.key())))?;

        if let Some(version) = machine.resource_version.as_deref()
            && stored.resource_version.as_deref() != Some(version)
        {
            return Err(Error::conflict(format!(
                "machine {} has been modified (have version {}, stored version {})",
                machine.key(),
                version,
                stored.resource_version.as_deref().unwrap_or("none")
            )));
        }

        apply(stored, machine);
        stored.resource_version = Some(next_version(stored.resource_version.as_deref()));
        Ok(stored.clone())
    }
}

fn next_version(current: Option<&str>) -> String {
    let current: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl MachineStore for MemoryMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(&key(namespace, name)).cloned())
    }

    async fn update(&self, machine: &Machine) -> Result<Machine, Error> {
        self.write(machine, |stored, incoming| {
            let status = std::mem::take(&mut stored.status);
            *stored = incoming.clone();
            stored.status = status;
        })
        .await
    }

    async fn update_status(&self, machine: &Machine) -> Result<Machine, Error> {
        self.write(machine, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
        .await
    }
}

/// In-memory secret store
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    inner: Arc<RwLock<HashMap<Key, Secret>>>,
}

impl MemorySecretStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret
    pub async fn insert(&self, secret: Secret) {
        let mut guard = self.inner.write().await;
        guard.insert(key(&secret.namespace, &secret.name), secret);
    }

    /// All secrets in `namespace`
    pub async fn list(&self, namespace: &str) -> Vec<Secret> {
        let guard = self.inner.read().await;
        guard
            .values()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(&key(namespace, name)).cloned())
    }

    async fn create(&self, secret: &Secret) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let k = key(&secret.namespace, &secret.name);
        if guard.contains_key(&k) {
            return Err(Error::conflict(format!(
                "secret {}/{} already exists",
                secret.namespace, secret.name
            )));
        }
        guard.insert(k, secret.clone());
        Ok(())
    }
}
