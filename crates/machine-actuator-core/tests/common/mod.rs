//! Test doubles and common utilities for contract tests
//!
//! `FakeCloud` plays provider, compute and network service at once. Clones
//! share state and counters, so a test keeps one handle while the actuator
//! owns another.

#![allow(dead_code)]

use async_trait::async_trait;
use machine_actuator_core::error::{Error, Result};
use machine_actuator_core::machine::{CLUSTER_LABEL, Machine, OpenstackProviderSpec, ProviderSpec};
use machine_actuator_core::traits::{
    CloudProvider, CloudSession, ClusterInfo, ComputeService, CreateInstanceRequest, FloatingIp,
    Instance, InstanceAddress, InstanceListOpts, MachineStore, Network, NetworkService, Port,
    ScriptRenderer, Subnet,
};
use machine_actuator_core::{
    Actuator, ActuatorConfig, MachineEvent, MemoryMachineStore, MemorySecretStore,
    PostprocessorRegistry,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const NAMESPACE: &str = "openshift-machine-api";
pub const INFRA_NAME: &str = "mycluster-x7k2p";
pub const REGION: &str = "regionOne";

/// An instance plus the image and flavor it was booted with
#[derive(Debug, Clone)]
struct LiveInstance {
    instance: Instance,
    image: String,
    flavor: String,
}

#[derive(Debug, Default)]
struct CloudState {
    instances: Vec<LiveInstance>,
    next_id: usize,
    images: BTreeSet<String>,
    flavors: BTreeSet<String>,
    zones: BTreeSet<String>,
    subnets: Vec<Subnet>,
    networks: Vec<Network>,
    /// Addresses given to the next created instance, keyed by network
    next_addresses: Option<BTreeMap<String, Vec<InstanceAddress>>>,
    create_error: Option<String>,
    associate_error: Option<String>,
    list_error: Option<String>,
    delete_error: Option<String>,
    /// Deleted instances stay listed
    delete_lingers: bool,
    created: Vec<CreateInstanceRequest>,
    associated: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Counters {
    resolve: AtomicUsize,
    list: AtomicUsize,
    create: AtomicUsize,
    delete: AtomicUsize,
    get_subnet: AtomicUsize,
    list_by_tag: AtomicUsize,
}

/// In-memory cloud that records every call
#[derive(Debug, Clone)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
    counters: Arc<Counters>,
}

impl FakeCloud {
    /// A cloud offering image `rhcos`, flavors `m1.small`/`m1.large` and zone `nova`
    pub fn new() -> Self {
        let state = CloudState {
            images: BTreeSet::from(["rhcos".to_string()]),
            flavors: BTreeSet::from(["m1.small".to_string(), "m1.large".to_string()]),
            zones: BTreeSet::from(["nova".to_string()]),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create a handle that shares state and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            state: Arc::clone(&other.state),
            counters: Arc::clone(&other.counters),
        }
    }

    /// Put an instance in place as if booted earlier
    pub fn seed_instance(&self, name: &str, image: &str, flavor: &str, status: &str) -> Instance {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let instance = Instance {
            id: format!("seeded-{}", state.next_id),
            name: name.to_string(),
            status: status.to_string(),
            availability_zone: "nova".to_string(),
            access_ipv4: None,
            addresses: BTreeMap::from([(
                "net-a".to_string(),
                vec![InstanceAddress::v4(format!("10.0.0.{}", state.next_id))],
            )]),
        };
        state.instances.push(LiveInstance {
            instance: instance.clone(),
            image: image.to_string(),
            flavor: flavor.to_string(),
        });
        instance
    }

    pub fn add_network(&self, id: &str, name: &str, tags: &[&str]) {
        self.state.lock().unwrap().networks.push(Network {
            id: id.to_string(),
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    pub fn add_subnet(&self, id: &str, network_id: &str) {
        self.state.lock().unwrap().subnets.push(Subnet {
            id: id.to_string(),
            network_id: network_id.to_string(),
        });
    }

    pub fn remove_flavor(&self, flavor: &str) {
        self.state.lock().unwrap().flavors.remove(flavor);
    }

    pub fn set_next_addresses(&self, addresses: BTreeMap<String, Vec<InstanceAddress>>) {
        self.state.lock().unwrap().next_addresses = Some(addresses);
    }

    pub fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().create_error = Some(message.to_string());
    }

    pub fn fail_associate(&self, message: &str) {
        self.state.lock().unwrap().associate_error = Some(message.to_string());
    }

    pub fn fail_list(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        self.state.lock().unwrap().delete_error = Some(message.to_string());
    }

    pub fn set_delete_lingers(&self, lingers: bool) {
        self.state.lock().unwrap().delete_lingers = lingers;
    }

    /// Live instances as (name, flavor)
    pub fn live_instances(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .instances
            .iter()
            .map(|live| (live.instance.name.clone(), live.flavor.clone()))
            .collect()
    }

    pub fn created_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Floating IP associations as (address, port id)
    pub fn associations(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().associated.clone()
    }

    pub fn resolve_call_count(&self) -> usize {
        self.counters.resolve.load(Ordering::SeqCst)
    }

    pub fn list_call_count(&self) -> usize {
        self.counters.list.load(Ordering::SeqCst)
    }

    pub fn create_call_count(&self) -> usize {
        self.counters.create.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    pub fn get_subnet_call_count(&self) -> usize {
        self.counters.get_subnet.load(Ordering::SeqCst)
    }

    pub fn list_by_tag_call_count(&self) -> usize {
        self.counters.list_by_tag.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn resolve(&self, _machine: &Machine) -> Result<CloudSession> {
        self.counters.resolve.fetch_add(1, Ordering::SeqCst);
        Ok(CloudSession {
            region: REGION.to_string(),
            compute: Arc::new(FakeCloud::sharing_counters_with(self)),
            network: Arc::new(FakeCloud::sharing_counters_with(self)),
        })
    }
}

#[async_trait]
impl ComputeService for FakeCloud {
    async fn list_instances(&self, opts: &InstanceListOpts) -> Result<Vec<Instance>> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(Error::provider("list instances", message.clone()));
        }
        Ok(state
            .instances
            .iter()
            .filter(|live| {
                live.instance.name == opts.name && live.image == opts.image && live.flavor == opts.flavor
            })
            .map(|live| live.instance.clone())
            .collect())
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance> {
        self.counters.create.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.create_error {
            return Err(Error::provider("create instance", message.clone()));
        }

        state.next_id += 1;
        let addresses = state.next_addresses.clone().unwrap_or_else(|| {
            BTreeMap::from([(
                "net-a".to_string(),
                vec![InstanceAddress::v4(format!("10.0.0.{}", state.next_id))],
            )])
        });
        let instance = Instance {
            id: format!("instance-{}", state.next_id),
            name: request.name.clone(),
            status: "ACTIVE".to_string(),
            availability_zone: request.availability_zone.clone(),
            access_ipv4: None,
            addresses,
        };
        state.instances.push(LiveInstance {
            instance: instance.clone(),
            image: request.spec.image.clone(),
            flavor: request.spec.flavor.clone(),
        });
        state.created.push(request.clone());
        Ok(instance)
    }

    async fn delete_instance(&self, instance: &Instance) -> Result<()> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.delete_error {
            return Err(Error::provider("delete instance", message.clone()));
        }
        if !state.delete_lingers {
            state.instances.retain(|live| live.instance.id != instance.id);
        }
        Ok(())
    }

    async fn management_port(&self, instance: &Instance) -> Result<Port> {
        Ok(Port {
            id: format!("port-{}", instance.id),
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn flavor_exists(&self, flavor: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().flavors.contains(flavor))
    }

    async fn availability_zone_exists(&self, zone: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().zones.contains(zone))
    }
}

#[async_trait]
impl NetworkService for FakeCloud {
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        self.counters.get_subnet.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        state
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("subnet {}", subnet_id)))
    }

    async fn get_network(&self, network_id: &str) -> Result<Network> {
        let state = self.state.lock().unwrap();
        state
            .networks
            .iter()
            .find(|n| n.id == network_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("network {}", network_id)))
    }

    async fn list_networks_by_tag(&self, tag: &str) -> Result<Vec<Network>> {
        self.counters.list_by_tag.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|n| n.tags.iter().any(|t| t == tag))
            .cloned()
            .collect())
    }

    async fn get_or_create_floating_ip(&self, _cluster_name: &str, address: &str) -> Result<FloatingIp> {
        Ok(FloatingIp {
            id: format!("fip-{}", address),
            address: address.to_string(),
        })
    }

    async fn associate_floating_ip(&self, floating_ip: &FloatingIp, port_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.associate_error {
            return Err(Error::provider("associate floating ip", message.clone()));
        }
        state
            .associated
            .push((floating_ip.address.clone(), port_id.to_string()));
        Ok(())
    }
}

type Interference = Box<dyn FnOnce(&mut Machine) + Send>;

/// Machine store that counts writes and can simulate a concurrent writer
///
/// Shares its records with the wrapped `MemoryMachineStore`.
#[derive(Clone)]
pub struct CountingMachineStore {
    inner: MemoryMachineStore,
    updates: Arc<AtomicUsize>,
    status_updates: Arc<AtomicUsize>,
    interference: Arc<Mutex<Option<Interference>>>,
}

impl CountingMachineStore {
    pub fn new(inner: MemoryMachineStore) -> Self {
        Self {
            inner,
            updates: Arc::new(AtomicUsize::new(0)),
            status_updates: Arc::new(AtomicUsize::new(0)),
            interference: Arc::new(Mutex::new(None)),
        }
    }

    /// Apply `change` to the stored record right before the next metadata
    /// write, so that write carries a stale version
    pub fn interfere_before_next_update(&self, change: impl FnOnce(&mut Machine) + Send + 'static) {
        *self.interference.lock().unwrap() = Some(Box::new(change));
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn status_update_count(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MachineStore for CountingMachineStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        self.inner.get(namespace, name).await
    }

    async fn update(&self, machine: &Machine) -> Result<Machine> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let interference = self.interference.lock().unwrap().take();
        if let Some(change) = interference
            && let Some(mut current) = self.inner.get(&machine.namespace, &machine.name).await?
        {
            change(&mut current);
            self.inner.update(&current).await?;
        }
        self.inner.update(machine).await
    }

    async fn update_status(&self, machine: &Machine) -> Result<Machine> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_status(machine).await
    }
}

/// Renders `control-plane:<name>` or `worker:<name>:<token>` followed by the template
pub struct FakeRenderer;

impl ScriptRenderer for FakeRenderer {
    fn render_control_plane(&self, machine: &Machine, template: &str) -> Result<String> {
        Ok(format!("control-plane:{}\n{}", machine.name, template))
    }

    fn render_worker(&self, machine: &Machine, token: &str, template: &str) -> Result<String> {
        Ok(format!("worker:{}:{}\n{}", machine.name, token, template))
    }
}

/// Cluster info with a fixed infrastructure name
#[derive(Debug, Clone)]
pub struct StaticClusterInfo {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl StaticClusterInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterInfo for StaticClusterInfo {
    async fn infrastructure_name(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.name.clone())
    }
}

/// Provider spec booting `rhcos` with `flavor` in zone `nova`
pub fn provider_spec(flavor: &str) -> OpenstackProviderSpec {
    OpenstackProviderSpec {
        image: "rhcos".to_string(),
        flavor: flavor.to_string(),
        availability_zone: "nova".to_string(),
        ..Default::default()
    }
}

/// A machine that belongs to the test cluster
pub fn machine_with_spec(name: &str, spec: &OpenstackProviderSpec) -> Machine {
    let mut machine = Machine::new(NAMESPACE, name);
    machine
        .labels
        .insert(CLUSTER_LABEL.to_string(), INFRA_NAME.to_string());
    machine.spec.provider_spec = ProviderSpec::from_openstack(spec).unwrap();
    machine
}

pub fn worker_machine(name: &str, flavor: &str) -> Machine {
    machine_with_spec(name, &provider_spec(flavor))
}

/// Replace the provider spec of `machine`
pub fn set_spec(machine: &mut Machine, spec: &OpenstackProviderSpec) {
    machine.spec.provider_spec = ProviderSpec::from_openstack(spec).unwrap();
}

/// Actuator wired to fakes, plus handles on every fake
pub struct Harness {
    pub actuator: Actuator,
    pub events: mpsc::Receiver<MachineEvent>,
    pub cloud: FakeCloud,
    pub cluster: StaticClusterInfo,
    pub machines: MemoryMachineStore,
    /// The actuator's view of `machines`, with write counters
    pub records: CountingMachineStore,
    pub secrets: MemorySecretStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ActuatorConfig::default())
    }

    pub fn with_config(config: ActuatorConfig) -> Self {
        Self::build(config, PostprocessorRegistry::with_defaults())
    }

    pub fn build(config: ActuatorConfig, registry: PostprocessorRegistry) -> Self {
        let cloud = FakeCloud::new();
        let machines = MemoryMachineStore::new();
        let records = CountingMachineStore::new(machines.clone());
        let cluster = StaticClusterInfo::new(INFRA_NAME);
        let secrets = MemorySecretStore::new();

        let (actuator, events) = Actuator::new(
            Arc::new(FakeCloud::sharing_counters_with(&cloud)),
            Arc::new(cluster.clone()),
            Arc::new(records.clone()),
            Arc::new(secrets.clone()),
            Arc::new(FakeRenderer),
            registry,
            config,
        )
        .expect("actuator construction succeeds");

        Self {
            actuator,
            events,
            cloud,
            cluster,
            machines,
            records,
            secrets,
        }
    }

    /// Store `machine` and return the stored copy
    pub async fn store(&self, machine: Machine) -> Machine {
        self.machines.insert(machine).await
    }

    /// Current stored copy of a machine
    pub async fn stored(&self, name: &str) -> Machine {
        self.machines
            .get(NAMESPACE, name)
            .await
            .unwrap()
            .expect("machine is stored")
    }

    /// All events emitted so far
    pub fn drain_events(&mut self) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Reasons of `events`, in order
pub fn reasons(events: &[MachineEvent]) -> Vec<&str> {
    events.iter().map(|e| e.reason.as_str()).collect()
}
