//! Machine actuator engine
//!
//! The [`Actuator`] is responsible for:
//! - Creating the instance backing a machine, at most once
//! - Deleting it, idempotently
//! - Replacing it in place when the machine's spec changes
//! - Reporting whether it exists
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!   control loop ────▶ │   Actuator   │ ───── MachineEvent ────▶ receiver
//!                      └──────────────┘
//!                             │
//!         ┌───────────────────┼────────────────────┐
//!         │                   │                    │
//!         ▼                   ▼                    ▼
//! ┌───────────────┐   ┌───────────────┐    ┌──────────────┐
//! │ CloudProvider │   │ UserDataPipe- │    │   Recorder   │
//! │ (session)     │   │ line (boot)   │    │ (annotations,│
//! └───────────────┘   └───────────────┘    │  status)     │
//!                                          └──────────────┘
//! ```
//!
//! ## Re-entrancy
//!
//! Every operation may be invoked again at any time, including after a crash
//! halfway through. The actuator keeps no state of its own: the cloud is asked
//! what exists, and the machine's annotations say what was recorded.
//!
//! ## Failures
//!
//! Terminal failures go through [`Recorder::fail`] exactly once, which records
//! them on the machine and emits a `Failed*` event. Cancellation and fatal
//! invariant violations skip that step and are returned as they are.

use crate::annotations::{InstanceAnnotations, ObservedMachine};
use crate::config::ActuatorConfig;
use crate::diff;
use crate::error::{Error, Result, CREATE_ERROR_REASON, DELETE_ERROR_REASON, UPDATE_ERROR_REASON};
use crate::machine::{Machine, OpenstackProviderSpec, CLUSTER_LABEL, CONTROL_PLANE_LABEL};
use crate::poll::{cancellable, poll_until, PollConfig};
use crate::recorder::Recorder;
use crate::registry::PostprocessorRegistry;
use crate::traits::{
    CloudProvider, CloudSession, ClusterInfo, CreateInstanceRequest, Instance, InstanceListOpts,
    MachineStore, ScriptRenderer, SecretStore,
};
use crate::userdata::UserDataPipeline;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloud status of an instance that finished booting
const ACTIVE_STATUS: &str = "ACTIVE";

/// Severity of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Operation a failure is reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    /// Reason of the warning event emitted for a failure
    pub fn failure_reason(&self) -> &'static str {
        match self {
            EventAction::Create => "FailedCreate",
            EventAction::Update => "FailedUpdate",
            EventAction::Delete => "FailedDelete",
        }
    }

    /// Machine-status reason for failures that carry none of their own
    pub fn error_reason(&self) -> &'static str {
        match self {
            EventAction::Create => CREATE_ERROR_REASON,
            EventAction::Update => UPDATE_ERROR_REASON,
            EventAction::Delete => DELETE_ERROR_REASON,
        }
    }
}

/// A lifecycle event attached to a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineEvent {
    /// `namespace/name` of the machine
    pub machine: String,
    pub kind: EventKind,
    /// Short machine-readable reason, e.g. `Created` or `FailedDelete`
    pub reason: String,
    pub message: String,
}

impl MachineEvent {
    pub fn new(machine: &Machine, kind: EventKind, reason: &str, message: impl Into<String>) -> Self {
        Self {
            machine: machine.key(),
            kind,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    fn normal(machine: &Machine, reason: &str, verb: &str) -> Self {
        Self::new(
            machine,
            EventKind::Normal,
            reason,
            format!("{} machine {}", verb, machine.name),
        )
    }
}

/// How an existing instance and a recorded instance id are treated on create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateMode {
    /// Plain create: an existing instance means done, a recorded id without
    /// a live instance is refused
    Fresh,
    /// Replace-in-place: the old instance's id is expected on the machine, and
    /// an already existing new instance is recorded
    Replace,
}

/// Machine actuator
///
/// Sequences the cloud calls and record writes for one machine per call.
/// Calls for different machines may run concurrently; calls for the same
/// machine are expected to be serialized by the caller.
pub struct Actuator {
    provider: Arc<dyn CloudProvider>,
    cluster: Arc<dyn ClusterInfo>,
    user_data: UserDataPipeline,
    recorder: Recorder,
    delete_wait: PollConfig,
}

impl Actuator {
    /// Create a new actuator
    ///
    /// # Returns
    ///
    /// A tuple of (actuator, event_receiver) where event_receiver yields
    /// lifecycle events
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        cluster: Arc<dyn ClusterInfo>,
        machines: Arc<dyn MachineStore>,
        secrets: Arc<dyn SecretStore>,
        renderer: Arc<dyn ScriptRenderer>,
        registry: PostprocessorRegistry,
        config: ActuatorConfig,
    ) -> Result<(Self, mpsc::Receiver<MachineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let actuator = Self {
            provider,
            cluster,
            user_data: UserDataPipeline::new(
                secrets,
                renderer,
                registry,
                config.bootstrap_token_ttl(),
            ),
            recorder: Recorder::new(machines, config.conflict_retries, tx),
            delete_wait: PollConfig::from(&config),
        };

        Ok((actuator, rx))
    }

    /// Create the instance backing `machine`
    ///
    /// Succeeds without side effects when the instance already exists. Refuses
    /// to recreate an instance that was recorded once and has since vanished.
    pub async fn create(&self, cancel: &CancellationToken, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.key(), "Creating machine");
        let created = match cancellable(cancel, self.cluster.infrastructure_name()).await {
            Ok(infra_name) => self
                .try_create(cancel, machine, CreateMode::Fresh, &infra_name)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        match created {
            Ok(()) => Ok(()),
            Err(e) => Err(self.recorder.fail(cancel, machine, EventAction::Create, e).await),
        }
    }

    /// Delete the instance backing `machine`, if there is one
    pub async fn delete(&self, cancel: &CancellationToken, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.key(), "Deleting machine");
        match self.try_delete(cancel, machine).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.recorder.fail(cancel, machine, EventAction::Delete, e).await),
        }
    }

    /// Bring the instance in line with `machine`'s spec
    ///
    /// Workers are replaced in place: the new instance is created first, then
    /// the old one is deleted and waited for. A change that keeps the image
    /// and flavor resolves to the recorded instance, which is kept and
    /// re-recorded. Control-plane machines cannot be replaced.
    pub async fn update(&self, cancel: &CancellationToken, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.key(), "Updating machine");

        let (session, spec, infra_name) = match self.prepare_update(cancel, machine).await {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.recorder.fail(cancel, machine, EventAction::Update, e).await),
        };

        let (observed, recorded_id) = match self.recorder.refetch(cancel, machine).await {
            Ok(current) => (
                ObservedMachine::read(&current),
                InstanceAnnotations::from_machine(&current).instance_id,
            ),
            Err(e) => return Err(self.recorder.fail(cancel, machine, EventAction::Update, e).await),
        };

        let Some(observed) = observed else {
            return match self
                .bootstrap_observed_state(cancel, &session, machine, &spec, &infra_name)
                .await
            {
                Ok(()) => Ok(()),
                Err(e) => Err(self.recorder.fail(cancel, machine, EventAction::Update, e).await),
            };
        };

        let differences = diff::differences(Some(&observed), Some(&*machine));
        if differences.is_empty() {
            debug!(machine = %machine.key(), "Machine matches its recorded instance, nothing to update");
            return Ok(());
        }
        info!(machine = %machine.key(), changed = ?differences, "Machine differs from its recorded instance");

        if observed.labels.contains_key(CONTROL_PLANE_LABEL) {
            warn!(machine = %machine.key(), "master inplace update failed: not supported");
            let err = Error::update("master inplace update failed: not supported");
            return Err(self.recorder.fail(cancel, machine, EventAction::Update, err).await);
        }

        info!(machine = %machine.key(), "Re-creating machine for update");
        let replacement_id = match self
            .try_create(cancel, machine, CreateMode::Replace, &infra_name)
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(self.recorder.fail(cancel, machine, EventAction::Create, e).await),
        };

        // Same image and flavor: the lookup found the recorded instance
        // itself, which now carries the new snapshot and must stay
        let old = observed.to_machine();
        let same_instance = recorded_id.as_deref() == Some(replacement_id.as_str())
            || old.provider_spec().is_ok_and(|old_spec| {
                InstanceListOpts::for_machine(&old.name, &old_spec)
                    == InstanceListOpts::for_machine(&machine.name, &spec)
            });
        if same_instance {
            info!(machine = %machine.key(), instance_id = %replacement_id, "Recorded instance already matches, keeping it");
            self.recorder
                .emit_event(MachineEvent::normal(machine, "Updated", "Updated"));
            return Ok(());
        }

        if let Err(e) = self.try_delete(cancel, &old).await {
            return Err(self.recorder.fail(cancel, machine, EventAction::Delete, e).await);
        }

        if let Err(e) = self.wait_for_deletion(cancel, &session, &old).await {
            let e = match e {
                Error::Timeout { .. } => {
                    Error::delete(format!("error deleting Openstack instance: {}", e))
                }
                other => other,
            };
            return Err(self.recorder.fail(cancel, machine, EventAction::Update, e).await);
        }

        info!(machine = %machine.key(), "Successfully updated machine");
        self.recorder
            .emit_event(MachineEvent::normal(machine, "Updated", "Updated"));
        Ok(())
    }

    /// Whether the instance backing `machine` exists
    pub async fn exists(&self, cancel: &CancellationToken, machine: &Machine) -> Result<bool> {
        let session = cancellable(cancel, self.provider.resolve(machine)).await?;
        let spec = machine.provider_spec()?;

        let instance = self
            .lookup(cancel, &session, &machine.name, &spec)
            .await
            .map_err(|e| wrap(e, |e| Error::Other(format!("Error checking if instance exists: {}", e))))?;

        debug!(machine = %machine.key(), exists = instance.is_some(), "Checked instance existence");
        Ok(instance.is_some())
    }

    /// Returns the id of the instance now backing `machine`
    async fn try_create(
        &self,
        cancel: &CancellationToken,
        machine: &mut Machine,
        mode: CreateMode,
        infra_name: &str,
    ) -> Result<String> {
        let cluster_label = machine.cluster_label();
        if cluster_label != infra_name {
            return Err(Error::invalid_configuration(format!(
                "{} label value is incorrect: {}, machine {} cannot join cluster {}",
                CLUSTER_LABEL, cluster_label, machine.name, infra_name
            )));
        }

        let session = cancellable(cancel, self.provider.resolve(machine)).await?;
        let spec = machine.provider_spec()?;
        self.validate(cancel, &session, &spec)
            .await
            .map_err(|e| wrap(e, |e| Error::invalid_configuration(format!("Machine validation failed: {}", e))))?;

        if let Some(existing) = self.lookup(cancel, &session, &machine.name, &spec).await? {
            return match mode {
                CreateMode::Fresh => {
                    info!(machine = %machine.key(), instance_id = %existing.id, "Skipped creating a VM that already exists");
                    Ok(existing.id)
                }
                CreateMode::Replace => {
                    info!(machine = %machine.key(), instance_id = %existing.id, "Replacement instance already exists, recording it");
                    self.recorder
                        .record_instance(cancel, &session, machine, &spec, &existing, infra_name)
                        .await?;
                    Ok(existing.id)
                }
            };
        }

        if mode == CreateMode::Fresh && InstanceAnnotations::from_machine(machine).has_recorded_instance() {
            return Err(Error::invalid_configuration(format!(
                "the instance has been destroyed for the machine {}, cannot recreate it",
                machine.name
            )));
        }

        let user_data = cancellable(cancel, self.user_data.build(machine, &spec)).await?;

        let cluster_name = format!("{}-{}", machine.namespace, machine.cluster_label());
        let request = CreateInstanceRequest {
            name: machine.name.clone(),
            cluster_name: cluster_name.clone(),
            availability_zone: spec.availability_zone.clone(),
            spec: spec.clone(),
            user_data,
            control_plane: machine.is_control_plane(),
        };
        let instance = cancellable(cancel, session.compute.create_instance(&request))
            .await
            .map_err(|e| wrap(e, |e| Error::create(format!("error creating Openstack instance: {}", e))))?;
        info!(machine = %machine.key(), instance_id = %instance.id, "Created instance");

        if !spec.floating_ip.is_empty() {
            self.attach_floating_ip(cancel, &session, &cluster_name, &spec.floating_ip, &instance)
                .await?;
        }

        self.recorder
            .emit_event(MachineEvent::normal(machine, "Created", "Created"));

        self.recorder
            .record_instance(cancel, &session, machine, &spec, &instance, infra_name)
            .await?;
        Ok(instance.id)
    }

    async fn try_delete(&self, cancel: &CancellationToken, machine: &Machine) -> Result<()> {
        let session = cancellable(cancel, self.provider.resolve(machine)).await?;
        let spec = machine.provider_spec()?;

        let instance = self
            .lookup(cancel, &session, &machine.name, &spec)
            .await
            .map_err(|e| wrap(e, |e| Error::delete(format!("error getting OpenStack instance: {}", e))))?;

        let Some(instance) = instance else {
            info!(machine = %machine.key(), "Skipped deleting a VM that is already deleted");
            return Ok(());
        };

        cancellable(cancel, session.compute.delete_instance(&instance))
            .await
            .map_err(|e| wrap(e, |e| Error::delete(format!("error deleting Openstack instance: {}", e))))?;
        info!(machine = %machine.key(), instance_id = %instance.id, "Deleted instance");

        self.recorder
            .emit_event(MachineEvent::normal(machine, "Deleted", "Deleted"));
        Ok(())
    }

    /// Session, spec and infrastructure name for an update; validation
    /// failures are update errors here
    async fn prepare_update(
        &self,
        cancel: &CancellationToken,
        machine: &Machine,
    ) -> Result<(CloudSession, OpenstackProviderSpec, String)> {
        let session = cancellable(cancel, self.provider.resolve(machine)).await?;
        let spec = machine
            .provider_spec()
            .map_err(|e| wrap(e, |e| Error::update(e.to_string())))?;
        self.validate(cancel, &session, &spec)
            .await
            .map_err(|e| wrap(e, |e| Error::update(format!("Machine validation failed: {}", e))))?;

        let infra_name = cancellable(cancel, self.cluster.infrastructure_name()).await?;
        Ok((session, spec, infra_name))
    }

    /// First observation of a machine whose instance predates the actuator
    async fn bootstrap_observed_state(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        machine: &mut Machine,
        spec: &OpenstackProviderSpec,
        infra_name: &str,
    ) -> Result<()> {
        match self.lookup(cancel, session, &machine.name, spec).await? {
            Some(instance) if instance.status == ACTIVE_STATUS => {
                info!(machine = %machine.key(), instance_id = %instance.id, "Populating current state for bootstrap machine");
                self.recorder
                    .record_instance(cancel, session, machine, spec, &instance, infra_name)
                    .await
            }
            _ => Err(Error::update(format!(
                "Cannot retrieve current state to update machine {}",
                machine.name
            ))),
        }
    }

    /// Check that the image, flavor and availability zone exist
    async fn validate(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        spec: &OpenstackProviderSpec,
    ) -> Result<()> {
        let compute = &session.compute;

        if spec.root_volume.is_none() && !cancellable(cancel, compute.image_exists(&spec.image)).await? {
            return Err(Error::not_found(format!("image {}", spec.image)));
        }
        if !cancellable(cancel, compute.flavor_exists(&spec.flavor)).await? {
            return Err(Error::not_found(format!("flavor {}", spec.flavor)));
        }
        if !spec.availability_zone.is_empty()
            && !cancellable(cancel, compute.availability_zone_exists(&spec.availability_zone)).await?
        {
            return Err(Error::not_found(format!(
                "availability zone {}",
                spec.availability_zone
            )));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        name: &str,
        spec: &OpenstackProviderSpec,
    ) -> Result<Option<Instance>> {
        let opts = InstanceListOpts::for_machine(name, spec);
        let instances = cancellable(cancel, session.compute.list_instances(&opts)).await?;
        Ok(instances.into_iter().next())
    }

    async fn attach_floating_ip(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        cluster_name: &str,
        address: &str,
        instance: &Instance,
    ) -> Result<()> {
        let floating_ip = cancellable(
            cancel,
            session.network.get_or_create_floating_ip(cluster_name, address),
        )
        .await
        .map_err(|e| wrap(e, |e| Error::create(format!("Get floatingIP err: {}", e))))?;

        let port = cancellable(cancel, session.compute.management_port(instance))
            .await
            .map_err(|e| wrap(e, |e| Error::create(format!("Get management port err: {}", e))))?;

        cancellable(
            cancel,
            session.network.associate_floating_ip(&floating_ip, &port.id),
        )
        .await
        .map_err(|e| wrap(e, |e| Error::create(format!("Associate floatingIP err: {}", e))))?;

        info!(instance_id = %instance.id, floating_ip = %floating_ip.address, "Associated floating IP");
        Ok(())
    }

    /// Wait until the instance recorded for `old` is gone
    async fn wait_for_deletion(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        old: &Machine,
    ) -> Result<()> {
        let spec = old.provider_spec()?;
        let opts = InstanceListOpts::for_machine(&old.name, &spec);
        let compute = &session.compute;
        let opts = &opts;

        poll_until(
            cancel,
            self.delete_wait,
            &format!("instance of machine {} to be deleted", old.name),
            move || async move { compute.list_instances(opts).await.map(|found| found.is_empty()) },
        )
        .await
    }
}

/// Re-classify a recoverable error; cancellation and fatal errors pass through
fn wrap(err: Error, classify: impl FnOnce(Error) -> Error) -> Error {
    if err.bypasses_status() {
        err
    } else {
        classify(err)
    }
}
