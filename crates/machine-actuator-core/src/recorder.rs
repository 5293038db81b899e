//! State recorder and error funnel
//!
//! Everything the actuator persists goes through here:
//!
//! - [`Recorder::record_instance`] writes the identity, primary address and
//!   lifecycle state of a live instance onto the machine, plus the observed
//!   snapshot and placement labels, then refreshes the status addresses
//! - [`Recorder::fail`] is the single path for terminal failures: it emits the
//!   failure event, sets the status error, then marks the lifecycle state as
//!   `ERROR` and hands the original error back
//!
//! Writes use optimistic concurrency. On a conflict the record is re-fetched
//! and the same change is applied again, up to `conflict_retries` attempts.

use crate::address::{instance_ipv4_addresses, resolve_primary_ip};
use crate::annotations::{mark_error, InstanceAnnotations, ObservedMachine};
use crate::engine::{EventAction, EventKind, MachineEvent};
use crate::error::{Error, Result};
use crate::machine::{Machine, OpenstackProviderSpec};
use crate::poll::cancellable;
use crate::traits::{CloudSession, Instance, InstanceListOpts, MachineStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which part of the record a write touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Metadata,
    Status,
}

/// Persists machine state and lifecycle events
pub struct Recorder {
    machines: Arc<dyn MachineStore>,
    conflict_retries: usize,
    event_tx: mpsc::Sender<MachineEvent>,
}

impl Recorder {
    pub fn new(
        machines: Arc<dyn MachineStore>,
        conflict_retries: usize,
        event_tx: mpsc::Sender<MachineEvent>,
    ) -> Self {
        Self {
            machines,
            conflict_retries,
            event_tx,
        }
    }

    /// Fetch the current record for `machine`
    pub async fn refetch(&self, cancel: &CancellationToken, machine: &Machine) -> Result<Machine> {
        cancellable(cancel, self.machines.get(&machine.namespace, &machine.name))
            .await?
            .ok_or_else(|| Error::not_found(format!("machine {}", machine.key())))
    }

    /// Record the live `instance` on `machine`
    ///
    /// The instance is looked up again first so the recorded state is never
    /// older than the write; when the lookup comes back empty the caller's
    /// copy is used.
    pub async fn record_instance(
        &self,
        cancel: &CancellationToken,
        session: &CloudSession,
        machine: &mut Machine,
        spec: &OpenstackProviderSpec,
        instance: &Instance,
        infra_name: &str,
    ) -> Result<()> {
        let opts = InstanceListOpts::for_machine(&machine.name, spec);
        let fresh = cancellable(cancel, session.compute.list_instances(&opts))
            .await?
            .into_iter()
            .next();
        let instance = match fresh {
            Some(fresh) => fresh,
            None => {
                debug!(machine = %machine.key(), instance_id = %instance.id, "Instance not listed yet, recording the copy at hand");
                instance.clone()
            }
        };

        let addresses = instance_ipv4_addresses(&instance)?;
        let primary_ip = cancellable(
            cancel,
            resolve_primary_ip(
                session.network.as_ref(),
                &addresses,
                &machine.name,
                &spec.primary_subnet,
                infra_name,
            ),
        )
        .await?;
        info!(machine = %machine.key(), primary_ip = %primary_ip, "Found the primary address for the machine");

        let state = InstanceAnnotations::for_instance(&instance.id, &primary_ip, &instance.status);
        let region = session.region.clone();
        let zone = instance.availability_zone.clone();
        let flavor = spec.flavor.clone();

        // Captured from the caller's copy: a re-fetched record may already
        // carry a newer spec than the one this instance was booted with
        let mut observed = machine.clone();
        observed.set_placement_labels(&region, &zone, &flavor);
        let snapshot = ObservedMachine::capture(&observed);

        self.write(cancel, machine, Scope::Metadata, |m| {
            m.set_placement_labels(&region, &zone, &flavor);
            state.apply_to(m);
            snapshot.write(m)
        })
        .await?;

        let node_addresses = machine.node_addresses(&primary_ip);
        if machine.status.addresses != node_addresses {
            self.write(cancel, machine, Scope::Status, |m| {
                m.status.addresses = node_addresses.clone();
                Ok(())
            })
            .await?;
        }

        debug!(machine = %machine.key(), instance_id = %instance.id, status = %instance.status, "Recorded instance state");
        Ok(())
    }

    /// Funnel a terminal failure onto the machine and return it
    ///
    /// Cancellation and fatal errors are returned untouched. A failure to
    /// persist the error state is logged; the original error still wins.
    pub async fn fail(
        &self,
        cancel: &CancellationToken,
        machine: &mut Machine,
        action: EventAction,
        err: Error,
    ) -> Error {
        if err.bypasses_status() {
            return err;
        }

        let message = err.to_string();
        self.emit_event(MachineEvent::new(
            machine,
            EventKind::Warning,
            action.failure_reason(),
            &message,
        ));

        let reason = err.status_reason().unwrap_or(action.error_reason());
        error!(machine = %machine.key(), reason, "Machine error: {}", message);

        // Status first: a marker without a recorded reason is never left behind
        let persisted = async {
            self.write(cancel, machine, Scope::Status, |m| {
                m.status.error_reason = Some(reason.to_string());
                m.status.error_message = Some(message.clone());
                Ok(())
            })
            .await?;
            self.write(cancel, machine, Scope::Metadata, |m| {
                mark_error(m);
                Ok(())
            })
            .await
        };
        if let Err(e) = persisted.await {
            error!(machine = %machine.key(), error = %e, "Unable to update machine status");
        }

        err
    }

    /// Emit a lifecycle event
    ///
    /// A full channel drops the event with a warning.
    pub fn emit_event(&self, event: MachineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    machine = %event.machine,
                    "Event channel full, dropping {} event. Consider increasing event_channel_capacity.",
                    event.reason
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver dropped, discarding event");
            }
        }
    }

    /// Apply `mutate` to `machine` and persist it, re-fetching and re-applying
    /// on conflicts. On success `machine` is the stored record.
    async fn write<F>(
        &self,
        cancel: &CancellationToken,
        machine: &mut Machine,
        scope: Scope,
        mutate: F,
    ) -> Result<()>
    where
        F: Fn(&mut Machine) -> Result<()>,
    {
        let mut attempt = 1;
        loop {
            mutate(machine)?;
            let written = match scope {
                Scope::Metadata => cancellable(cancel, self.machines.update(machine)).await,
                Scope::Status => cancellable(cancel, self.machines.update_status(machine)).await,
            };

            match written {
                Ok(stored) => {
                    *machine = stored;
                    return Ok(());
                }
                Err(e) if e.is_conflict() && attempt < self.conflict_retries => {
                    warn!(machine = %machine.key(), attempt, ?scope, "Conflict writing machine, retrying on a fresh copy");
                    *machine = self.refetch(cancel, machine).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
