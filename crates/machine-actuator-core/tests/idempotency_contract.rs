//! Contract Test: Create/Delete Idempotency
//!
//! The control loop may call any operation again at any time. This test
//! verifies that repeating an operation never duplicates cloud resources.
//!
//! Constraints verified:
//! - Create twice yields exactly one live instance
//! - Delete without a live instance succeeds with no side effects
//! - A recorded instance that vanished is never silently recreated
//! - The cluster label is checked before any cloud call
//!
//! If this test fails, repeated reconciliation can leak or resurrect instances.

mod common;

use common::*;
use machine_actuator_core::annotations::{
    ERROR_STATE, INSTANCE_ID_ANNOTATION, INSTANCE_STATE_ANNOTATION, INSTANCE_STATUS_ANNOTATION,
    PRIMARY_IP_ANNOTATION,
};
use machine_actuator_core::machine::{
    CLUSTER_LABEL, INSTANCE_TYPE_LABEL, NodeAddressType, REGION_LABEL, ZONE_LABEL,
};
use machine_actuator_core::{EventKind, Error, ObservedMachine};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn create_twice_yields_one_instance() {
    let mut harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;

    assert_ok!(harness.actuator.create(&cancel, &mut machine).await);
    assert_ok!(harness.actuator.create(&cancel, &mut machine).await);

    assert_eq!(harness.cloud.create_call_count(), 1);
    assert_eq!(
        harness.cloud.live_instances(),
        vec![("worker-0".to_string(), "m1.small".to_string())]
    );

    let events = harness.drain_events();
    assert_eq!(reasons(&events), vec!["Created"]);
    assert_eq!(events[0].kind, EventKind::Normal);
    assert_eq!(events[0].message, "Created machine worker-0");
}

#[tokio::test]
async fn create_records_instance_state() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;

    assert_ok!(harness.actuator.create(&cancel, &mut machine).await);

    let stored = harness.stored("worker-0").await;
    assert_eq!(stored.annotations[INSTANCE_ID_ANNOTATION], "instance-1");
    assert_eq!(stored.annotations[PRIMARY_IP_ANNOTATION], "10.0.0.1");
    assert_eq!(stored.annotations[INSTANCE_STATE_ANNOTATION], "ACTIVE");
    assert!(stored.annotations.contains_key(INSTANCE_STATUS_ANNOTATION));

    assert_eq!(stored.labels[REGION_LABEL], REGION);
    assert_eq!(stored.labels[ZONE_LABEL], "nova");
    assert_eq!(stored.labels[INSTANCE_TYPE_LABEL], "m1.small");

    let types: Vec<NodeAddressType> = stored.status.addresses.iter().map(|a| a.address_type).collect();
    assert_eq!(
        types,
        vec![NodeAddressType::InternalIP, NodeAddressType::Hostname, NodeAddressType::InternalDNS]
    );
    assert_eq!(stored.status.addresses[0].address, "10.0.0.1");

    let snapshot = ObservedMachine::read(&stored).expect("snapshot recorded");
    assert_eq!(snapshot.spec, stored.spec);

    let request = &harness.cloud.created_requests()[0];
    assert_eq!(request.cluster_name, format!("{}-{}", NAMESPACE, INFRA_NAME));
    assert!(!request.control_plane);
    assert_eq!(request.user_data, "");
}

#[tokio::test]
async fn delete_without_instance_has_no_side_effects() {
    let mut harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;
    let before = machine.clone();

    assert_ok!(harness.actuator.delete(&cancel, &mut machine).await);

    assert_eq!(harness.cloud.delete_call_count(), 0);
    assert!(harness.drain_events().is_empty());
    assert_eq!(harness.stored("worker-0").await, before);
}

#[tokio::test]
async fn delete_removes_the_instance_once() {
    let mut harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;
    assert_ok!(harness.actuator.create(&cancel, &mut machine).await);

    assert_ok!(harness.actuator.delete(&cancel, &mut machine).await);
    assert_ok!(harness.actuator.delete(&cancel, &mut machine).await);

    assert_eq!(harness.cloud.delete_call_count(), 1);
    assert!(harness.cloud.live_instances().is_empty());
    assert_eq!(reasons(&harness.drain_events()), vec!["Created", "Deleted"]);
}

#[tokio::test]
async fn vanished_instance_is_not_resurrected() {
    let mut harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = worker_machine("worker-0", "m1.small");
    machine
        .annotations
        .insert(INSTANCE_ID_ANNOTATION.to_string(), "instance-gone".to_string());
    let mut machine = harness.store(machine).await;

    let err = assert_err!(harness.actuator.create(&cancel, &mut machine).await);
    assert!(matches!(err, Error::InvalidConfiguration(_)), "got {err:?}");
    assert_eq!(harness.cloud.create_call_count(), 0);

    let stored = harness.stored("worker-0").await;
    assert_eq!(stored.annotations[INSTANCE_STATE_ANNOTATION], ERROR_STATE);
    assert_eq!(stored.status.error_reason.as_deref(), Some("InvalidConfiguration"));

    let events = harness.drain_events();
    assert_eq!(reasons(&events), vec!["FailedCreate"]);
    assert_eq!(events[0].kind, EventKind::Warning);
}

#[tokio::test]
async fn wrong_cluster_label_fails_before_any_cloud_call() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = worker_machine("worker-0", "m1.small");
    machine
        .labels
        .insert(CLUSTER_LABEL.to_string(), "some-other-cluster".to_string());
    let mut machine = harness.store(machine).await;

    let err = assert_err!(harness.actuator.create(&cancel, &mut machine).await);
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert!(err.to_string().contains("cannot join cluster"));

    assert_eq!(harness.cloud.resolve_call_count(), 0);
    assert_eq!(harness.cloud.list_call_count(), 0);
    assert_eq!(harness.cloud.create_call_count(), 0);
}

#[tokio::test]
async fn exists_follows_the_cloud() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;

    assert!(!harness.actuator.exists(&cancel, &machine).await.unwrap());
    assert_ok!(harness.actuator.create(&cancel, &mut machine).await);
    assert!(harness.actuator.exists(&cancel, &machine).await.unwrap());
}

#[tokio::test]
async fn cancelled_create_touches_nothing() {
    let mut harness = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut machine = harness.store(worker_machine("worker-0", "m1.small")).await;
    let before = machine.clone();

    let err = assert_err!(harness.actuator.create(&cancel, &mut machine).await);
    assert!(matches!(err, Error::Cancelled));

    assert_eq!(harness.cloud.create_call_count(), 0);
    assert!(harness.drain_events().is_empty());
    assert_eq!(harness.stored("worker-0").await, before);
}
