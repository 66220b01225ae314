//! Reconciliation of addresses, settings and forwarders against the in-memory broker

use brokerctl_controller::ControllerEvent;
use brokerctl_core::{
    AddressKind, AddressResource, ForwarderDirection, ForwarderSpec, PlanAllocation, PolicyIntent,
};
use std::collections::BTreeMap;

mod common;

/// A queue is created when it appears in the desired state and deleted, address included,
/// when it disappears again.
#[tokio::test]
async fn queue_is_created_then_deleted() -> anyhow::Result<()> {
    let mut harness = common::started().await?;

    harness
        .controller
        .addresses_defined(vec![AddressResource::queue("q1")])
        .await?;
    assert!(harness.broker.queue("q1").is_some());
    assert_eq!(harness.event_names()[..2], ["address_create", "synchronized"]);

    harness.controller.addresses_defined(Vec::new()).await?;
    assert!(harness.broker.queue("q1").is_none());
    assert!(!harness.broker.has_address("q1"));
    let names = harness.event_names();
    assert_eq!(names[..3], ["desynchronized", "address_delete", "synchronized"]);
    Ok(())
}

/// In a single pass the topic address is created before the subscription bound to it.
#[tokio::test]
async fn topic_is_created_before_its_subscription() -> anyhow::Result<()> {
    let harness = common::started().await?;

    harness
        .controller
        .addresses_defined(vec![
            AddressResource::subscription("s1", "t1"),
            AddressResource::topic("t1"),
        ])
        .await?;

    let operations = harness.operations();
    let topic = operations.iter().position(|op| op == "createAddress").unwrap();
    let subscription = operations.iter().position(|op| op == "createQueue").unwrap();
    assert!(topic < subscription, "{:?}", operations);

    let s1 = harness.broker.queue("s1").unwrap();
    assert_eq!(s1.address, "t1");
    assert_eq!(s1.routing_type, "MULTICAST");
    Ok(())
}

/// Once synchronized, another check changes nothing on the broker.
#[tokio::test]
async fn synchronized_broker_is_left_untouched() -> anyhow::Result<()> {
    let mut harness = common::started().await?;
    let mut shares = BTreeMap::new();
    shares.insert("broker".to_string(), 0.1);
    let queue = AddressResource::queue("q1").with_policy(PolicyIntent {
        plan: Some(PlanAllocation {
            resources: shares,
            partitions: None,
        }),
        ..Default::default()
    });

    harness
        .controller
        .addresses_defined(vec![
            queue,
            AddressResource::topic("t1"),
            AddressResource::subscription("s1", "t1"),
        ])
        .await?;
    assert!(harness.broker.address_settings("q1").is_some());
    harness.events();
    harness.broker.clear_calls();

    harness.controller.check_broker_addresses().await?;

    let changing = [
        "createQueue",
        "createAddress",
        "destroyQueue",
        "deleteAddress",
        "addAddressSettings",
        "removeAddressSettings",
        "createConnectorService",
        "destroyConnectorService",
    ];
    let operations = harness.operations();
    assert!(
        !operations.iter().any(|op| changing.contains(&op.as_str())),
        "{:?}",
        operations
    );
    assert_eq!(
        harness.event_names(),
        vec!["address_stats_retrieved", "connection_stats_retrieved"]
    );
    Ok(())
}

/// Forwarders are created and destroyed by name; operator-owned connectors stay.
#[tokio::test]
async fn forwarders_follow_the_desired_state() -> anyhow::Result<()> {
    let harness = common::started().await?;
    harness.broker.add_connector_service("$override.bridge");
    harness.broker.add_connector_service("old.f1.out");

    let queue = AddressResource::queue("q1").with_forwarder(ForwarderSpec {
        name: "f1".to_string(),
        remote_address: "remote/q1".to_string(),
        direction: ForwarderDirection::Out,
        priority: None,
    });
    harness.controller.addresses_defined(vec![queue]).await?;

    assert_eq!(
        harness.broker.connector_names(),
        vec!["$override.bridge", "q1.f1.out"]
    );
    let parameters = harness.broker.connector_parameters("q1.f1.out").unwrap();
    assert_eq!(parameters["host"], "messaging.svc");
    assert_eq!(parameters["sourceAddress"], "q1");
    assert_eq!(parameters["targetAddress"], "remote/q1");
    assert_eq!(parameters["direction"], "out");
    Ok(())
}

/// A desired dead-letter address is managed as such, and its deletion removes it.
#[tokio::test]
async fn deadletter_addresses_are_reconciled() -> anyhow::Result<()> {
    let mut harness = common::started().await?;

    harness
        .controller
        .addresses_defined(vec![AddressResource::deadletter("dlq1")])
        .await?;
    let created = harness.events();
    assert!(matches!(
        &created[0],
        ControllerEvent::AddressCreate(a) if a.kind == AddressKind::DeadLetter
    ));

    harness.controller.addresses_defined(Vec::new()).await?;
    assert!(harness.broker.queue("dlq1").is_none());
    Ok(())
}
