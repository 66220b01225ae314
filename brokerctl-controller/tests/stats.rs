//! Stats harvested by the controller after each check

use brokerctl_client::{ConnectionInfo, ConsumerInfo, ProducerInfo, SessionInfo};
use brokerctl_controller::ControllerEvent;
use brokerctl_core::AddressResource;

mod common;

/// Address and connection stats are posted after a check, internal connections left out.
#[tokio::test]
async fn stats_are_posted_after_a_check() -> anyhow::Result<()> {
    let mut harness = common::started().await?;
    harness
        .controller
        .addresses_defined(vec![AddressResource::queue("q1")])
        .await?;
    harness.events();

    harness.broker.update_queue("q1", |q| {
        q.messages = 2;
        q.enqueued = 5;
        q.acknowledged = 3;
    });
    for (id, principal) in [("c1", "alice"), ("c2", "agent.abc")] {
        harness.broker.add_connection(ConnectionInfo {
            connection_id: id.to_string(),
            client_address: "10.0.0.7:5672".to_string(),
            creation_time: Some(1_700_000_000_000),
            sessions: vec![SessionInfo {
                session_id: format!("{}-s", id),
                principal: Some(principal.to_string()),
                ..Default::default()
            }],
        });
    }
    harness.broker.add_producer(ProducerInfo {
        connection_id: "c1".to_string(),
        session_id: "c1-s".to_string(),
        destination: "q1".to_string(),
        msg_sent: 5,
    });
    harness.broker.add_consumer(ConsumerInfo {
        consumer_id: "1".to_string(),
        connection_id: "c1".to_string(),
        session_id: "c1-s".to_string(),
        queue_name: "q1".to_string(),
    });

    harness.controller.check_broker_addresses().await?;

    let events = harness.events();
    let addresses = events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::AddressStatsRetrieved(stats) => Some(stats.clone()),
            _ => None,
        })
        .unwrap();
    let q1 = &addresses["q1"];
    assert_eq!((q1.depth, q1.messages_in, q1.messages_out), (2, 5, 3));
    assert_eq!(q1.senders, 1);
    assert_eq!(q1.outcomes.egress.links.len(), 1);

    let connections = events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::ConnectionStatsRetrieved(stats) => Some(stats.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(connections.keys().collect::<Vec<_>>(), vec!["c1"]);
    let c1 = &connections["c1"];
    assert_eq!(c1.user, "alice");
    assert_eq!(c1.address_space, "space");
    assert_eq!(c1.messages_in, 5);
    assert_eq!(c1.receivers.len(), 1);
    Ok(())
}

/// A connection listed in the stats can be closed through the controller.
#[tokio::test]
async fn connections_can_be_closed() -> anyhow::Result<()> {
    let harness = common::started().await?;
    harness.broker.add_connection(ConnectionInfo {
        connection_id: "c1".to_string(),
        client_address: "10.0.0.7:5672".to_string(),
        creation_time: None,
        sessions: Vec::new(),
    });

    assert!(harness.controller.close_connection("c1").await?);
    let stats = harness.controller.stats().retrieve().await?;
    assert!(stats.connections.is_empty());
    Ok(())
}
