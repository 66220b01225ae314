//! Typed management operations against the in-memory broker

use brokerctl_client::{ConnectionInfo, ConsumerInfo, ManagementError, ProducerInfo, Routing, SessionInfo};
use brokerctl_core::{AddressKind, AddressSettings, ConnectorDefinition, ForwarderDirection};

mod common;

/// Queues are listed with their attributes type corrected and merged into their address;
/// management reply queues show up like any other queue.
#[tokio::test]
async fn queue_lifecycle() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;

    management.create_queue("q1").await?;
    broker.update_queue("q1", |q| {
        q.messages = 3;
        q.enqueued = 7;
    });

    let names = management.get_queue_names().await?;
    assert!(names.contains(&"q1".to_string()));
    assert!(names.iter().any(|n| n.starts_with("activemq.management.tmpreply.")));

    let queues = management.list_queues().await?;
    let q1 = queues.iter().find(|q| q.name == "q1").unwrap();
    assert!(q1.durable && q1.is_anycast());
    assert_eq!((q1.messages, q1.enqueued, q1.max_consumers), (3, 7, -1));

    let index = management.address_index(false, false).await?;
    let entry = index.get("q1").unwrap();
    assert_eq!(entry.kind, Some(AddressKind::Queue));
    assert_eq!(entry.queue.as_ref().unwrap().messages, 3);

    assert_eq!(management.purge_queue("q1").await?, serde_json::json!(3));
    management.destroy_queue("q1").await?;
    assert!(broker.queue("q1").is_none());
    assert!(!broker.has_address("q1"));

    let err = management.destroy_queue("q1").await.unwrap_err();
    assert!(matches!(err, ManagementError::OperationFailed(body) if body.contains("AMQ229017")));
    Ok(())
}

/// Topics are addresses; subscriptions are durable MULTICAST queues on them.
#[tokio::test]
async fn topics_and_subscriptions() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;

    management.create_address("t1", &[Routing::Multicast]).await?;
    management.create_subscription("s1", "t1", 2).await?;
    assert_eq!(broker.queue("s1").unwrap().max_consumers, 2);

    // a subscription on a missing topic is refused
    assert!(management.create_subscription("s2", "nope", 1).await.is_err());

    let index = management.address_index(true, true).await?;
    assert_eq!(index.get("t1").unwrap().kind, Some(AddressKind::Topic));
    assert_eq!(index.get("s1").unwrap().kind, Some(AddressKind::Subscription));
    assert_eq!(index.address_of("s1"), Some("t1"));
    assert_eq!(
        index.get("t1").unwrap().topic_stats.as_ref().unwrap().subscription_count,
        1
    );

    assert_eq!(management.get_bound_queues("t1").await?, vec!["s1".to_string()]);
    assert!(management.delete_address("t1").await.is_err());
    management.delete_address_and_bindings("t1").await?;
    assert!(!broker.has_address("t1"));
    assert!(!management.get_address_names().await?.contains(&"t1".to_string()));
    Ok(())
}

/// Address settings round-trip; the broker omits unset dead letter and expiry addresses.
#[tokio::test]
async fn address_settings_round_trip() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;

    let root = management.get_address_settings("#").await?;
    assert_eq!(root.dla(), Some("DLQ"));

    let mut settings = AddressSettings::new();
    settings.set_max_size_bytes(2048);
    management.add_address_settings("orders", &settings).await?;
    assert_eq!(broker.address_settings("orders").unwrap().max_size_bytes(), Some(2048));

    let fetched = management.get_address_settings("orders").await?;
    assert_eq!(fetched.max_size_bytes(), Some(2048));
    assert_eq!(fetched.get("DLA"), Some(&serde_json::Value::Null));

    management.remove_address_settings("orders").await?;
    assert_eq!(management.get_address_settings("orders").await?, root);
    Ok(())
}

/// Diverts and connector services are only created when missing.
#[tokio::test]
async fn ensure_operations_are_idempotent() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;

    management.ensure_divert("d1", "a", "b").await?;
    management.ensure_divert("d1", "a", "b").await?;
    assert!(management.find_divert("d1").await?);
    assert_eq!(broker.divert_names(), vec!["d1".to_string()]);
    management.destroy_divert("d1").await?;
    assert!(management.get_divert_names().await?.is_empty());

    let connector = ConnectorDefinition {
        source_address: Some("q1".to_string()),
        target_address: Some("remote/q1".to_string()),
        direction: Some(ForwarderDirection::Out),
        ..ConnectorDefinition::named("q1.f1.out")
    };
    management.ensure_connector_service(&connector).await?;
    management.ensure_connector_service(&connector).await?;
    assert_eq!(management.get_connector_services().await?, vec!["q1.f1.out".to_string()]);
    let params = broker.connector_parameters("q1.f1.out").unwrap();
    assert_eq!(params["sourceAddress"], serde_json::json!("q1"));

    management.destroy_connector_service("q1.f1.out").await?;
    assert!(!management.find_connector_service("q1.f1.out").await?);

    let creates = common::operations(&broker)
        .iter()
        .filter(|op| op.as_str() == "createConnectorService")
        .count();
    assert_eq!(creates, 1);
    Ok(())
}

/// Connection, session, producer and consumer listings decode from their JSON documents.
#[tokio::test]
async fn connection_listings() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;
    broker.add_connection(ConnectionInfo {
        connection_id: "c1".to_string(),
        client_address: "10.0.0.5:41000".to_string(),
        creation_time: Some(1_600_000_000_000),
        sessions: vec![SessionInfo {
            session_id: "s1".to_string(),
            principal: Some("alice".to_string()),
            ..Default::default()
        }],
    });
    broker.add_producer(ProducerInfo {
        connection_id: "c1".to_string(),
        session_id: "s1".to_string(),
        destination: "q1".to_string(),
        msg_sent: 4,
    });
    broker.add_consumer(ConsumerInfo {
        consumer_id: "0".to_string(),
        connection_id: "c1".to_string(),
        session_id: "s1".to_string(),
        queue_name: "q1".to_string(),
    });

    let connections = management.list_connections_with_sessions().await?;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].sessions[0].principal.as_deref(), Some("alice"));
    assert_eq!(management.list_producers().await?[0].msg_sent, 4);
    assert_eq!(management.list_consumers().await?[0].queue_name, "q1");

    assert!(management.close_connection("c1").await?);
    assert!(management.list_connections().await?.is_empty());

    broker.set_global_max_size(1000);
    assert_eq!(management.get_global_max_size().await?, 1000);
    Ok(())
}

/// A dropped connection fails outstanding requests; after reconnecting the client provisions a
/// new reply queue and carries on.
#[tokio::test]
async fn survives_reconnect() -> anyhow::Result<()> {
    let (broker, management) = common::connected().await?;
    broker.set_auto_credit(false);
    broker.disconnect();
    while management.client().is_ready() {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    broker.reconnect();
    broker.grant_credit(10);
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        management.client().wait_ready(),
    )
    .await??;

    management.create_queue("after").await?;
    assert!(broker.queue("after").is_some());

    let reply_queues: Vec<_> = management
        .get_queue_names()
        .await?
        .into_iter()
        .filter(|n| n.starts_with("activemq.management.tmpreply."))
        .collect();
    assert_eq!(reply_queues.len(), 2);
    Ok(())
}

/// Many concurrent callers over a link with a single credit: every request is eventually sent
/// and every caller gets the reply to its own request.
#[tokio::test]
async fn concurrent_callers_under_tight_credit() -> anyhow::Result<()> {
    use brokerctl_client::{BrokerManagement, ClientOptions, MemoryBroker};

    let broker = MemoryBroker::with_credit_window(1);
    let management = BrokerManagement::new(broker.client(ClientOptions::default()));
    let names: Vec<String> = (0..20).map(|i| format!("q{:02}", i)).collect();

    let created = futures::future::join_all(names.iter().map(|n| management.create_queue(n))).await;
    assert!(created.iter().all(|r| r.is_ok()));

    let bound = futures::future::join_all(names.iter().map(|n| management.get_bound_queues(n))).await;
    for (name, queues) in names.iter().zip(bound) {
        assert_eq!(queues?, vec![name.clone()]);
    }
    assert_eq!(management.client().pending_len(), 0);
    Ok(())
}
