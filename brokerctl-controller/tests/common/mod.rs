//! Shared helpers for the controller integration tests

use brokerctl_client::{BrokerManagement, ClientOptions, ConnectorEndpoint, MemoryBroker};
use brokerctl_controller::{
    AddressSpaceInfo, BrokerController, ChannelSink, ControllerEvent, EngineConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub broker: Arc<MemoryBroker>,
    pub controller: Arc<BrokerController>,
    pub events: UnboundedReceiver<ControllerEvent>,
}

impl Harness {
    /// Drains the events posted so far.
    pub fn events(&mut self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn event_names(&mut self) -> Vec<&'static str> {
        self.events().iter().map(ControllerEvent::name).collect()
    }

    /// Management operations received since the last `clear_calls`.
    pub fn operations(&self) -> Vec<String> {
        self.broker.calls().into_iter().map(|(_, op)| op).collect()
    }
}

/// A started controller on a fresh in-memory broker, with a 100MiB budget.
pub async fn started() -> anyhow::Result<Harness> {
    started_with(EngineConfig {
        global_max_size: 100 * 1024 * 1024,
        ..Default::default()
    })
    .await
}

pub async fn started_with(config: EngineConfig) -> anyhow::Result<Harness> {
    let broker = MemoryBroker::new();
    let management = BrokerManagement::new(broker.client(ClientOptions::default()))
        .with_connector_endpoint(ConnectorEndpoint {
            host: Some("messaging.svc".to_string()),
            port: Some("5671".to_string()),
        });
    let (sink, events) = ChannelSink::channel();
    let controller = Arc::new(BrokerController::new(
        management,
        config,
        AddressSpaceInfo {
            name: "space".to_string(),
            namespace: "ns".to_string(),
            space_type: "brokered".to_string(),
        },
        Arc::new(sink),
    ));
    controller.start().await?;
    let mut harness = Harness {
        broker,
        controller,
        events,
    };
    harness.events();
    harness.broker.clear_calls();
    Ok(harness)
}
