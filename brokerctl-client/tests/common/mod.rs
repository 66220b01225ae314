//! Shared helpers for the management client integration tests

use brokerctl_client::{BrokerManagement, ClientOptions, MemoryBroker};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// A fresh in-memory broker and a ready management handle connected to it.
pub async fn connected() -> anyhow::Result<(Arc<MemoryBroker>, BrokerManagement)> {
    let broker = MemoryBroker::new();
    let client = broker.client(ClientOptions::default());
    timeout(Duration::from_secs(5), client.wait_ready()).await??;
    Ok((broker, BrokerManagement::new(client)))
}

pub fn operations(broker: &MemoryBroker) -> Vec<String> {
    broker.calls().into_iter().map(|(_, op)| op).collect()
}
