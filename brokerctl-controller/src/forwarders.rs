use brokerctl_client::BrokerManagement;
use brokerctl_core::{
    changes, AddressKind, AddressResource, Changes, ConnectorDefinition, ForwarderDirection,
    ForwarderSpec,
};
use futures::future::join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::controller_metrics::CONNECTORS_CHANGED_TOTAL;
use crate::desired_state::DesiredState;
use crate::errors::Result;

/// Connector services whose names start with this prefix belong to the broker operator.
const OVERRIDE_PREFIX: &str = "$override";

/// Delivery error handling of the forwarder connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderOptions {
    pub treat_reject_as_unmodified_delivery_failed: bool,
    pub use_modified_for_transient_delivery_errors: bool,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        ForwarderOptions {
            treat_reject_as_unmodified_delivery_failed: true,
            use_modified_for_transient_delivery_errors: true,
        }
    }
}

/// Connector backing one forwarder of `address`, `None` when the kind/direction pair has none.
///
/// Queues forward in both directions; subscriptions only forward out, reading from the
/// `<topic>::<subscription>` queue.
pub fn forwarder_connector(
    address: &AddressResource,
    forwarder: &ForwarderSpec,
    options: ForwarderOptions,
) -> Option<ConnectorDefinition> {
    let subscription = match (address.kind, forwarder.direction) {
        (AddressKind::Queue, _) => false,
        (AddressKind::Subscription, ForwarderDirection::Out) => true,
        _ => return None,
    };
    let resource_name = address.resource_name();
    let name = format!("{}.{}.{}", resource_name, forwarder.name, forwarder.direction);

    let (source_address, target_address) = match forwarder.direction {
        ForwarderDirection::Out if subscription => (
            format!(
                "{}::{}",
                address.topic.as_deref().unwrap_or_default(),
                address.address
            ),
            forwarder.remote_address.clone(),
        ),
        ForwarderDirection::Out => (address.address.clone(), forwarder.remote_address.clone()),
        ForwarderDirection::In => (forwarder.remote_address.clone(), address.address.clone()),
    };

    Some(ConnectorDefinition {
        name: name.clone(),
        cluster_id: Some(resource_name.to_string()),
        container_id: Some(resource_name.to_string()),
        link_name: Some(name),
        source_address: Some(source_address),
        target_address: Some(target_address),
        direction: Some(forwarder.direction),
        consumer_priority: forwarder.priority,
        treat_reject_as_unmodified_delivery_failed: Some(
            options.treat_reject_as_unmodified_delivery_failed,
        ),
        use_modified_for_transient_delivery_errors: Some(
            options.use_modified_for_transient_delivery_errors,
        ),
    })
}

/// Connectors the desired state calls for, sorted by name. Duplicate names keep the first.
pub fn desired_connectors(desired: &DesiredState, options: ForwarderOptions) -> Vec<ConnectorDefinition> {
    let mut connectors: BTreeMap<String, ConnectorDefinition> = BTreeMap::new();
    for address in desired.iter() {
        for forwarder in &address.forwarders {
            let Some(connector) = forwarder_connector(address, forwarder, options) else {
                continue;
            };
            if connectors.contains_key(&connector.name) {
                warn!(connector = %connector.name, "duplicate forwarder name");
                continue;
            }
            connectors.insert(connector.name.clone(), connector);
        }
    }
    connectors.into_values().collect()
}

/// Brings the broker's connector services in line with `desired` (sorted by name).
///
/// Connectors are compared by name only: removed ones are destroyed first, then missing ones
/// created. Individual failures are logged; only a failure to list the connectors fails the
/// call.
pub async fn sync_forwarders(
    broker: &BrokerManagement,
    desired: &[ConnectorDefinition],
) -> Result<Changes<ConnectorDefinition>> {
    let id = broker.id();
    let id = id.as_str();
    debug!(%id, desired = desired.len(), "synchronizing connectors");
    let mut names: Vec<String> = broker
        .get_connector_services()
        .await
        .inspect_err(|e| error!(%id, error = %e, "failed to retrieve connectors"))?
        .into_iter()
        .filter(|name| !name.starts_with(OVERRIDE_PREFIX))
        .collect();
    names.sort();
    let actual: Vec<ConnectorDefinition> = names.into_iter().map(ConnectorDefinition::named).collect();

    let diff = changes(Some(actual.as_slice()), desired, |a, b| a.name.cmp(&b.name));
    if diff.is_empty() {
        debug!(%id, "all connectors exist");
        return Ok(diff);
    }
    info!(
        %id,
        missing = diff.added.len(),
        removed = diff.removed.len(),
        "synchronizing connectors"
    );

    join_all(diff.removed.iter().map(|connector| async move {
        info!(%id, connector = %connector.name, "deleting connector");
        match broker.destroy_connector_service(&connector.name).await {
            Ok(()) => {
                counter!(CONNECTORS_CHANGED_TOTAL.name, "operation" => "destroy").increment(1);
                info!(%id, connector = %connector.name, "deleted connector");
            }
            Err(e) => error!(%id, connector = %connector.name, error = %e, "failed to delete connector"),
        }
    }))
    .await;

    join_all(diff.added.iter().map(|connector| async move {
        info!(%id, connector = ?connector, "creating connector");
        match broker.create_connector_service(connector).await {
            Ok(()) => {
                counter!(CONNECTORS_CHANGED_TOTAL.name, "operation" => "create").increment(1);
                info!(%id, connector = %connector.name, "created connector");
            }
            Err(e) => error!(%id, connector = %connector.name, error = %e, "failed to create connector"),
        }
    }))
    .await;

    Ok(diff)
}
