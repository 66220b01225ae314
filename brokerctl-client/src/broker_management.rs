use brokerctl_core::{AddressSettings, ConnectorDefinition};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::address_index::AddressIndex;
use crate::errors::{ManagementError, Result};
use crate::management_client::ManagementClient;
use crate::records::{
    normalize_queue_record, BrokerAddress, BrokerQueue, ConnectionInfo, ConsumerInfo,
    ProducerInfo, SessionInfo, ANYCAST, MULTICAST,
};

const BROKER: &str = "broker";

/// Paging arguments of the list operations: an empty filter, the first page, every entry.
const LIST_FILTER: &str =
    r#"{"field":"","operation":"","value":"","sortOrder":"","sortBy":"","sortColumn":""}"#;
const LIST_PAGE: i64 = 1;
const LIST_PAGE_SIZE: i64 = 2147483647;

/// Factory class of the broker side AMQP connector service.
pub const CONNECTOR_FACTORY: &str =
    "org.apache.activemq.artemis.integration.amqp.AMQPConnectorServiceFactory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Anycast,
    Multicast,
}

/// Where connector services open their outgoing connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorEndpoint {
    pub host: Option<String>,
    pub port: Option<String>,
}

/// Typed broker management operations on top of a [`ManagementClient`].
#[derive(Clone)]
pub struct BrokerManagement {
    client: ManagementClient,
    endpoint: ConnectorEndpoint,
}

impl BrokerManagement {
    pub fn new(client: ManagementClient) -> Self {
        BrokerManagement {
            client,
            endpoint: ConnectorEndpoint::default(),
        }
    }

    pub fn with_connector_endpoint(mut self, endpoint: ConnectorEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn client(&self) -> &ManagementClient {
        &self.client
    }

    pub fn id(&self) -> String {
        self.client.id()
    }

    async fn broker(&self, operation: &str, parameters: Vec<Value>) -> Result<Value> {
        self.client.call(BROKER, operation, parameters).await
    }

    // -- queues

    /// Durable ANYCAST queue named after its address, the address created on demand.
    pub async fn create_queue(&self, name: &str) -> Result<()> {
        self.broker(
            "createQueue",
            vec![
                json!(name),
                json!(ANYCAST),
                json!(name),
                Value::Null,
                json!(true),
                json!(-1),
                json!(false),
                json!(true),
            ],
        )
        .await
        .map(drop)
    }

    /// Durable MULTICAST queue `name` on the existing topic address.
    pub async fn create_subscription(&self, name: &str, topic: &str, max_consumers: i64) -> Result<()> {
        self.broker(
            "createQueue",
            vec![
                json!(topic),
                json!(MULTICAST),
                json!(name),
                Value::Null,
                json!(true),
                json!(max_consumers),
                json!(false),
                json!(false),
            ],
        )
        .await
        .map(drop)
    }

    /// Destroys the queue, removing its consumers and its address when left empty.
    pub async fn destroy_queue(&self, name: &str) -> Result<()> {
        self.broker("destroyQueue", vec![json!(name), json!(true), json!(true)])
            .await
            .map(drop)
    }

    pub async fn purge_queue(&self, name: &str) -> Result<Value> {
        self.client
            .call(&format!("queue.{}", name), "removeMessages", vec![Value::Null])
            .await
    }

    pub async fn get_queue_names(&self) -> Result<Vec<String>> {
        let names = self.broker("getQueueNames", vec![]).await?;
        from_reply(names)
    }

    pub async fn list_queues(&self) -> Result<Vec<BrokerQueue>> {
        let reply = self.broker("listQueues", list_arguments()).await?;
        Ok(listing_data(reply)?
            .into_iter()
            .map(|record| BrokerQueue::from_record(&normalize_queue_record(record)))
            .collect())
    }

    // -- addresses

    /// Raw address listing, one entry per address with its kind derived from its routing types.
    pub async fn list_addresses(&self) -> Result<Vec<BrokerAddress>> {
        let reply = self.broker("listAddresses", list_arguments()).await?;
        Ok(listing_data(reply)?
            .iter()
            .map(BrokerAddress::from_record)
            .collect())
    }

    /// Addresses and queues merged into one index; the two listings are fetched concurrently.
    pub async fn address_index(
        &self,
        include_topic_stats: bool,
        include_reverse_index: bool,
    ) -> Result<AddressIndex> {
        let (addresses, queues) = tokio::try_join!(self.list_addresses(), self.list_queues())?;
        Ok(AddressIndex::build(
            addresses,
            queues,
            include_topic_stats,
            include_reverse_index,
        ))
    }

    pub async fn get_address_names(&self) -> Result<Vec<String>> {
        let names = self.broker("getAddressNames", vec![]).await?;
        from_reply(names)
    }

    pub async fn create_address(&self, name: &str, routing: &[Routing]) -> Result<()> {
        let mut routing_types = Vec::new();
        if routing.contains(&Routing::Anycast) {
            routing_types.push(ANYCAST);
        }
        if routing.contains(&Routing::Multicast) {
            routing_types.push(MULTICAST);
        }
        self.broker("createAddress", vec![json!(name), json!(routing_types.join(","))])
            .await
            .map(drop)
    }

    pub async fn delete_address(&self, name: &str) -> Result<()> {
        self.broker("deleteAddress", vec![json!(name)]).await.map(drop)
    }

    pub async fn get_bound_queues(&self, address: &str) -> Result<Vec<String>> {
        let names = self
            .client
            .call(&format!("address.{}", address), "getQueueNames", vec![])
            .await?;
        from_reply(names)
    }

    pub async fn delete_bindings_for(&self, address: &str) -> Result<()> {
        let queues = self.get_bound_queues(address).await?;
        try_join_all(queues.iter().map(|q| self.destroy_queue(q))).await?;
        Ok(())
    }

    pub async fn delete_address_and_bindings(&self, address: &str) -> Result<()> {
        self.delete_bindings_for(address).await?;
        self.delete_address(address).await
    }

    // -- address settings

    pub async fn add_address_settings(&self, address_match: &str, settings: &AddressSettings) -> Result<()> {
        self.broker("addAddressSettings", settings.to_parameters(address_match))
            .await
            .map(drop)
    }

    pub async fn remove_address_settings(&self, address_match: &str) -> Result<()> {
        self.broker("removeAddressSettings", vec![json!(address_match)])
            .await
            .map(drop)
    }

    /// Settings in effect for `address_match`.
    pub async fn get_address_settings(&self, address_match: &str) -> Result<AddressSettings> {
        let reply = self
            .broker("getAddressSettingsAsJSON", vec![json!(address_match)])
            .await?;
        Ok(AddressSettings::from_broker(json_reply(reply)?))
    }

    // -- diverts

    pub async fn create_divert(&self, name: &str, source: &str, target: &str) -> Result<()> {
        self.broker(
            "createDivert",
            vec![
                json!(name),
                json!(name),
                json!(source),
                json!(target),
                json!(false),
                Value::Null,
                Value::Null,
            ],
        )
        .await
        .map(drop)
    }

    pub async fn destroy_divert(&self, name: &str) -> Result<()> {
        self.broker("destroyDivert", vec![json!(name)]).await.map(drop)
    }

    pub async fn get_divert_names(&self) -> Result<Vec<String>> {
        let names = self.broker("getDivertNames", vec![]).await?;
        from_reply(names)
    }

    pub async fn find_divert(&self, name: &str) -> Result<bool> {
        Ok(self.get_divert_names().await?.iter().any(|n| n == name))
    }

    /// Creates the divert unless one with that name exists.
    pub async fn ensure_divert(&self, name: &str, source: &str, target: &str) -> Result<()> {
        if !self.find_divert(name).await? {
            self.create_divert(name, source, target).await?;
        }
        Ok(())
    }

    // -- connector services

    pub async fn create_connector_service(&self, connector: &ConnectorDefinition) -> Result<()> {
        let parameters = connector_parameters(connector, &self.endpoint);
        self.broker(
            "createConnectorService",
            vec![json!(connector.name), json!(CONNECTOR_FACTORY), Value::Object(parameters)],
        )
        .await
        .map(drop)
    }

    pub async fn destroy_connector_service(&self, name: &str) -> Result<()> {
        self.broker("destroyConnectorService", vec![json!(name)])
            .await
            .map(drop)
    }

    pub async fn get_connector_services(&self) -> Result<Vec<String>> {
        let names = self.broker("getConnectorServices", vec![]).await?;
        from_reply(names)
    }

    pub async fn find_connector_service(&self, name: &str) -> Result<bool> {
        Ok(self.get_connector_services().await?.iter().any(|n| n == name))
    }

    /// Creates the connector service unless one with that name exists.
    pub async fn ensure_connector_service(&self, connector: &ConnectorDefinition) -> Result<()> {
        if !self.find_connector_service(&connector.name).await? {
            self.create_connector_service(connector).await?;
        }
        Ok(())
    }

    // -- connections and links

    pub async fn list_connections(&self) -> Result<Vec<ConnectionInfo>> {
        let reply = self.broker("listConnectionsAsJSON", vec![]).await?;
        from_reply(json_reply(reply)?)
    }

    pub async fn list_sessions_for_connection(&self, connection_id: &str) -> Result<Vec<SessionInfo>> {
        let reply = self
            .broker("listSessionsAsJSON", vec![json!(connection_id)])
            .await?;
        from_reply(json_reply(reply)?)
    }

    /// Connections with their sessions filled in; sessions are listed concurrently.
    pub async fn list_connections_with_sessions(&self) -> Result<Vec<ConnectionInfo>> {
        let mut connections = self.list_connections().await?;
        let sessions = try_join_all(
            connections
                .iter()
                .map(|c| self.list_sessions_for_connection(&c.connection_id)),
        )
        .await?;
        for (connection, sessions) in connections.iter_mut().zip(sessions) {
            connection.sessions = sessions;
        }
        Ok(connections)
    }

    pub async fn close_connection(&self, connection_id: &str) -> Result<bool> {
        let reply = self
            .broker("closeConnectionWithID", vec![json!(connection_id)])
            .await?;
        Ok(json_reply(reply)?.as_bool().unwrap_or(false))
    }

    pub async fn list_consumers(&self) -> Result<Vec<ConsumerInfo>> {
        let reply = self.broker("listAllConsumersAsJSON", vec![]).await?;
        from_reply(json_reply(reply)?)
    }

    pub async fn list_producers(&self) -> Result<Vec<ProducerInfo>> {
        let reply = self.broker("listProducersInfoAsJSON", vec![]).await?;
        from_reply(json_reply(reply)?)
    }

    pub async fn get_global_max_size(&self) -> Result<i64> {
        let reply = self.broker("getGlobalMaxSize", vec![]).await?;
        json_reply(reply)?
            .as_f64()
            .map(|size| size as i64)
            .ok_or_else(|| ManagementError::UnexpectedReply("global max size is not a number".to_string()))
    }
}

fn list_arguments() -> Vec<Value> {
    vec![json!(LIST_FILTER), json!(LIST_PAGE), json!(LIST_PAGE_SIZE)]
}

/// Replies of the `*AsJSON` and list operations carry a JSON document as a string.
fn json_reply(reply: Value) -> Result<Value> {
    match reply {
        Value::String(text) => {
            let trimmed = text.trim();
            // bare numbers and booleans come back as strings too
            Ok(serde_json::from_str(trimmed).unwrap_or(Value::String(text)))
        }
        other => Ok(other),
    }
}

fn from_reply<T: DeserializeOwned>(reply: Value) -> Result<T> {
    Ok(serde_json::from_value(reply)?)
}

/// Entries of a paged listing: `{"data": [...], "count": n}`.
fn listing_data(reply: Value) -> Result<Vec<Map<String, Value>>> {
    let mut document = match json_reply(reply)? {
        Value::Object(document) => document,
        other => {
            return Err(ManagementError::UnexpectedReply(format!(
                "listing is not an object: {}",
                other
            )))
        }
    };
    let data = document.remove("data").unwrap_or(Value::Array(vec![]));
    debug!(entries = data.as_array().map_or(0, Vec::len), "listing received");
    from_reply(data)
}

/// Parameters map of `createConnectorService`. Optional values are only present when set and
/// are passed as strings.
pub fn connector_parameters(connector: &ConnectorDefinition, endpoint: &ConnectorEndpoint) -> Map<String, Value> {
    let mut parameters = Map::new();
    let mut put = |key: &str, value: Option<String>| {
        parameters.insert(key.to_string(), value.map_or(Value::Null, Value::String));
    };
    put("host", endpoint.host.clone());
    put("port", endpoint.port.clone());
    put("clusterId", connector.cluster_id.clone());

    let mut optional = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            parameters.insert(key.to_string(), Value::String(value));
        }
    };
    optional("containerId", connector.container_id.clone());
    optional("linkName", connector.link_name.clone());
    optional("targetAddress", connector.target_address.clone());
    optional("sourceAddress", connector.source_address.clone());
    optional("direction", connector.direction.map(|d| d.to_string()));
    optional("consumerPriority", connector.consumer_priority.map(|p| p.to_string()));
    optional(
        "treatRejectAsUnmodifiedDeliveryFailed",
        connector
            .treat_reject_as_unmodified_delivery_failed
            .map(|b| b.to_string()),
    );
    optional(
        "useModifiedForTransientDeliveryErrors",
        connector
            .use_modified_for_transient_delivery_errors
            .map(|b| b.to_string()),
    );
    parameters
}
