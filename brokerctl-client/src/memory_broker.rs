use brokerctl_core::AddressSettings;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::management_client::{ClientOptions, ManagementClient};
use crate::records::{ConnectionInfo, ConsumerInfo, ProducerInfo, ANYCAST, MULTICAST};
use crate::session::{LinkEvent, ManagementMessage, Session};

/// Initial sender credit granted when the management sender attaches.
pub const DEFAULT_CREDIT_WINDOW: u32 = 100;

const DEFAULT_GLOBAL_MAX_SIZE: i64 = 512 * 1024 * 1024;

/// A queue held by the [`MemoryBroker`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQueue {
    pub name: String,
    pub address: String,
    pub routing_type: String,
    pub durable: bool,
    pub temporary: bool,
    pub purge_on_no_consumers: bool,
    pub max_consumers: i64,
    pub consumers: i64,
    pub messages: i64,
    pub enqueued: i64,
    pub delivering: i64,
    pub acknowledged: i64,
    pub expired: i64,
    pub killed: i64,
}

impl MemoryQueue {
    /// Listing record in the broker's format, every attribute a string.
    fn listing_record(&self) -> Value {
        json!({
            "id": self.name,
            "name": self.name,
            "address": self.address,
            "routingType": self.routing_type,
            "filter": "",
            "durable": self.durable.to_string(),
            "temporary": self.temporary.to_string(),
            "purgeOnNoConsumers": self.purge_on_no_consumers.to_string(),
            "maxConsumers": self.max_consumers.to_string(),
            "consumerCount": self.consumers.to_string(),
            "messageCount": self.messages.to_string(),
            "messagesAdded": self.enqueued.to_string(),
            "deliveringCount": self.delivering.to_string(),
            "messagesAcked": self.acknowledged.to_string(),
            "messagesExpired": self.expired.to_string(),
            "messagesKilled": self.killed.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryAddress {
    routing_types: BTreeSet<String>,
    /// Created on demand by a queue; removed again with its last queue.
    auto_created: bool,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    target: Option<String>,
    message: String,
}

/// In-memory broker answering management requests through the [`Session`] contract.
///
/// SHOULD BE USED ONLY FOR TESTING PURPOSES AND LOCAL RUNS. It keeps addresses, queues, address
/// settings, diverts, connector services and connection listings in memory, replies in order,
/// and can be told to fail operations, withhold credit or drop the connection.
#[derive(Debug)]
pub struct MemoryBroker {
    container_id: String,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    addresses: DashMap<String, MemoryAddress>,
    queues: DashMap<String, MemoryQueue>,
    address_settings: DashMap<String, AddressSettings>,
    diverts: DashMap<String, (String, String)>,
    connectors: DashMap<String, Map<String, Value>>,
    connections: Mutex<Vec<ConnectionInfo>>,
    producers: Mutex<Vec<ProducerInfo>>,
    consumers: Mutex<Vec<ConsumerInfo>>,
    failures: DashMap<String, InjectedFailure>,
    calls: Mutex<Vec<(String, String)>>,
    global_max_size: AtomicI64,
    auto_credit: AtomicBool,
    credit_window: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn str_param(params: &[Value], i: usize) -> std::result::Result<String, String> {
    params
        .get(i)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("AMQ229000: parameter {} must be a string", i))
}

fn bool_param(params: &[Value], i: usize) -> bool {
    params.get(i).and_then(Value::as_bool).unwrap_or(false)
}

fn root_settings() -> AddressSettings {
    let mut settings = AddressSettings::from_broker(json!({
        "addressFullMessagePolicy": "PAGE",
        "maxSizeBytes": -1,
        "pageSizeBytes": 10485760,
        "pageCacheMaxSize": 5,
        "expiryDelay": -1,
        "minExpiryDelay": -1,
        "maxExpiryDelay": -1,
        "maxDeliveryAttempts": 10,
        "redeliveryDelay": 0,
        "redeliveryMultiplier": 1.0,
        "maxRedeliveryDelay": 0,
        "redistributionDelay": -1,
        "sendToDLAOnNoRoute": false,
        "autoCreateQueues": true,
        "autoDeleteQueues": true,
        "autoCreateAddresses": true,
        "autoDeleteAddresses": true,
        "enableMetrics": true
    }));
    settings.set_dla("DLQ");
    settings.set_expiry_address("ExpiryQueue");
    settings
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Self::with_credit_window(DEFAULT_CREDIT_WINDOW)
    }

    /// Broker granting `window` credits when the sender attaches and one more per settled request.
    pub fn with_credit_window(window: u32) -> Arc<Self> {
        let broker = MemoryBroker {
            container_id: "memory-broker".to_string(),
            events: Mutex::new(None),
            addresses: DashMap::new(),
            queues: DashMap::new(),
            address_settings: DashMap::new(),
            diverts: DashMap::new(),
            connectors: DashMap::new(),
            connections: Mutex::new(Vec::new()),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            global_max_size: AtomicI64::new(DEFAULT_GLOBAL_MAX_SIZE),
            auto_credit: AtomicBool::new(true),
            credit_window: window,
        };
        for builtin in ["DLQ", "ExpiryQueue"] {
            broker.insert_queue(MemoryQueue {
                name: builtin.to_string(),
                address: builtin.to_string(),
                routing_type: ANYCAST.to_string(),
                durable: true,
                max_consumers: -1,
                ..Default::default()
            });
        }
        broker.addresses.insert(
            "activemq.notifications".to_string(),
            MemoryAddress {
                routing_types: BTreeSet::from([MULTICAST.to_string()]),
                auto_created: false,
            },
        );
        broker.address_settings.insert("#".to_string(), root_settings());
        Arc::new(broker)
    }

    /// Opens a connection; the returned receiver carries its link events.
    pub fn connect(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.events) = Some(tx);
        self.emit(LinkEvent::ConnectionOpen {
            container_id: self.container_id.clone(),
        });
        rx
    }

    /// Starts a management client on a fresh connection to this broker.
    pub fn client(self: &Arc<Self>, options: ClientOptions) -> ManagementClient {
        let events = self.connect();
        ManagementClient::start(self.clone(), events, options)
    }

    /// Drops the connection; the reply queue loses its consumer.
    pub fn disconnect(&self) {
        for mut queue in self.queues.iter_mut() {
            if queue.purge_on_no_consumers && !queue.durable {
                queue.consumers = 0;
            }
        }
        self.emit(LinkEvent::Disconnected);
    }

    /// Re-opens the current connection after [`MemoryBroker::disconnect`].
    pub fn reconnect(&self) {
        self.emit(LinkEvent::ConnectionOpen {
            container_id: self.container_id.clone(),
        });
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    // -- test controls

    /// Stops granting a credit per reply; see [`MemoryBroker::grant_credit`].
    pub fn set_auto_credit(&self, enabled: bool) {
        self.auto_credit.store(enabled, Ordering::SeqCst);
    }

    pub fn grant_credit(&self, credit: u32) {
        self.emit(LinkEvent::Credit(credit));
    }

    /// Fails `operation` until cleared; with a `target` only requests naming it fail.
    pub fn fail_operation(&self, operation: &str, target: Option<&str>, message: &str) {
        self.failures.insert(
            operation.to_string(),
            InjectedFailure {
                target: target.map(str::to_string),
                message: message.to_string(),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// `(resource, operation)` of every request answered so far, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn set_global_max_size(&self, size: i64) {
        self.global_max_size.store(size, Ordering::SeqCst);
    }

    pub fn add_connection(&self, connection: ConnectionInfo) {
        lock(&self.connections).push(connection);
    }

    pub fn add_producer(&self, producer: ProducerInfo) {
        lock(&self.producers).push(producer);
    }

    pub fn add_consumer(&self, consumer: ConsumerInfo) {
        lock(&self.consumers).push(consumer);
    }

    pub fn add_connector_service(&self, name: &str) {
        self.connectors.insert(name.to_string(), Map::new());
    }

    pub fn insert_queue(&self, queue: MemoryQueue) {
        self.addresses
            .entry(queue.address.clone())
            .or_insert_with(|| MemoryAddress {
                routing_types: BTreeSet::new(),
                auto_created: true,
            })
            .routing_types
            .insert(queue.routing_type.clone());
        self.queues.insert(queue.name.clone(), queue);
    }

    pub fn update_queue<F: FnOnce(&mut MemoryQueue)>(&self, name: &str, f: F) {
        if let Some(mut queue) = self.queues.get_mut(name) {
            f(&mut queue);
        }
    }

    pub fn queue(&self, name: &str) -> Option<MemoryQueue> {
        self.queues.get(name).map(|q| q.clone())
    }

    pub fn has_address(&self, name: &str) -> bool {
        self.addresses.contains_key(name)
    }

    pub fn address_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.addresses.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Settings record stored for exactly `address_match`.
    pub fn address_settings(&self, address_match: &str) -> Option<AddressSettings> {
        self.address_settings.get(address_match).map(|s| s.clone())
    }

    pub fn connector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn connector_parameters(&self, name: &str) -> Option<Map<String, Value>> {
        self.connectors.get(name).map(|c| c.clone())
    }

    pub fn divert_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.diverts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // -- request handling

    fn injected_failure(&self, operation: &str, params: &[Value]) -> Option<String> {
        let failure = self.failures.get(operation)?;
        let matches = match &failure.target {
            None => true,
            Some(target) => params.iter().any(|p| p.as_str() == Some(target.as_str())),
        };
        matches.then(|| failure.message.clone())
    }

    fn sorted_queues(&self) -> Vec<MemoryQueue> {
        let mut queues: Vec<MemoryQueue> = self.queues.iter().map(|q| q.clone()).collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        queues
    }

    fn bound_queues(&self, address: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|q| q.address == address)
            .map(|q| q.name.clone())
            .collect();
        names.sort();
        names
    }

    fn execute(&self, resource: &str, operation: &str, params: &[Value]) -> std::result::Result<Value, String> {
        if let Some(message) = self.injected_failure(operation, params) {
            return Err(message);
        }

        if let Some(queue) = resource.strip_prefix("queue.") {
            return match operation {
                "removeMessages" => {
                    let mut q = self
                        .queues
                        .get_mut(queue)
                        .ok_or_else(|| format!("AMQ229017: Queue {} does not exist", queue))?;
                    let removed = q.messages;
                    q.messages = 0;
                    Ok(json!(removed))
                }
                _ => Err(format!("AMQ229000: unknown queue operation {}", operation)),
            };
        }
        if let Some(address) = resource.strip_prefix("address.") {
            return match operation {
                "getQueueNames" if self.addresses.contains_key(address) => {
                    Ok(json!(self.bound_queues(address)))
                }
                "getQueueNames" => Err(format!("AMQ229203: Address {} Does Not Exist", address)),
                _ => Err(format!("AMQ229000: unknown address operation {}", operation)),
            };
        }

        match operation {
            "createQueue" => {
                let address = str_param(params, 0)?;
                let routing_type = str_param(params, 1)?;
                let name = str_param(params, 2)?;
                if self.queues.contains_key(&name) {
                    return Err(format!("AMQ229019: Queue {} already exists", name));
                }
                if !self.addresses.contains_key(&address) && !bool_param(params, 7) {
                    return Err(format!("AMQ229203: Address {} Does Not Exist", address));
                }
                self.insert_queue(MemoryQueue {
                    name,
                    address,
                    routing_type,
                    durable: bool_param(params, 4),
                    purge_on_no_consumers: bool_param(params, 6),
                    max_consumers: params.get(5).and_then(Value::as_i64).unwrap_or(-1),
                    ..Default::default()
                });
                Ok(Value::Null)
            }
            "destroyQueue" => {
                let name = str_param(params, 0)?;
                let (_, queue) = self
                    .queues
                    .remove(&name)
                    .ok_or_else(|| format!("AMQ229017: Queue {} does not exist", name))?;
                let auto_created = self
                    .addresses
                    .get(&queue.address)
                    .map_or(false, |a| a.auto_created);
                if bool_param(params, 2) && auto_created && self.bound_queues(&queue.address).is_empty() {
                    self.addresses.remove(&queue.address);
                }
                Ok(Value::Null)
            }
            "getQueueNames" => {
                let names: Vec<String> = self.sorted_queues().into_iter().map(|q| q.name).collect();
                Ok(json!(names))
            }
            "listQueues" => {
                let data: Vec<Value> = self
                    .sorted_queues()
                    .iter()
                    .map(MemoryQueue::listing_record)
                    .collect();
                Ok(json!(json!({"data": data, "count": data.len()}).to_string()))
            }
            "listAddresses" => {
                let data: Vec<Value> = self
                    .address_names()
                    .into_iter()
                    .map(|name| {
                        let routing_types = self
                            .addresses
                            .get(&name)
                            .map(|a| a.routing_types.iter().cloned().collect::<Vec<_>>().join(","))
                            .unwrap_or_default();
                        json!({
                            "id": name,
                            "name": name,
                            "routingTypes": routing_types,
                            "queueCount": self.bound_queues(&name).len().to_string(),
                        })
                    })
                    .collect();
                Ok(json!(json!({"data": data, "count": data.len()}).to_string()))
            }
            "getAddressNames" => Ok(json!(self.address_names())),
            "createAddress" => {
                let name = str_param(params, 0)?;
                let routing_types = str_param(params, 1)?;
                if self.addresses.contains_key(&name) {
                    return Err(format!("AMQ229204: Address already exists: {}", name));
                }
                let routing_types = routing_types
                    .split(',')
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
                self.addresses.insert(
                    name,
                    MemoryAddress {
                        routing_types,
                        auto_created: false,
                    },
                );
                Ok(Value::Null)
            }
            "deleteAddress" => {
                let name = str_param(params, 0)?;
                if !self.addresses.contains_key(&name) {
                    return Err(format!("AMQ229203: Address {} Does Not Exist", name));
                }
                if !self.bound_queues(&name).is_empty() {
                    return Err(format!("AMQ229205: Address {} has bindings", name));
                }
                self.addresses.remove(&name);
                Ok(Value::Null)
            }
            "addAddressSettings" => {
                let address_match = str_param(params, 0)?;
                let settings = AddressSettings::from_parameters(params.get(1..).unwrap_or_default());
                self.address_settings.insert(address_match, settings);
                Ok(Value::Null)
            }
            "removeAddressSettings" => {
                let address_match = str_param(params, 0)?;
                self.address_settings.remove(&address_match);
                Ok(Value::Null)
            }
            "getAddressSettingsAsJSON" => {
                let address_match = str_param(params, 0)?;
                let settings = self
                    .address_settings
                    .get(&address_match)
                    .or_else(|| self.address_settings.get("#"))
                    .map(|s| s.without_nulls())
                    .unwrap_or_default();
                let document = serde_json::to_string(&settings).map_err(|e| e.to_string())?;
                Ok(json!(document))
            }
            "createDivert" => {
                let name = str_param(params, 0)?;
                if self.diverts.contains_key(&name) {
                    return Err(format!("AMQ229034: Divert {} already exists", name));
                }
                let source = str_param(params, 2)?;
                let target = str_param(params, 3)?;
                self.diverts.insert(name, (source, target));
                Ok(Value::Null)
            }
            "destroyDivert" => {
                let name = str_param(params, 0)?;
                self.diverts
                    .remove(&name)
                    .map(|_| Value::Null)
                    .ok_or_else(|| format!("AMQ229038: Divert {} does not exist", name))
            }
            "getDivertNames" => Ok(json!(self.divert_names())),
            "createConnectorService" => {
                let name = str_param(params, 0)?;
                if self.connectors.contains_key(&name) {
                    return Err(format!("AMQ229214: Connector service {} already exists", name));
                }
                let parameters = params
                    .get(2)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                self.connectors.insert(name, parameters);
                Ok(Value::Null)
            }
            "destroyConnectorService" => {
                let name = str_param(params, 0)?;
                self.connectors
                    .remove(&name)
                    .map(|_| Value::Null)
                    .ok_or_else(|| format!("AMQ229215: Connector service {} does not exist", name))
            }
            "getConnectorServices" => Ok(json!(self.connector_names())),
            "listConnectionsAsJSON" => {
                let connections: Vec<ConnectionInfo> = lock(&self.connections)
                    .iter()
                    .map(|c| ConnectionInfo {
                        sessions: Vec::new(),
                        ..c.clone()
                    })
                    .collect();
                serde_json::to_string(&connections)
                    .map(Value::String)
                    .map_err(|e| e.to_string())
            }
            "listSessionsAsJSON" => {
                let id = str_param(params, 0)?;
                let sessions = lock(&self.connections)
                    .iter()
                    .find(|c| c.connection_id == id)
                    .map(|c| c.sessions.clone())
                    .unwrap_or_default();
                serde_json::to_string(&sessions)
                    .map(Value::String)
                    .map_err(|e| e.to_string())
            }
            "closeConnectionWithID" => {
                let id = str_param(params, 0)?;
                let mut connections = lock(&self.connections);
                let before = connections.len();
                connections.retain(|c| c.connection_id != id);
                Ok(json!(connections.len() != before))
            }
            "listAllConsumersAsJSON" => serde_json::to_string(&*lock(&self.consumers))
                .map(Value::String)
                .map_err(|e| e.to_string()),
            "listProducersInfoAsJSON" => serde_json::to_string(&*lock(&self.producers))
                .map(Value::String)
                .map_err(|e| e.to_string()),
            "getGlobalMaxSize" => Ok(json!(self.global_max_size.load(Ordering::SeqCst))),
            _ => Err(format!("AMQ229000: unknown operation {}", operation)),
        }
    }
}

impl Session for MemoryBroker {
    fn container_id(&self) -> String {
        self.container_id.clone()
    }

    fn open_sender(&self, address: &str) {
        debug!(%address, "memory broker: sender attached");
        self.emit(LinkEvent::SenderOpen);
        if self.auto_credit.load(Ordering::SeqCst) {
            self.emit(LinkEvent::Credit(self.credit_window));
        }
    }

    fn open_receiver(&self, address: &str) {
        match self.queues.get_mut(address) {
            Some(mut queue) => {
                queue.consumers += 1;
                self.emit(LinkEvent::ReceiverOpen {
                    address: address.to_string(),
                });
            }
            None => self.emit(LinkEvent::ReceiverError(format!(
                "amqp:not-found: {} does not exist",
                address
            ))),
        }
    }

    fn send(&self, message: ManagementMessage) {
        let resource = message.resource().unwrap_or_default().to_string();
        let operation = message.operation().unwrap_or_default().to_string();
        let params = message.parameters();
        trace!(%resource, %operation, "memory broker: request");

        let result = self.execute(&resource, &operation, &params);
        lock(&self.calls).push((resource, operation));

        if message.reply_to.is_none() {
            self.emit(LinkEvent::Accepted);
            if self.auto_credit.load(Ordering::SeqCst) {
                self.emit(LinkEvent::Credit(1));
            }
            return;
        }
        let reply = match result {
            Ok(Value::Null) => ManagementMessage::reply(true, None),
            Ok(value) => ManagementMessage::reply(true, Some(json!([value]).to_string())),
            Err(error) => ManagementMessage::reply(false, Some(error)),
        };
        self.emit(LinkEvent::Message(reply));
        if self.auto_credit.load(Ordering::SeqCst) {
            self.emit(LinkEvent::Credit(1));
        }
    }

    fn close(&self) {
        self.emit(LinkEvent::ConnectionClose);
        *lock(&self.events) = None;
    }
}
