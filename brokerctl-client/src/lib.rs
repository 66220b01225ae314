mod errors;
pub use errors::{ManagementError, Result};

pub mod session;
pub use session::{LinkEvent, ManagementMessage, Session};

pub mod management_client;
pub use management_client::{ClientOptions, LinkState, ManagementClient};

pub mod records;
pub use records::{BrokerAddress, BrokerQueue, ConnectionInfo, ConsumerInfo, ProducerInfo, SessionInfo};

pub mod address_index;
pub use address_index::{AddressEntry, AddressIndex, TopicStats};

pub mod broker_management;
pub use broker_management::{BrokerManagement, ConnectorEndpoint, Routing};

pub mod memory_broker;
pub use memory_broker::{MemoryBroker, MemoryQueue};
