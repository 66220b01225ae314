//! Brokerctl-Core
//!
//! Shared types of the brokerctl topology agent: the desired-state address model, the broker
//! address-settings record and the small primitives the controller is built on (ordered diff,
//! bounded concurrency, serialized execution with retry).

pub mod address;
pub use address::{
    AddressKind, AddressResource, ConnectorDefinition, ForwarderDirection, ForwarderSpec,
    MessageRedelivery, MessageTtl, PlanAllocation, PolicyIntent, SubscriptionSpec,
};

pub mod address_settings;
pub use address_settings::{AddressSettings, ADDRESS_SETTINGS_ORDER};

pub mod changes;
pub use changes::{changes, changes_with, Changes};

mod errors;
pub use errors::{CoreError, Result};

pub mod limiter;
pub use limiter::{Limiter, DEFAULT_CONCURRENCY};

pub mod serializer;
pub use serializer::Serializer;

pub mod utils;
pub use utils::{description, parse_to_bytes, stable_uuid};
