//! Brokerctl-Controller
//!
//! Sidecar controller for a single message broker. It keeps the broker's addresses, their
//! address-settings overrides and the forwarder connector services in line with a declarative
//! desired state, and harvests per-address and per-connection statistics on every check.
//!
//! [`BrokerController`] combines the [`ReconciliationEngine`] and the [`StatsCollector`];
//! [`ControllerDriver`] runs it on a timer. Progress is reported through an [`EventSink`].

mod errors;
pub use errors::{ControllerError, Result};

pub mod controller_metrics;
pub use controller_metrics::init_metrics;

pub mod events;
pub use events::{ChannelSink, ControllerEvent, EventSink, LoggingSink};

pub mod desired_state;
pub use desired_state::DesiredState;

pub mod translate;
pub use translate::{is_builtin_address, translate, ActualAddress};

pub mod settings_synthesis;
pub use settings_synthesis::generate_address_settings;

pub mod forwarders;
pub use forwarders::{desired_connectors, forwarder_connector, ForwarderOptions};

pub mod stats_collector;
pub use stats_collector::{
    build_stats, AddressSpaceInfo, AddressStats, BrokerStats, ConnectionStats, StatsCollector,
};

pub mod engine;
pub use engine::{EngineConfig, ReconciliationEngine, SyncReport};

pub mod broker_controller;
pub use broker_controller::{BrokerController, ControllerDriver};

pub mod service_configuration;
pub use service_configuration::{ControllerConfig, LoadConfiguration};
