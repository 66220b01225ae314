//! Lifecycle and stats notifications for whoever reports on the controller's work.

use brokerctl_core::AddressResource;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stats_collector::{AddressStats, ConnectionStats};

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    AddressCreate(AddressResource),
    AddressDelete(AddressResource),
    AddressFailedCreate {
        address: AddressResource,
        error: String,
    },
    AddressFailedDelete {
        address: AddressResource,
        error: String,
    },
    AddressStatsRetrieved(BTreeMap<String, AddressStats>),
    ConnectionStatsRetrieved(BTreeMap<String, ConnectionStats>),
    /// The broker matches the desired state.
    Synchronized,
    /// The broker stopped matching the desired state.
    Desynchronized { stale: usize, missing: usize },
    /// Root settings are loaded and the first check completed.
    Ready,
}

impl ControllerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerEvent::AddressCreate(_) => "address_create",
            ControllerEvent::AddressDelete(_) => "address_delete",
            ControllerEvent::AddressFailedCreate { .. } => "address_failed_create",
            ControllerEvent::AddressFailedDelete { .. } => "address_failed_delete",
            ControllerEvent::AddressStatsRetrieved(_) => "address_stats_retrieved",
            ControllerEvent::ConnectionStatsRetrieved(_) => "connection_stats_retrieved",
            ControllerEvent::Synchronized => "synchronized",
            ControllerEvent::Desynchronized { .. } => "desynchronized",
            ControllerEvent::Ready => "ready",
        }
    }
}

/// Receives every event the controller emits. Implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn post(&self, event: ControllerEvent);
}

/// Sink that only logs; the default when nothing consumes the events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn post(&self, event: ControllerEvent) {
        match &event {
            ControllerEvent::AddressFailedCreate { address, error }
            | ControllerEvent::AddressFailedDelete { address, error } => {
                warn!(
                    event = event.name(),
                    address = %address.address,
                    kind = %address.kind,
                    error = %error,
                    "controller event"
                );
            }
            ControllerEvent::AddressCreate(address) | ControllerEvent::AddressDelete(address) => {
                info!(event = event.name(), address = %address.address, kind = %address.kind, "controller event");
            }
            ControllerEvent::AddressStatsRetrieved(stats) => {
                debug!(event = event.name(), addresses = stats.len(), "controller event");
            }
            ControllerEvent::ConnectionStatsRetrieved(stats) => {
                debug!(event = event.name(), connections = stats.len(), "controller event");
            }
            _ => info!(event = event.name(), "controller event"),
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn post(&self, event: ControllerEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
