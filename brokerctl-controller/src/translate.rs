//! Translation of the broker's address index into the desired-state vocabulary, so the two can
//! be compared by `(address, kind)`.

use brokerctl_client::{AddressEntry, AddressIndex};
use brokerctl_core::{AddressKind, AddressResource};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::desired_state::DesiredState;

/// Addresses the broker provides on its own.
pub const BUILTIN_ADDRESSES: [&str; 5] = [
    "!!GLOBAL_DLQ",
    "DLQ",
    "ExpiryQueue",
    "activemq.notifications",
    "activemq.management",
];

const HEALTH_CHECK_PREFIX: &str = "!!HEALTH_CHECK_BROKER";
const REPLY_QUEUE_PREFIX: &str = "activemq.management.tmpreply";

pub fn is_builtin_address(name: &str) -> bool {
    BUILTIN_ADDRESSES.contains(&name) || name.starts_with(HEALTH_CHECK_PREFIX)
}

/// Broker view of one address, rebuilt on every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ActualAddress {
    pub name: String,
    pub kind: AddressKind,
    pub durable: bool,
    pub temporary: bool,
    pub max_consumers: i64,
    pub consumers: i64,
}

impl ActualAddress {
    /// `None` for entries whose routing type gives them no kind.
    pub fn from_entry(entry: &AddressEntry) -> Option<Self> {
        let kind = entry.kind?;
        let queue = entry.queue.as_ref();
        Some(ActualAddress {
            name: entry.name.clone(),
            kind,
            durable: queue.map_or(true, |q| q.durable),
            temporary: queue.is_some_and(|q| q.temporary),
            max_consumers: queue.map_or(0, |q| q.max_consumers),
            consumers: queue.map_or(0, |q| q.consumers),
        })
    }

    /// Temporary queues, and management reply queues that are in use.
    pub fn is_temporary_queue(&self) -> bool {
        self.kind == AddressKind::Queue
            && (self.temporary
                || (self.name.starts_with(REPLY_QUEUE_PREFIX)
                    && !self.durable
                    && self.max_consumers == self.consumers
                    && self.consumers > 0))
    }

    pub fn is_wildcard_topic(&self) -> bool {
        self.kind == AddressKind::Topic && is_wildcard(&self.name)
    }

    pub fn to_resource(&self) -> AddressResource {
        AddressResource::new(self.name.clone(), self.kind)
    }
}

/// Whether a non-wildcard address other than `name` is a prefix of it.
fn has_toplevel_address(name: &str, index: &AddressIndex) -> bool {
    index
        .entries
        .keys()
        .any(|other| other != name && !is_wildcard(other) && name.starts_with(other.as_str()))
}

fn is_wildcard(name: &str) -> bool {
    name.contains(['#', '+', '/'])
}

/// Actual addresses of the broker, keyed by name, that the controller is responsible for.
///
/// Built-in addresses, addresses of `excluded_kinds`, temporary queues and wildcard topics with
/// a top-level address are left out. Addresses the desired state declares as dead-letter
/// addresses are reported as such.
pub fn translate(
    index: &AddressIndex,
    desired: &DesiredState,
    excluded_kinds: &[AddressKind],
) -> BTreeMap<String, ActualAddress> {
    let mut actual = BTreeMap::new();
    for (name, entry) in &index.entries {
        if is_builtin_address(name) {
            continue;
        }
        let Some(mut address) = ActualAddress::from_entry(entry) else {
            debug!(address = %name, "ignoring address without routing type");
            continue;
        };
        if excluded_kinds.contains(&address.kind) {
            continue;
        }
        if address.is_temporary_queue() {
            debug!(queue = %name, "ignoring temp queue");
            continue;
        }
        if address.is_wildcard_topic() && has_toplevel_address(name, index) {
            debug!(topic = %name, "ignoring wildcard subscription");
            continue;
        }
        if address.name.is_empty() {
            warn!(entry = ?entry, "skipping address with no name");
            continue;
        }
        if desired.is_deadletter(&address.name) {
            address.kind = AddressKind::DeadLetter;
        }
        actual.insert(name.clone(), address);
    }
    actual
}
