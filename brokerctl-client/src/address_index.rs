use brokerctl_core::AddressKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{error, warn};

use crate::records::{BrokerAddress, BrokerQueue};

/// Aggregated view of the queues bound to a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicStats {
    pub enqueued: i64,
    pub messages: i64,
    pub subscriptions: Vec<BrokerQueue>,
    pub subscription_count: usize,
    pub durable_subscription_count: usize,
    pub inactive_durable_subscription_count: usize,
}

impl TopicStats {
    fn add(&mut self, queue: &BrokerQueue) {
        self.enqueued += queue.enqueued;
        self.messages += queue.messages;
        self.subscriptions.push(queue.clone());
        self.subscription_count += 1;
        if queue.durable {
            self.durable_subscription_count += 1;
            if queue.consumers == 0 {
                self.inactive_durable_subscription_count += 1;
            }
        }
    }
}

/// One addressable entity: an address, with its queue merged in when it is queue-like, or a
/// durable subscription queue.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressEntry {
    pub name: String,
    pub kind: Option<AddressKind>,
    pub queue: Option<BrokerQueue>,
    pub topic_stats: Option<TopicStats>,
}

impl AddressEntry {
    fn new(name: &str, kind: Option<AddressKind>, with_topic_stats: bool) -> Self {
        AddressEntry {
            name: name.to_string(),
            kind,
            queue: None,
            topic_stats: (with_topic_stats && kind == Some(AddressKind::Topic))
                .then(TopicStats::default),
        }
    }
}

/// Addresses and queues of the broker merged into a single index keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressIndex {
    pub entries: BTreeMap<String, AddressEntry>,
    /// Queue name to the address it is bound to.
    pub reverse_index: Option<HashMap<String, String>>,
}

impl AddressIndex {
    /// Merges the address listing with the queue listing.
    ///
    /// MULTICAST queues belong to their topic and durable, non-purging ones are indexed as
    /// subscriptions under their own name. ANYCAST queues merge into their address. Addresses
    /// missing from the listing are synthesized.
    pub fn build(
        addresses: Vec<BrokerAddress>,
        queues: Vec<BrokerQueue>,
        include_topic_stats: bool,
        include_reverse_index: bool,
    ) -> Self {
        let mut entries: BTreeMap<String, AddressEntry> = BTreeMap::new();
        let mut reverse_index = include_reverse_index.then(HashMap::new);

        for address in addresses {
            if entries.contains_key(&address.name) {
                warn!(address = %address.name, kind = ?address.kind, "duplicate address");
                continue;
            }
            let entry = AddressEntry::new(&address.name, address.kind, include_topic_stats);
            entries.insert(address.name, entry);
        }

        for queue in queues {
            if let Some(index) = reverse_index.as_mut() {
                index.insert(queue.name.clone(), queue.address.clone());
            }

            if queue.is_multicast() {
                let topic = entries.entry(queue.address.clone()).or_insert_with(|| {
                    warn!(address = %queue.address, queue = %queue.name, "missing address for topic queue");
                    AddressEntry::new(&queue.address, Some(AddressKind::Topic), include_topic_stats)
                });
                if topic.kind != Some(AddressKind::Topic) {
                    warn!(
                        queue = %queue.name,
                        address = %queue.address,
                        kind = ?topic.kind,
                        "unexpected address type for MULTICAST queue"
                    );
                }
                if let Some(stats) = topic.topic_stats.as_mut() {
                    stats.add(&queue);
                }
                if queue.is_durable_subscription() {
                    entries.insert(
                        queue.name.clone(),
                        AddressEntry {
                            name: queue.name.clone(),
                            kind: Some(AddressKind::Subscription),
                            queue: Some(queue),
                            topic_stats: None,
                        },
                    );
                }
            } else if queue.is_anycast() {
                let entry = entries.entry(queue.address.clone()).or_insert_with(|| {
                    warn!(address = %queue.address, queue = %queue.name, "missing address for queue");
                    AddressEntry::new(&queue.address, Some(AddressKind::Queue), false)
                });
                if queue.name != queue.address {
                    warn!(address = %queue.address, queue = %queue.name, "mismatched address for queue");
                } else if entry.queue.is_some() {
                    warn!(address = %queue.address, "duplicate queue for address");
                }
                entry.queue = Some(queue);
            } else {
                error!(routing_type = %queue.routing_type, queue = %queue.name, "unknown routing type");
            }
        }

        AddressIndex {
            entries,
            reverse_index,
        }
    }

    pub fn get(&self, name: &str) -> Option<&AddressEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Address a queue is bound to, when the reverse index was requested.
    pub fn address_of(&self, queue: &str) -> Option<&str> {
        self.reverse_index
            .as_ref()
            .and_then(|index| index.get(queue))
            .map(String::as_str)
    }
}
