use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{CoreError, Result};

/// The kinds of messaging resources the controller manages on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Queue,
    Topic,
    Subscription,
    #[serde(alias = "dead-letter")]
    DeadLetter,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Queue => "queue",
            AddressKind::Topic => "topic",
            AddressKind::Subscription => "subscription",
            AddressKind::DeadLetter => "deadletter",
        }
    }

    /// Queue-like kinds are backed by a single ANYCAST queue named after the address.
    pub fn is_queue_like(&self) -> bool {
        matches!(self, AddressKind::Queue | AddressKind::DeadLetter)
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the desired state.
///
/// Identity is the `(address, kind)` pair; every other field only feeds policy synthesis and
/// forwarder derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResource {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: AddressKind,
    /// Resource name, used as the prefix of forwarder names. Defaults to `address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parent topic of a subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadletter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, alias = "status", skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyIntent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwarders: Vec<ForwarderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionSpec>,
}

impl AddressResource {
    pub fn new(address: impl Into<String>, kind: AddressKind) -> Self {
        AddressResource {
            address: address.into(),
            kind,
            name: None,
            topic: None,
            deadletter: None,
            expiry: None,
            policy: None,
            forwarders: Vec::new(),
            subscription: None,
        }
    }

    pub fn queue(address: impl Into<String>) -> Self {
        Self::new(address, AddressKind::Queue)
    }

    pub fn topic(address: impl Into<String>) -> Self {
        Self::new(address, AddressKind::Topic)
    }

    pub fn subscription(address: impl Into<String>, topic: impl Into<String>) -> Self {
        let mut sub = Self::new(address, AddressKind::Subscription);
        sub.topic = Some(topic.into());
        sub
    }

    pub fn deadletter(address: impl Into<String>) -> Self {
        Self::new(address, AddressKind::DeadLetter)
    }

    pub fn with_policy(mut self, policy: PolicyIntent) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_forwarder(mut self, forwarder: ForwarderSpec) -> Self {
        self.forwarders.push(forwarder);
        self
    }

    pub fn resource_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    pub fn same_identity(&self, other: &AddressResource) -> bool {
        self.address == other.address && self.kind == other.kind
    }

    /// Maximum consumers for a subscription queue, 1 unless configured.
    pub fn max_consumers(&self) -> i64 {
        self.subscription
            .as_ref()
            .and_then(|s| s.max_consumers)
            .unwrap_or(1)
    }

    /// Checks the fields a broker operation cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(CoreError::InvalidAddress(format!(
                "{} has no address",
                self.kind
            )));
        }
        if self.kind == AddressKind::Subscription
            && self.topic.as_deref().map_or(true, str::is_empty)
        {
            return Err(CoreError::InvalidAddress(format!(
                "subscription {} has no topic",
                self.address
            )));
        }
        Ok(())
    }
}

/// Higher level policy from which the per-address broker settings are synthesized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyIntent {
    #[serde(default, alias = "planStatus")]
    pub plan: Option<PlanAllocation>,
    #[serde(default)]
    pub message_ttl: Option<MessageTtl>,
    #[serde(default)]
    pub message_redelivery: Option<MessageRedelivery>,
}

/// Share of the global broker memory budget allotted to the address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAllocation {
    /// Resource shares keyed by infrastructure component; `broker` is a fraction of the budget.
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    /// The share is split evenly between partitions when set.
    #[serde(default)]
    pub partitions: Option<u32>,
}

impl PlanAllocation {
    pub fn broker_share(share: f64, partitions: Option<u32>) -> Self {
        PlanAllocation {
            resources: BTreeMap::from([("broker".to_string(), share)]),
            partitions,
        }
    }

    pub fn allocation(&self) -> Option<f64> {
        let broker = self.resources.get("broker").copied().filter(|b| *b > 0.0)?;
        match self.partitions {
            Some(p) if p > 0 => Some(broker / f64::from(p)),
            _ => Some(broker),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageTtl {
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRedelivery {
    pub maximum_delivery_attempts: Option<i64>,
    pub redelivery_delay: Option<i64>,
    #[serde(alias = "redeliveryMultiplier")]
    pub redelivery_delay_multiplier: Option<f64>,
    pub maximum_delivery_delay: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub max_consumers: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwarderDirection {
    In,
    Out,
}

impl ForwarderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwarderDirection::In => "in",
            ForwarderDirection::Out => "out",
        }
    }
}

impl fmt::Display for ForwarderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forwarder relays messages between a local address and an address on a remote broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwarderSpec {
    pub name: String,
    pub remote_address: String,
    pub direction: ForwarderDirection,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Broker connector service backing a forwarder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDefinition {
    pub name: String,
    pub cluster_id: Option<String>,
    pub container_id: Option<String>,
    pub link_name: Option<String>,
    pub source_address: Option<String>,
    pub target_address: Option<String>,
    pub direction: Option<ForwarderDirection>,
    pub consumer_priority: Option<i32>,
    pub treat_reject_as_unmodified_delivery_failed: Option<bool>,
    pub use_modified_for_transient_delivery_errors: Option<bool>,
}

impl ConnectorDefinition {
    /// A definition that only carries a name, as reported by the broker.
    pub fn named(name: impl Into<String>) -> Self {
        ConnectorDefinition {
            name: name.into(),
            ..Default::default()
        }
    }
}
