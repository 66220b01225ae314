use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Positional order of the `addAddressSettings` management operation parameters.
pub const ADDRESS_SETTINGS_ORDER: [&str; 57] = [
    "DLA",
    "expiryAddress",
    "expiryDelay",
    "lastValueQueue",
    "maxDeliveryAttempts",
    "maxSizeBytes",
    "pageSizeBytes",
    "pageCacheMaxSize",
    "redeliveryDelay",
    "redeliveryMultiplier",
    "maxRedeliveryDelay",
    "redistributionDelay",
    "sendToDLAOnNoRoute",
    "addressFullMessagePolicy",
    "slowConsumerThreshold",
    "slowConsumerCheckPeriod",
    "slowConsumerPolicy",
    "autoCreateJmsQueues",
    "autoDeleteJmsQueues",
    "autoCreateJmsTopics",
    "autoDeleteJmsTopics",
    "autoCreateQueues",
    "autoDeleteQueues",
    "autoCreateAddresses",
    "autoDeleteAddresses",
    "configDeleteQueues",
    "configDeleteAddresses",
    "maxSizeBytesRejectThreshold",
    "defaultLastValueKey",
    "defaultNonDestructive",
    "defaultExclusiveQueue",
    "defaultGroupRebalance",
    "defaultGroupBuckets",
    "defaultGroupFirstKey",
    "defaultMaxConsumers",
    "defaultPurgeOnNoConsumers",
    "defaultConsumersBeforeDispatch",
    "defaultDelayBeforeDispatch",
    "defaultQueueRoutingType",
    "defaultAddressRoutingType",
    "defaultConsumerWindowSize",
    "defaultRingSize",
    "autoDeleteCreatedQueues",
    "autoDeleteQueuesDelay",
    "autoDeleteQueuesMessageCount",
    "autoDeleteAddressesDelay",
    "redeliveryCollisionAvoidanceFactor",
    "retroactiveMessageCount",
    "autoCreateDeadLetterResources",
    "deadLetterQueuePrefix",
    "deadLetterQueueSuffix",
    "autoCreateExpiryResources",
    "expiryQueuePrefix",
    "expiryQueueSuffix",
    "minExpiryDelay",
    "maxExpiryDelay",
    "enableMetrics",
];

const DLA: &str = "DLA";
const EXPIRY_ADDRESS: &str = "expiryAddress";
const MAX_SIZE_BYTES: &str = "maxSizeBytes";
const PAGE_SIZE_BYTES: &str = "pageSizeBytes";
const ADDRESS_FULL_MESSAGE_POLICY: &str = "addressFullMessagePolicy";
const MIN_EXPIRY_DELAY: &str = "minExpiryDelay";
const MAX_EXPIRY_DELAY: &str = "maxExpiryDelay";
const MAX_DELIVERY_ATTEMPTS: &str = "maxDeliveryAttempts";
const REDELIVERY_DELAY: &str = "redeliveryDelay";
const REDELIVERY_MULTIPLIER: &str = "redeliveryMultiplier";
const MAX_REDELIVERY_DELAY: &str = "maxRedeliveryDelay";

/// Address settings record as the broker reports it (`getAddressSettingsAsJSON`).
///
/// The record is kept as a key/value map so that knobs the controller never touches round-trip
/// unchanged; equality is key-by-key, which is how the controller decides whether an override
/// needs to be (re)applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSettings(BTreeMap<String, Value>);

impl AddressSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from the broker's JSON reply. `DLA` and `expiryAddress` are omitted by the
    /// broker when unset, so they are filled in as null to keep comparisons symmetric.
    pub fn from_broker(value: Value) -> Self {
        let mut map: BTreeMap<String, Value> = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        map.entry(DLA.to_string()).or_insert(Value::Null);
        map.entry(EXPIRY_ADDRESS.to_string()).or_insert(Value::Null);
        AddressSettings(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters of `addAddressSettings`: the match followed by every knob in broker order.
    pub fn to_parameters(&self, address_match: &str) -> Vec<Value> {
        let mut params = Vec::with_capacity(ADDRESS_SETTINGS_ORDER.len() + 1);
        params.push(Value::String(address_match.to_string()));
        params.extend(
            ADDRESS_SETTINGS_ORDER
                .iter()
                .map(|name| self.0.get(*name).cloned().unwrap_or(Value::Null)),
        );
        params
    }

    /// Inverse of [`AddressSettings::to_parameters`] (without the match); unset knobs are
    /// left out of the record.
    pub fn from_parameters(params: &[Value]) -> Self {
        let map = ADDRESS_SETTINGS_ORDER
            .iter()
            .zip(params.iter())
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        AddressSettings(map)
    }

    /// Record without the null entries, as the broker reports it.
    pub fn without_nulls(&self) -> Self {
        AddressSettings(
            self.0
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn dla(&self) -> Option<&str> {
        self.0.get(DLA).and_then(Value::as_str)
    }

    pub fn set_dla(&mut self, dla: &str) {
        self.set(DLA, dla);
    }

    pub fn expiry_address(&self) -> Option<&str> {
        self.0.get(EXPIRY_ADDRESS).and_then(Value::as_str)
    }

    pub fn set_expiry_address(&mut self, expiry: &str) {
        self.set(EXPIRY_ADDRESS, expiry);
    }

    pub fn max_size_bytes(&self) -> Option<i64> {
        self.get_i64(MAX_SIZE_BYTES)
    }

    pub fn set_max_size_bytes(&mut self, bytes: i64) {
        self.set(MAX_SIZE_BYTES, bytes);
    }

    pub fn page_size_bytes(&self) -> Option<i64> {
        self.get_i64(PAGE_SIZE_BYTES)
    }

    pub fn set_page_size_bytes(&mut self, bytes: i64) {
        self.set(PAGE_SIZE_BYTES, bytes);
    }

    pub fn address_full_message_policy(&self) -> Option<&str> {
        self.0
            .get(ADDRESS_FULL_MESSAGE_POLICY)
            .and_then(Value::as_str)
    }

    pub fn min_expiry_delay(&self) -> Option<i64> {
        self.get_i64(MIN_EXPIRY_DELAY)
    }

    pub fn set_min_expiry_delay(&mut self, delay: i64) {
        self.set(MIN_EXPIRY_DELAY, delay);
    }

    pub fn max_expiry_delay(&self) -> Option<i64> {
        self.get_i64(MAX_EXPIRY_DELAY)
    }

    pub fn set_max_expiry_delay(&mut self, delay: i64) {
        self.set(MAX_EXPIRY_DELAY, delay);
    }

    pub fn max_delivery_attempts(&self) -> Option<i64> {
        self.get_i64(MAX_DELIVERY_ATTEMPTS)
    }

    pub fn set_max_delivery_attempts(&mut self, attempts: i64) {
        self.set(MAX_DELIVERY_ATTEMPTS, attempts);
    }

    pub fn redelivery_delay(&self) -> Option<i64> {
        self.get_i64(REDELIVERY_DELAY)
    }

    pub fn set_redelivery_delay(&mut self, delay: i64) {
        self.set(REDELIVERY_DELAY, delay);
    }

    pub fn redelivery_multiplier(&self) -> Option<f64> {
        self.0.get(REDELIVERY_MULTIPLIER).and_then(Value::as_f64)
    }

    pub fn set_redelivery_multiplier(&mut self, multiplier: f64) {
        self.set(REDELIVERY_MULTIPLIER, multiplier);
    }

    pub fn max_redelivery_delay(&self) -> Option<i64> {
        self.get_i64(MAX_REDELIVERY_DELAY)
    }

    pub fn set_max_redelivery_delay(&mut self, delay: i64) {
        self.set(MAX_REDELIVERY_DELAY, delay);
    }

    /// Keys whose values differ between two records, for logging.
    pub fn differing_keys(&self, other: &AddressSettings) -> Vec<String> {
        let mut keys: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            other
                .0
                .keys()
                .filter(|k| !self.0.contains_key(*k))
                .cloned(),
        );
        keys
    }
}
