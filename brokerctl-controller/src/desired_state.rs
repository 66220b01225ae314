use brokerctl_core::{AddressKind, AddressResource};
use std::collections::BTreeMap;
use tracing::warn;

/// The addresses the broker should have, keyed by address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    addresses: BTreeMap<String, AddressResource>,
}

impl DesiredState {
    /// Builds the desired state from a list of address specs.
    ///
    /// Entries that fail validation are skipped with a warning. When two entries share an address
    /// the later one wins.
    pub fn from_list(list: Vec<AddressResource>) -> Self {
        let mut addresses = BTreeMap::new();
        for resource in list {
            if let Err(e) = resource.validate() {
                warn!(error = %e, "skipping malformed desired address");
                continue;
            }
            if let Some(previous) = addresses.insert(resource.address.clone(), resource) {
                warn!(
                    address = %previous.address,
                    kind = %previous.kind,
                    "duplicate desired address, keeping the last definition"
                );
            }
        }
        DesiredState { addresses }
    }

    pub fn get(&self, address: &str) -> Option<&AddressResource> {
        self.addresses.get(address)
    }

    pub fn contains(&self, address: &str, kind: AddressKind) -> bool {
        self.addresses
            .get(address)
            .is_some_and(|desired| desired.kind == kind)
    }

    /// Whether `address` is declared as a dead-letter address.
    pub fn is_deadletter(&self, address: &str) -> bool {
        self.contains(address, AddressKind::DeadLetter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressResource> {
        self.addresses.values()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl FromIterator<AddressResource> for DesiredState {
    fn from_iter<I: IntoIterator<Item = AddressResource>>(iter: I) -> Self {
        DesiredState::from_list(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_entries_are_skipped() {
        let desired = DesiredState::from_list(vec![
            AddressResource::queue("q1"),
            AddressResource::queue(""),
            AddressResource::new("s1", AddressKind::Subscription),
        ]);
        assert_eq!(desired.len(), 1);
        assert!(desired.contains("q1", AddressKind::Queue));
    }

    #[test]
    fn later_duplicates_win() {
        let desired: DesiredState = vec![AddressResource::queue("a"), AddressResource::deadletter("a")]
            .into_iter()
            .collect();
        assert_eq!(desired.len(), 1);
        assert!(desired.is_deadletter("a"));
        assert!(!desired.contains("a", AddressKind::Queue));
    }
}
