//! Graph Snapshot and Node Directory
//!
//! The immutable values a refresh produces. A [`GraphView`] pairs a snapshot
//! with the directory derived from it; the cache only ever publishes whole
//! views.

use crate::domain::ports::{normalize_address, NodeAddress, ParticipantId, SystemState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Participants per topic or service name
pub type RoleMap = BTreeMap<String, BTreeSet<ParticipantId>>;

// =============================================================================
// Graph Snapshot
// =============================================================================

/// Roles a participant holds in the graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRoles {
    pub publishes: Vec<String>,
    pub subscribes: Vec<String>,
    pub serves: Vec<String>,
}

impl ParticipantRoles {
    pub fn is_empty(&self) -> bool {
        self.publishes.is_empty() && self.subscribes.is_empty() && self.serves.is_empty()
    }
}

/// Who publishes, subscribes and serves on every name, at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub publishers: RoleMap,
    pub subscribers: RoleMap,
    pub services: RoleMap,
}

impl GraphSnapshot {
    /// Build a snapshot from the registry's raw answer, deduplicating ids
    pub fn from_system_state(state: &SystemState) -> Self {
        fn collect(raw: &BTreeMap<String, Vec<String>>) -> RoleMap {
            raw.iter()
                .map(|(name, ids)| {
                    (name.clone(), ids.iter().map(ParticipantId::from).collect())
                })
                .collect()
        }

        Self {
            publishers: collect(&state.publishers),
            subscribers: collect(&state.subscribers),
            services: collect(&state.services),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty() && self.services.is_empty()
    }

    /// Every distinct participant across all roles
    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        self.publishers
            .values()
            .chain(self.subscribers.values())
            .chain(self.services.values())
            .flatten()
            .cloned()
            .collect()
    }

    /// Topic names with at least one publisher or subscriber
    pub fn topics(&self) -> BTreeSet<&str> {
        self.publishers
            .keys()
            .chain(self.subscribers.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn publishers_of(&self, topic: &str) -> Option<&BTreeSet<ParticipantId>> {
        self.publishers.get(topic)
    }

    pub fn subscribers_of(&self, topic: &str) -> Option<&BTreeSet<ParticipantId>> {
        self.subscribers.get(topic)
    }

    pub fn providers_of(&self, service: &str) -> Option<&BTreeSet<ParticipantId>> {
        self.services.get(service)
    }

    /// Collect the names a participant appears under, per role
    pub fn roles_of(&self, participant: &ParticipantId) -> ParticipantRoles {
        fn names(map: &RoleMap, participant: &ParticipantId) -> Vec<String> {
            map.iter()
                .filter(|(_, ids)| ids.contains(participant))
                .map(|(name, _)| name.clone())
                .collect()
        }

        ParticipantRoles {
            publishes: names(&self.publishers, participant),
            subscribes: names(&self.subscribers, participant),
            serves: names(&self.services, participant),
        }
    }
}

// =============================================================================
// Node Directory
// =============================================================================

/// Network address -> participant, derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDirectory {
    /// Keyed by `host:port`
    by_address: HashMap<String, ParticipantId>,
    addresses: HashMap<ParticipantId, NodeAddress>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved participant
    ///
    /// Last write wins: if the address already maps to another participant
    /// that participant is displaced and returned.
    pub fn insert(
        &mut self,
        participant: ParticipantId,
        address: NodeAddress,
    ) -> Option<ParticipantId> {
        let displaced = self
            .by_address
            .insert(address.authority(), participant.clone())
            .filter(|previous| previous != &participant);
        self.addresses.insert(participant, address);
        displaced
    }

    /// Participant listening at `address` (`host:port` or a node URI)
    pub fn resolve(&self, address: &str) -> Option<&ParticipantId> {
        self.by_address.get(&normalize_address(address))
    }

    /// Address a participant resolved to
    pub fn address_of(&self, participant: &ParticipantId) -> Option<&NodeAddress> {
        self.addresses.get(participant)
    }

    /// Number of addresses in the directory
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Address -> participant, ordered by address
    pub fn entries(&self) -> BTreeMap<&str, &ParticipantId> {
        self.by_address
            .iter()
            .map(|(address, id)| (address.as_str(), id))
            .collect()
    }
}

impl FromIterator<(ParticipantId, NodeAddress)> for NodeDirectory {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, NodeAddress)>>(iter: I) -> Self {
        let mut directory = Self::new();
        for (participant, address) in iter {
            directory.insert(participant, address);
        }
        directory
    }
}

// =============================================================================
// Graph View
// =============================================================================

/// A snapshot and the directory computed from it, published together
#[derive(Debug, Clone, Default)]
pub struct GraphView {
    /// Successful refresh count at the time this view was built; 0 = never
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub snapshot: Arc<GraphSnapshot>,
    pub directory: Arc<NodeDirectory>,
}

impl GraphView {
    pub fn new(generation: u64, snapshot: GraphSnapshot, directory: NodeDirectory) -> Self {
        Self {
            generation,
            refreshed_at: Some(Utc::now()),
            snapshot: Arc::new(snapshot),
            directory: Arc::new(directory),
        }
    }

    /// The view readers see before the first successful refresh
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.generation > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_state() -> SystemState {
        let mut state = SystemState::default();
        state
            .publishers
            .insert("/scan".into(), vec!["n1".into(), "n1".into()]);
        state.subscribers.insert("/scan".into(), vec!["n2".into()]);
        state
            .services
            .insert("/n1/get_loggers".into(), vec!["n1".into()]);
        state
    }

    #[test]
    fn test_snapshot_deduplicates_participants() {
        let snapshot = GraphSnapshot::from_system_state(&scan_state());

        assert_eq!(snapshot.publishers_of("/scan").unwrap().len(), 1);
        let participants = snapshot.participants();
        assert_eq!(participants.len(), 2);
        assert!(participants.contains(&ParticipantId::from("n1")));
        assert!(participants.contains(&ParticipantId::from("n2")));
    }

    #[test]
    fn test_snapshot_roles() {
        let snapshot = GraphSnapshot::from_system_state(&scan_state());

        let roles = snapshot.roles_of(&"n1".into());
        assert_eq!(roles.publishes, vec!["/scan".to_string()]);
        assert!(roles.subscribes.is_empty());
        assert_eq!(roles.serves, vec!["/n1/get_loggers".to_string()]);

        assert!(snapshot.roles_of(&"ghost".into()).is_empty());
        assert_eq!(snapshot.topics().into_iter().collect::<Vec<_>>(), vec!["/scan"]);
    }

    #[test]
    fn test_directory_resolves_uri_and_authority() {
        let directory: NodeDirectory = vec![
            ("n1".into(), NodeAddress::new("http", "10.0.0.1", 9)),
            ("n2".into(), NodeAddress::new("http", "10.0.0.2", 9)),
        ]
        .into_iter()
        .collect();

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.resolve("10.0.0.1:9"), Some(&"n1".into()));
        assert_eq!(directory.resolve("http://10.0.0.2:9/"), Some(&"n2".into()));
        assert_eq!(directory.resolve("10.0.0.3:9"), None);
    }

    #[test]
    fn test_directory_last_write_wins() {
        let mut directory = NodeDirectory::new();
        let shared = NodeAddress::new("http", "10.0.0.1", 9);

        assert_eq!(directory.insert("stale".into(), shared.clone()), None);
        assert_eq!(
            directory.insert("fresh".into(), shared.clone()),
            Some("stale".into())
        );
        assert_eq!(directory.resolve("10.0.0.1:9"), Some(&"fresh".into()));
        assert_eq!(directory.len(), 1);

        // Re-inserting the current owner displaces nobody
        assert_eq!(directory.insert("fresh".into(), shared), None);
    }

    #[test]
    fn test_empty_view() {
        let view = GraphView::empty();
        assert!(!view.is_populated());
        assert!(view.snapshot.is_empty());
        assert!(view.directory.is_empty());
        assert!(view.refreshed_at.is_none());
    }
}
