//! Per-connection subscriptions.
//!
//! A viewer declares the update types it renders by sending a subscribe
//! message. Each message replaces the previous set outright; there is no
//! incremental add or remove. A connection that has not subscribed yet
//! receives nothing.

use std::collections::{BTreeMap, BTreeSet};

use stopcast_protocol::UpdateType;

use crate::connection::ConnectionId;

/// The update types one connection wants to receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    wanted: BTreeSet<UpdateType>,
}

impl Subscription {
    /// An empty subscription; matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set (last write wins).
    pub fn set(&mut self, types: BTreeSet<UpdateType>) {
        self.wanted = types;
    }

    /// Whether updates tagged `update_type` should be delivered.
    pub fn matches(&self, update_type: UpdateType) -> bool {
        self.wanted.contains(&update_type)
    }

    pub fn types(&self) -> &BTreeSet<UpdateType> {
        &self.wanted
    }

    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }
}

/// Subscriptions of every live connection, keyed by connection id.
///
/// Entries are created on accept and removed when the connection goes away,
/// so a subscription never outlives its connection.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<ConnectionId, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection with an empty subscription.
    pub fn insert(&mut self, id: ConnectionId) {
        self.entries.insert(id, Subscription::new());
    }

    /// Replace the subscription of `id`.
    ///
    /// Returns `false` if `id` is not tracked.
    pub fn set_subscription(&mut self, id: ConnectionId, types: BTreeSet<UpdateType>) -> bool {
        match self.entries.get_mut(&id) {
            Some(subscription) => {
                subscription.set(types);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    /// Whether `id` is subscribed to `update_type`.
    pub fn matches(&self, id: ConnectionId, update_type: UpdateType) -> bool {
        self.entries
            .get(&id)
            .map_or(false, |subscription| subscription.matches(update_type))
    }

    /// Ids of every connection subscribed to `update_type`.
    pub fn subscribers_of(&self, update_type: UpdateType) -> BTreeSet<ConnectionId> {
        self.entries
            .iter()
            .filter(|(_, subscription)| subscription.matches(update_type))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Subscription> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, ordered by connection id.
    pub fn snapshot(&self) -> Vec<(ConnectionId, BTreeSet<UpdateType>)> {
        self.entries
            .iter()
            .map(|(id, subscription)| (*id, subscription.types().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(types: &[UpdateType]) -> BTreeSet<UpdateType> {
        types.iter().copied().collect()
    }

    #[test]
    fn test_new_subscription_matches_nothing() {
        let subscription = Subscription::new();
        assert!(subscription.is_empty());
        for update_type in UpdateType::ALL {
            assert!(!subscription.matches(update_type));
        }
    }

    #[test]
    fn test_resubscribe_replaces_instead_of_merging() {
        let mut subscription = Subscription::new();
        subscription.set(set(&[UpdateType::Register, UpdateType::Stack]));
        subscription.set(set(&[UpdateType::Stack]));

        assert!(subscription.matches(UpdateType::Stack));
        assert!(!subscription.matches(UpdateType::Register));
    }

    #[test]
    fn test_registry_lifecycle() {
        let mut registry = SubscriptionRegistry::new();
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);

        registry.insert(a);
        registry.insert(b);
        assert_eq!(registry.len(), 2);
        assert!(registry.subscribers_of(UpdateType::Disasm).is_empty());

        assert!(registry.set_subscription(a, set(&[UpdateType::Disasm])));
        assert!(registry.set_subscription(b, set(&[UpdateType::Backtrace])));
        assert_eq!(registry.subscribers_of(UpdateType::Disasm), set_ids(&[a]));
        assert!(registry.matches(b, UpdateType::Backtrace));
        assert!(!registry.matches(b, UpdateType::Disasm));

        registry.remove(a);
        assert!(registry.subscribers_of(UpdateType::Disasm).is_empty());
        assert!(!registry.set_subscription(a, set(&[UpdateType::Stack])));
        assert_eq!(
            registry.snapshot(),
            vec![(b, set(&[UpdateType::Backtrace]))]
        );
    }

    fn set_ids(ids: &[ConnectionId]) -> BTreeSet<ConnectionId> {
        ids.iter().copied().collect()
    }

    fn update_types() -> impl Strategy<Value = BTreeSet<UpdateType>> {
        prop::collection::btree_set(prop::sample::select(UpdateType::ALL.to_vec()), 0..=4)
    }

    proptest! {
        #[test]
        fn matches_reflects_only_the_last_subscription(
            history in prop::collection::vec(update_types(), 1..10),
        ) {
            let mut subscription = Subscription::new();
            for types in &history {
                subscription.set(types.clone());
            }

            let last = history.last().unwrap();
            for update_type in UpdateType::ALL {
                prop_assert_eq!(subscription.matches(update_type), last.contains(&update_type));
            }
        }
    }
}
