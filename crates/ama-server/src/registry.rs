use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ama_core::RoomId;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection::Connection;

/// Unique subscriber identifier. Ordered by admission time.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(String);

impl Default for SubscriberId {
    fn default() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }
}

impl SubscriberId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live observer of one room: where to write, and how to tear it down.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    connection: Arc<dyn Connection>,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn new(connection: Arc<dyn Connection>, cancel: CancellationToken) -> Self {
        Self {
            id: SubscriberId::new(),
            connection,
            cancel,
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Trigger teardown. The owning lifecycle task wakes and removes itself.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Room → subscribers. Every operation takes the one registry-wide lock and
/// releases it before returning; nothing here touches the network.
#[derive(Default)]
pub struct SubscriberRegistry {
    rooms: Mutex<HashMap<RoomId, BTreeMap<SubscriberId, Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscriber under a room, creating the room's set if absent.
    pub fn register(&self, room_id: RoomId, subscriber: Subscriber) {
        let mut rooms = self.rooms.lock();
        rooms
            .entry(room_id)
            .or_default()
            .insert(subscriber.id.clone(), subscriber);
    }

    /// Remove a subscriber. Returns whether it was still present; removing
    /// twice is a no-op.
    pub fn unregister(&self, room_id: &RoomId, id: &SubscriberId) -> bool {
        let mut rooms = self.rooms.lock();
        rooms
            .get_mut(room_id)
            .and_then(|subscribers| subscribers.remove(id))
            .is_some()
    }

    /// Copy of the room's current members. Later registrations and removals
    /// are not reflected in the returned vector.
    pub fn snapshot_for(&self, room_id: &RoomId) -> Vec<Subscriber> {
        let rooms = self.rooms.lock();
        rooms
            .get(room_id)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the room has ever had an entry (it may be empty).
    pub fn has_room(&self, room_id: &RoomId) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.lock().get(room_id).map_or(0, BTreeMap::len)
    }

    /// Number of rooms with at least one subscriber.
    pub fn active_rooms(&self) -> usize {
        self.rooms.lock().values().filter(|s| !s.is_empty()).count()
    }

    pub fn total_subscribers(&self) -> usize {
        self.rooms.lock().values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::RecordingConnection;

    fn subscriber() -> Subscriber {
        Subscriber::new(RecordingConnection::new(), CancellationToken::new())
    }

    #[test]
    fn subscriber_ids_unique() {
        let a = SubscriberId::new();
        let b = SubscriberId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sub_"));
    }

    #[test]
    fn register_creates_room_entry() {
        let registry = SubscriberRegistry::new();
        let room = RoomId::new();
        assert!(!registry.has_room(&room));

        registry.register(room, subscriber());
        assert!(registry.has_room(&room));
        assert_eq!(registry.subscriber_count(&room), 1);
        assert_eq!(registry.total_subscribers(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let room = RoomId::new();
        let sub = subscriber();
        let other = subscriber();
        registry.register(room, sub.clone());
        registry.register(room, other.clone());

        assert!(registry.unregister(&room, sub.id()));
        assert!(!registry.unregister(&room, sub.id()));

        let remaining = registry.snapshot_for(&room);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), other.id());
    }

    #[test]
    fn emptied_room_entry_may_remain() {
        let registry = SubscriberRegistry::new();
        let room = RoomId::new();
        let sub = subscriber();
        registry.register(room, sub.clone());
        registry.unregister(&room, sub.id());

        assert_eq!(registry.subscriber_count(&room), 0);
        assert!(registry.snapshot_for(&room).is_empty());
        assert_eq!(registry.active_rooms(), 0);
    }

    #[test]
    fn unregister_unknown_room_is_noop() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.unregister(&RoomId::new(), &SubscriberId::new()));
        assert_eq!(registry.total_subscribers(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutations() {
        let registry = SubscriberRegistry::new();
        let room = RoomId::new();
        let first = subscriber();
        registry.register(room, first.clone());

        let snapshot = registry.snapshot_for(&room);
        registry.register(room, subscriber());
        registry.unregister(&room, first.id());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), first.id());
        assert_eq!(registry.subscriber_count(&room), 1);
    }

    #[test]
    fn snapshot_is_in_admission_order() {
        let registry = SubscriberRegistry::new();
        let room = RoomId::new();
        let subs: Vec<Subscriber> = (0..5).map(|_| subscriber()).collect();
        for sub in subs.iter().rev() {
            registry.register(room, sub.clone());
        }

        let ids: Vec<_> = registry.snapshot_for(&room).iter().map(|s| s.id().clone()).collect();
        let expected: Vec<_> = subs.iter().map(|s| s.id().clone()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn rooms_are_isolated() {
        let registry = SubscriberRegistry::new();
        let a = RoomId::new();
        let b = RoomId::new();
        registry.register(a, subscriber());
        registry.register(a, subscriber());
        registry.register(b, subscriber());

        assert_eq!(registry.subscriber_count(&a), 2);
        assert_eq!(registry.subscriber_count(&b), 1);
        assert_eq!(registry.active_rooms(), 2);
        assert_eq!(registry.total_subscribers(), 3);
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let sub = subscriber();
        let clone = sub.clone();
        assert!(!clone.is_cancelled());
        sub.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn concurrent_register_and_unregister() {
        let registry = Arc::new(SubscriberRegistry::new());
        let room = RoomId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let sub = subscriber();
                        registry.register(room, sub.clone());
                        let _ = registry.snapshot_for(&room);
                        assert!(registry.unregister(&room, sub.id()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.subscriber_count(&room), 0);
    }
}
