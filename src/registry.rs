//! The set of connected subscribers.

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::actions::LineEvent;

/// Identifies a subscriber for as long as it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a subscriber could not take an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriberSendError {
    /// The subscriber went away.
    #[error("Subscriber closed")]
    Closed,

    /// The subscriber is not keeping up.
    #[error("Subscriber is lagging behind")]
    Lagging,
}

/// Something which can be handed events.
///
/// Sending must not wait on the receiving side,
/// a subscriber which can't take an event right away fails instead.
pub trait Subscriber: Send + Sync {
    /// Hand over the event.
    fn send(&self, event: &Arc<LineEvent>) -> Result<(), SubscriberSendError>;
}

impl Subscriber for mpsc::Sender<Arc<LineEvent>> {
    fn send(&self, event: &Arc<LineEvent>) -> Result<(), SubscriberSendError> {
        self.try_send(Arc::clone(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubscriberSendError::Lagging,
            mpsc::error::TrySendError::Closed(_) => SubscriberSendError::Closed,
        })
    }
}

/// The currently connected subscribers.
///
/// Fan-out iterates over a [`Registry::snapshot`],
/// so membership may change while a pass is under way without the pass noticing.
#[derive(Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl Registry {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber.
    pub fn add<S>(&self, subscriber: S) -> SubscriberId
    where
        S: Subscriber + 'static,
    {
        let id = SubscriberId::new();
        self.subscribers().insert(id, Arc::new(subscriber));

        debug!(%id, "Subscriber added");
        id
    }

    /// Unregister a subscriber.
    /// Returns whether it was registered; removing twice is fine.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers().remove(&id).is_some();

        if removed {
            debug!(%id, "Subscriber removed");
        }

        removed
    }

    /// Unregister everyone. Returns how many were registered.
    pub fn clear(&self) -> usize {
        let removed = self.subscribers().drain().count();
        debug!(%removed, "Subscribers cleared");

        removed
    }

    /// Whether the subscriber is registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers().contains_key(&id)
    }

    /// The subscribers registered right now.
    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.subscribers()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect()
    }

    /// Call `f` on each subscriber registered right now.
    /// The registry is not locked while `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(SubscriberId, &dyn Subscriber),
    {
        for (id, subscriber) in self.snapshot() {
            f(id, subscriber.as_ref());
        }
    }

    /// How many subscribers there are.
    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    /// True if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    struct Null;

    impl Subscriber for Null {
        fn send(&self, _: &Arc<LineEvent>) -> Result<(), SubscriberSendError> {
            Ok(())
        }
    }

    #[test]
    fn add_and_remove() {
        let registry = Registry::default();

        let a = registry.add(Null);
        let b = registry.add(Null);
        assert_eq!(registry.len(), 2);
        assert_ne!(a, b);

        assert!(registry.remove(a));
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::default();
        let a = registry.add(Null);
        let b = registry.add(Null);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(b));
    }

    #[test]
    fn clear_empties() {
        let registry = Registry::default();
        let a = registry.add(Null);
        registry.add(Null);

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(!registry.remove(a));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_changes() {
        let registry = Registry::default();
        let a = registry.add(Null);
        registry.add(Null);

        let snapshot = registry.snapshot();
        registry.remove(a);
        registry.add(Null);

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|(id, _)| *id == a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn for_each_may_mutate_the_registry() {
        let registry = Registry::default();
        for _ in 0..5 {
            registry.add(Null);
        }

        let mut seen = 0;
        registry.for_each(|id, _| {
            seen += 1;
            registry.remove(id);
            registry.add(Null);
        });

        assert_eq!(seen, 5);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn concurrent_removal_of_the_same_subscriber() {
        let registry = Arc::new(Registry::default());
        let ids = (0..100).map(|_| registry.add(Null)).collect::<Vec<_>>();
        let keep = registry.add(Null);

        let handles = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ids = ids.clone();
                thread::spawn(move || ids.into_iter().filter(|id| registry.remove(*id)).count())
            })
            .collect::<Vec<_>>();

        let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(removed, 100);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(keep));
    }

    #[test]
    fn channel_subscriber_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel::<Arc<LineEvent>>(1);
        let event = Arc::new(LineEvent::example());

        assert_eq!(Subscriber::send(&tx, &event), Ok(()));
        assert_eq!(
            Subscriber::send(&tx, &event),
            Err(SubscriberSendError::Lagging)
        );

        drop(rx);
        assert_eq!(
            Subscriber::send(&tx, &event),
            Err(SubscriberSendError::Closed)
        );
    }
}
