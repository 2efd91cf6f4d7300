//! Typed publish/subscribe bus.
//!
//! The [`Bus`] holds one [`Channel`] per message type, created lazily on first
//! use. A channel maps handler identities to callbacks and delivers each
//! broadcast to every callback in registration order.
//!
//! Handlers subscribe either explicitly ([`Bus::add`] / [`Bus::remove`] with a
//! [`HandlerId`]) or through a [`Subscription`] guard that unsubscribes when it
//! is dropped.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Stable identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate a process-unique identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

type Callback<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Broadcast registry for a single message type.
pub struct Channel<M> {
    handlers: Mutex<Vec<(HandlerId, Callback<M>)>>,
}

impl<M> Default for Channel<M> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<M: 'static> Channel<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `id`. An existing registration for the same
    /// id is replaced in place, keeping its delivery position.
    pub fn add<F>(&self, id: HandlerId, callback: F)
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let callback: Callback<M> = Arc::new(callback);
        let mut handlers = self.lock();
        match handlers.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = callback,
            None => handlers.push((id, callback)),
        }
    }

    /// Unregister `id`. Unknown ids are ignored; returns whether a handler
    /// was removed.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn remove_all(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.lock().iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every handler in registration order.
    ///
    /// The handler list is snapshotted under the lock and the callbacks run
    /// after it is released, so a handler may add or remove registrations on
    /// this channel; such changes apply from the next broadcast.
    pub fn broadcast(&self, message: &M) {
        let snapshot: Vec<Callback<M>> =
            self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback(message);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Callback<M>)>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry of per-type channels. Share it as `Arc<Bus>`.
#[derive(Default)]
pub struct Bus {
    channels: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel for `M`, created on first use.
    pub fn channel<M: Send + Sync + 'static>(&self) -> Arc<Channel<M>> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let entry = channels
            .entry(TypeId::of::<M>())
            .or_insert_with(|| Arc::new(Channel::<M>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        drop(channels);
        match entry.downcast::<Channel<M>>() {
            Ok(channel) => channel,
            // Entries are only ever inserted under their own TypeId.
            Err(_) => unreachable!("bus channel stored under a foreign TypeId"),
        }
    }

    /// The channel for `M` if anything has used it yet.
    pub fn existing<M: Send + Sync + 'static>(&self) -> Option<Arc<Channel<M>>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&TypeId::of::<M>())
            .cloned()
            .and_then(|entry| entry.downcast::<Channel<M>>().ok())
    }

    pub fn add<M, F>(&self, id: HandlerId, callback: F)
    where
        M: Send + Sync + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.channel::<M>().add(id, callback);
    }

    pub fn remove<M: Send + Sync + 'static>(&self, id: HandlerId) -> bool {
        self.existing::<M>().is_some_and(|channel| channel.remove(id))
    }

    pub fn remove_all<M: Send + Sync + 'static>(&self) {
        if let Some(channel) = self.existing::<M>() {
            channel.remove_all();
        }
    }

    pub fn broadcast<M: Send + Sync + 'static>(&self, message: &M) {
        if let Some(channel) = self.existing::<M>() {
            channel.broadcast(message);
        }
    }

    /// Register `callback` under a fresh identity and return a guard that
    /// unregisters it on drop.
    pub fn subscribe<M, F>(&self, callback: F) -> Subscription
    where
        M: Send + Sync + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let channel = self.channel::<M>();
        let id = HandlerId::next();
        channel.add(id, callback);
        Subscription::new(id, &channel)
    }
}

/// Scoped registration. Dropping it removes the handler from its channel.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: HandlerId,
    cancel: Option<Box<dyn FnOnce(HandlerId) + Send + Sync>>,
}

impl Subscription {
    fn new<M: 'static>(id: HandlerId, channel: &Arc<Channel<M>>) -> Self
    where
        Channel<M>: Send + Sync,
    {
        let weak: Weak<Channel<M>> = Arc::downgrade(channel);
        Self {
            id,
            cancel: Some(Box::new(move |id| {
                if let Some(channel) = weak.upgrade() {
                    channel.remove(id);
                }
            })),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Keep the handler registered for the rest of the channel's life.
    pub fn detach(mut self) -> HandlerId {
        self.cancel = None;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[derive(Debug)]
    struct Pong;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn broadcast_reaches_handlers_in_registration_order() {
        let bus = Bus::new();
        let log = recorder();
        let (h1, h2) = (HandlerId::next(), HandlerId::next());

        let l = log.clone();
        bus.add(h1, move |m: &Ping| l.lock().unwrap().push(format!("h1:{}", m.0)));
        let l = log.clone();
        bus.add(h2, move |m: &Ping| l.lock().unwrap().push(format!("h2:{}", m.0)));

        bus.broadcast(&Ping(7));
        assert_eq!(log.lock().unwrap().as_slice(), &["h1:7", "h2:7"]);

        assert!(bus.remove::<Ping>(h1));
        bus.broadcast(&Ping(8));
        assert_eq!(log.lock().unwrap().as_slice(), &["h1:7", "h2:7", "h2:8"]);
    }

    #[test]
    fn re_adding_same_id_replaces_in_place() {
        let channel = Channel::<Ping>::new();
        let log = recorder();
        let (a, b) = (HandlerId::next(), HandlerId::next());

        let l = log.clone();
        channel.add(a, move |_| l.lock().unwrap().push("a-old".into()));
        let l = log.clone();
        channel.add(b, move |_| l.lock().unwrap().push("b".into()));
        let l = log.clone();
        channel.add(a, move |_| l.lock().unwrap().push("a-new".into()));

        assert_eq!(channel.len(), 2);
        channel.broadcast(&Ping(0));
        assert_eq!(log.lock().unwrap().as_slice(), &["a-new", "b"]);
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let bus = Bus::new();
        assert!(!bus.remove::<Ping>(HandlerId::next()));
        bus.add(HandlerId::next(), |_: &Ping| {});
        assert!(!bus.remove::<Ping>(HandlerId::next()));
        assert_eq!(bus.channel::<Ping>().len(), 1);
    }

    #[test]
    fn remove_all_clears_only_that_type() {
        let bus = Bus::new();
        bus.add(HandlerId::next(), |_: &Ping| {});
        bus.add(HandlerId::next(), |_: &Ping| {});
        bus.add(HandlerId::next(), |_: &Pong| {});

        bus.remove_all::<Ping>();
        assert!(bus.channel::<Ping>().is_empty());
        assert_eq!(bus.channel::<Pong>().len(), 1);
    }

    #[test]
    fn message_types_are_isolated() {
        let bus = Bus::new();
        let log = recorder();
        let l = log.clone();
        bus.add(HandlerId::next(), move |_: &Pong| l.lock().unwrap().push("pong".into()));

        bus.broadcast(&Ping(1));
        assert!(log.lock().unwrap().is_empty());
        bus.broadcast(&Pong);
        assert_eq!(log.lock().unwrap().as_slice(), &["pong"]);
    }

    #[test]
    fn channel_is_created_once_per_type() {
        let bus = Bus::new();
        assert!(bus.existing::<Ping>().is_none());
        let first = bus.channel::<Ping>();
        let second = bus.channel::<Ping>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn subscription_unsubscribes_on_drop() {
        let bus = Bus::new();
        let log = recorder();
        let l = log.clone();
        let sub = bus.subscribe(move |m: &Ping| l.lock().unwrap().push(format!("{}", m.0)));
        assert!(bus.channel::<Ping>().contains(sub.id()));

        bus.broadcast(&Ping(1));
        drop(sub);
        bus.broadcast(&Ping(2));

        assert_eq!(log.lock().unwrap().as_slice(), &["1"]);
        assert!(bus.channel::<Ping>().is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let bus = Bus::new();
        let id = bus.subscribe(|_: &Ping| {}).detach();
        assert!(bus.channel::<Ping>().contains(id));
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = Bus::new();
        let sub = bus.subscribe(|_: &Ping| {});
        drop(bus);
        drop(sub);
    }

    #[test]
    fn handler_may_unsubscribe_during_broadcast() {
        let bus = Arc::new(Bus::new());
        let log = recorder();
        let id = HandlerId::next();

        let b = bus.clone();
        let l = log.clone();
        bus.add(id, move |_: &Ping| {
            l.lock().unwrap().push("once".into());
            b.remove::<Ping>(id);
        });

        bus.broadcast(&Ping(1));
        bus.broadcast(&Ping(2));
        assert_eq!(log.lock().unwrap().as_slice(), &["once"]);
    }

    #[test]
    fn broadcast_from_other_threads() {
        let bus = Arc::new(Bus::new());
        let log = recorder();
        let l = log.clone();
        let _sub = bus.subscribe(move |m: &Ping| l.lock().unwrap().push(m.0.to_string()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let bus = bus.clone();
                std::thread::spawn(move || bus.broadcast(&Ping(i)))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["0", "1", "2", "3"]);
    }
}
