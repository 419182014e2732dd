//! Listener registry.
//!
//! Listeners are grouped in one [`SubscriptionSet`] per event name, plus one
//! set for the wildcard. `on` and `once` replace any set already registered
//! under the same name; `add` and `add_once` append to it instead.

use crate::event::{Event, EventKey};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

type ListenerFn = dyn Fn(&Event) + Send + Sync;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct Subscriber {
    handler: Arc<ListenerFn>,
    priority: i32,
    once: bool,
}

/// The listeners registered under one event name.
#[derive(Default)]
pub struct SubscriptionSet {
    subscribers: Mutex<Vec<Subscriber>>,
    disposed: AtomicBool,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a persistent listener.
    pub fn add<F>(&self, handler: F, priority: i32)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Subscriber {
            handler: Arc::new(handler),
            priority,
            once: false,
        });
    }

    /// Add a listener that is removed after its first dispatch.
    pub fn add_once<F>(&self, handler: F, priority: i32)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Subscriber {
            handler: Arc::new(handler),
            priority,
            once: true,
        });
    }

    fn insert(&self, subscriber: Subscriber) {
        let mut subscribers = lock(&self.subscribers);
        // After every listener of equal or higher priority.
        let position = subscribers
            .iter()
            .position(|s| s.priority < subscriber.priority)
            .unwrap_or(subscribers.len());
        subscribers.insert(position, subscriber);
    }

    /// Invoke every listener, highest priority first.
    ///
    /// Once-listeners are removed before any listener runs, so a listener
    /// that dispatches the same event again cannot trigger them twice.
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        if self.is_disposed() {
            return 0;
        }

        let snapshot = {
            let mut subscribers = lock(&self.subscribers);
            let snapshot = subscribers.clone();
            subscribers.retain(|s| !s.once);
            snapshot
        };

        for subscriber in &snapshot {
            (subscriber.handler)(event);
        }
        snapshot.len()
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Check if the set has no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.subscribers).is_empty()
    }

    /// Drop every listener; later dispatches do nothing.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        lock(&self.subscribers).clear();
    }

    /// Whether [`dispose`](Self::dispose) was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Event name to listener set mapping.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    /// Sets indexed by event name.
    named: DashMap<String, Arc<SubscriptionSet>>,
    /// The wildcard set, consulted when no named set matches.
    wildcard: Mutex<Option<Arc<SubscriptionSet>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set for `event` with one persistent listener.
    ///
    /// Logs a warning when a set already existed; its listeners are dropped.
    pub fn on<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let set = SubscriptionSet::new();
        set.add(handler, priority.unwrap_or(0));
        self.replace(event.into(), set);
    }

    /// Replace the set for `event` with one once-listener.
    ///
    /// Logs a warning when a set already existed; its listeners are dropped.
    pub fn once<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let set = SubscriptionSet::new();
        set.add_once(handler, priority.unwrap_or(0));
        self.replace(event.into(), set);
    }

    /// Append a persistent listener to the set for `event`, creating it if needed.
    pub fn add<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.get_or_create(event.into())
            .add(handler, priority.unwrap_or(0));
    }

    /// Append a once-listener to the set for `event`, creating it if needed.
    pub fn add_once<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.get_or_create(event.into())
            .add_once(handler, priority.unwrap_or(0));
    }

    /// Dispose and remove the set for `event`.
    ///
    /// Returns `true` if a set was registered.
    pub fn off(&self, event: impl Into<EventKey>) -> bool {
        let key = event.into();
        let removed = match &key {
            EventKey::Named(name) => self.named.remove(name).map(|(_, set)| set),
            EventKey::Wildcard => lock(&self.wildcard).take(),
        };

        match removed {
            Some(set) => {
                set.dispose();
                debug!(event = %key, "Listeners removed");
                true
            }
            None => {
                debug!(event = %key, "No listeners to remove");
                false
            }
        }
    }

    /// The set registered under exactly this key.
    #[must_use]
    pub fn get(&self, key: &EventKey) -> Option<Arc<SubscriptionSet>> {
        match key {
            EventKey::Named(name) => self.named.get(name).map(|set| set.value().clone()),
            EventKey::Wildcard => lock(&self.wildcard).clone(),
        }
    }

    /// The set an incoming event named `event_name` is delivered to: the
    /// named set if there is one, otherwise the wildcard set.
    #[must_use]
    pub fn resolve(&self, event_name: &str) -> Option<Arc<SubscriptionSet>> {
        self.named
            .get(event_name)
            .map(|set| set.value().clone())
            .or_else(|| lock(&self.wildcard).clone())
    }

    /// Whether a set is registered under exactly this key.
    #[must_use]
    pub fn contains(&self, event: impl Into<EventKey>) -> bool {
        self.get(&event.into()).is_some()
    }

    /// Dispatch to the set registered under exactly `event.name`.
    ///
    /// Returns the number of listeners invoked; 0 when no set exists.
    pub fn dispatch(&self, event: &Event) -> usize {
        match self.get(&EventKey::from(event.name.as_str())) {
            Some(set) => set.dispatch(event),
            None => {
                trace!(event = %event.name, "No listeners");
                0
            }
        }
    }

    /// Names with a registered set, the wildcard excluded.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.named.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered sets, the wildcard included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.named.len() + usize::from(lock(&self.wildcard).is_some())
    }

    /// Check if no set is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every set out of `donor` into this registry.
    ///
    /// Sets already registered here are discarded, not merged; `donor` is
    /// left empty.
    pub fn adopt(&self, donor: &ListenerRegistry) {
        let sets: Vec<(String, Arc<SubscriptionSet>)> = donor
            .named
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        donor.named.clear();
        let wildcard = lock(&donor.wildcard).take();

        self.named.clear();
        for (name, set) in sets {
            self.named.insert(name, set);
        }
        *lock(&self.wildcard) = wildcard;

        debug!(sets = self.len(), "Adopted listeners");
    }

    fn replace(&self, key: EventKey, set: SubscriptionSet) {
        let set = Arc::new(set);
        let previous = match &key {
            EventKey::Named(name) => self.named.insert(name.clone(), set),
            EventKey::Wildcard => lock(&self.wildcard).replace(set),
        };

        if let Some(previous) = previous {
            warn!(event = %key, "Listeners for event already exist, replacing them");
            previous.dispose();
        }
    }

    fn get_or_create(&self, key: EventKey) -> Arc<SubscriptionSet> {
        match key {
            EventKey::Named(name) => self.named.entry(name).or_default().value().clone(),
            EventKey::Wildcard => lock(&self.wildcard).get_or_insert_with(Default::default).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        (count, move |_: &Event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> impl Fn(&Event) + Send + Sync + 'static {
        let log = log.clone();
        move |_: &Event| log.lock().unwrap().push(label)
    }

    #[test]
    fn test_dispatch_without_listeners_is_noop() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.dispatch(&Event::new("nobody", json!({}))), 0);
    }

    #[test]
    fn test_on_twice_replaces() {
        let registry = ListenerRegistry::new();
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();

        registry.on("hello", first_handler, None);
        registry.on("hello", second_handler, None);
        registry.dispatch(&Event::new("hello", json!({})));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_fires_once() {
        let registry = ListenerRegistry::new();
        let (count, handler) = counter();

        registry.once("hello", handler, None);
        let event = Event::new("hello", json!({}));
        assert_eq!(registry.dispatch(&event), 1);
        assert_eq!(registry.dispatch(&event), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_alongside_persistent() {
        let registry = ListenerRegistry::new();
        let (once_count, once_handler) = counter();
        let (persistent_count, persistent_handler) = counter();

        registry.add_once("hello", once_handler, None);
        registry.add("hello", persistent_handler, None);

        let event = Event::new("hello", json!({}));
        registry.dispatch(&event);
        registry.dispatch(&event);
        registry.dispatch(&event);

        assert_eq!(once_count.load(Ordering::SeqCst), 1);
        assert_eq!(persistent_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_off_removes_set() {
        let registry = ListenerRegistry::new();
        let (count, handler) = counter();

        registry.on("hello", handler, None);
        assert!(registry.off("hello"));
        assert_eq!(registry.dispatch(&Event::new("hello", json!({}))), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!registry.off("hello"));
    }

    #[test]
    fn test_priority_order_in_set() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.add("e", recorder(&log, "low"), Some(-1));
        registry.add("e", recorder(&log, "first-default"), None);
        registry.add("e", recorder(&log, "high"), Some(3));
        registry.add("e", recorder(&log, "second-default"), None);

        registry.dispatch(&Event::new("e", json!({})));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["high", "first-default", "second-default", "low"]
        );
    }

    #[test]
    fn test_resolve_falls_back_to_wildcard() {
        let registry = ListenerRegistry::new();
        let (named, named_handler) = counter();
        let (wild, wild_handler) = counter();

        registry.on("hello", named_handler, None);
        registry.on("*", wild_handler, None);

        registry.resolve("hello").unwrap().dispatch(&Event::new("hello", json!({})));
        registry.resolve("other").unwrap().dispatch(&Event::new("other", json!({})));

        assert_eq!(named.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 1);

        // Named dispatch never reaches the wildcard.
        assert_eq!(registry.dispatch(&Event::new("other", json!({}))), 0);
    }

    #[test]
    fn test_replaced_set_is_disposed() {
        let registry = ListenerRegistry::new();
        let (count, handler) = counter();

        registry.on("hello", handler, None);
        let old = registry.get(&EventKey::from("hello")).unwrap();
        registry.on("hello", |_: &Event| {}, None);

        assert!(old.is_disposed());
        assert_eq!(old.dispatch(&Event::new("hello", json!({}))), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_adopt_replaces_wholesale() {
        let donor = ListenerRegistry::new();
        let target = ListenerRegistry::new();
        let (count, handler) = counter();

        donor.on("hello", handler, None);
        donor.on("*", |_: &Event| {}, None);
        target.on("stale", |_: &Event| {}, None);

        target.adopt(&donor);

        assert!(donor.is_empty());
        assert!(!target.contains("stale"));
        assert!(target.contains("*"));
        target.dispatch(&Event::new("hello", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn test_listener_can_reenter_registry() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();

        registry.on(
            "first",
            move |_: &Event| {
                inner.off("first");
                inner.on("second", |_: &Event| {}, None);
            },
            None,
        );

        assert_eq!(registry.dispatch(&Event::new("first", json!({}))), 1);
        assert!(registry.contains("second"));
        assert!(!registry.contains("first"));
    }
}
