//! Store bindings.
//!
//! A binding ties one registered signal to a store path: it seeds the
//! signal from the store, follows the path's change feed, and pushes local
//! writes back as signal envelopes.
//!
//! Every subscription is tagged with a generation. Rebinding to a new path
//! bumps the generation, and callbacks still arriving from the old path are
//! dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::namespace::{resolve_with_source, ScopeHints, ScopeSource};
use crate::reactive::Signal;
use crate::registry::SignalRegistry;
use crate::store::{self, ListenerId, NodeHandle, StoreAdapter};

/// Called when the store rejects a signal write, with the path and error.
pub type WriteErrorHook = Arc<dyn Fn(&str, &StoreError) + Send + Sync>;

/// Pending echoes kept per binding. Stores that never echo writes would
/// otherwise grow the queue forever.
///
/// Echoes are expected in write order. Any other record arriving on the
/// change feed clears the queue, as does a rejected write for its own entry.
const MAX_PENDING_ECHOES: usize = 16;

/// Type-erased view of a binding, used when the namespace changes.
pub(crate) trait BoundCell: Send + Sync {
    fn path(&self) -> String;

    /// Whether the path was derived from the global namespace.
    fn follows_global(&self) -> bool;

    /// Stop exchanging values with the store.
    fn freeze(&self);

    fn is_frozen(&self) -> bool;

    /// Re-resolve against `global` and move to the new path if it changed.
    fn rebind(self: Arc<Self>, global: Option<&str>, registry: &SignalRegistry);
}

/// Where a binding's path came from, kept so it can be re-resolved.
pub(crate) struct Origin {
    pub(crate) key: String,
    pub(crate) element_namespace: Option<String>,
    pub(crate) context_namespace: Option<String>,
    pub(crate) source: ScopeSource,
}

pub(crate) struct Binding<T>
where
    T: Clone + Send + Sync + 'static,
{
    signal: Signal<T>,
    origin: Origin,
    path: RwLock<String>,
    store: Arc<dyn StoreAdapter>,
    on_write_error: Option<WriteErrorHook>,
    generation: AtomicU64,
    frozen: AtomicBool,
    /// Set while subscribing during signal construction. Values arriving
    /// then are applied without notifying anyone.
    initializing: AtomicBool,
    /// Whether the change feed has delivered anything for this generation.
    live: AtomicBool,
    /// Value applied by the seeding read, which the change feed will replay.
    seed_replay: Mutex<Option<Value>>,
    /// Records this binding wrote and expects the change feed to echo.
    echoes: Mutex<VecDeque<Value>>,
    /// The change feed subscription of the current generation.
    listener: Mutex<Option<(Arc<dyn NodeHandle>, ListenerId)>>,
}

impl<T> Binding<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        signal: Signal<T>,
        origin: Origin,
        path: String,
        store: Arc<dyn StoreAdapter>,
        on_write_error: Option<WriteErrorHook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            signal,
            origin,
            path: RwLock::new(path),
            store,
            on_write_error,
            generation: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            live: AtomicBool::new(false),
            seed_replay: Mutex::new(None),
            echoes: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
        })
    }

    /// Wire the signal to the store: install the write path, seed the value
    /// and follow remote changes.
    pub(crate) fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.signal.set_path(Some(self.path.read().clone()));
        self.signal.set_uplink(Some(Arc::new(move |value: &T| {
            if let Some(binding) = weak.upgrade() {
                binding.push(value);
            }
        })));
        self.subscribe(true);
    }

    fn subscribe(self: &Arc<Self>, initializing: bool) {
        let generation = self.generation.load(Ordering::SeqCst);
        let path = self.path.read().clone();
        let node = self.store.get(&path);

        self.release();
        self.live.store(false, Ordering::SeqCst);
        *self.seed_replay.lock() = None;
        self.echoes.lock().clear();
        self.initializing.store(initializing, Ordering::SeqCst);
        debug!(%path, generation, "binding signal");

        let weak = Arc::downgrade(self);
        node.once(Box::new(move |record| {
            if let Some(binding) = weak.upgrade() {
                binding.seed(generation, record);
            }
        }));

        let weak = Arc::downgrade(self);
        let listener = node.on(Arc::new(move |record| {
            if let Some(binding) = weak.upgrade() {
                binding.ingest(generation, record);
            }
        }));
        *self.listener.lock() = Some((node, listener));

        self.initializing.store(false, Ordering::SeqCst);
    }

    /// Drop the current change feed subscription, if any.
    fn release(&self) {
        if let Some((node, listener)) = self.listener.lock().take() {
            node.off(listener);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation.load(Ordering::SeqCst) && !self.frozen.load(Ordering::SeqCst)
    }

    /// Result of the one-time read. `None` leaves the caller's initial value.
    fn seed(&self, generation: u64, record: Option<Value>) {
        if !self.is_current(generation) || self.live.load(Ordering::SeqCst) {
            return;
        }
        let Some(record) = record else {
            trace!(path = %self.path.read(), "nothing stored, keeping initial value");
            return;
        };
        if self.apply(&record) {
            *self.seed_replay.lock() = Some(record);
        }
    }

    /// A value from the change feed.
    fn ingest(&self, generation: u64, record: Value) {
        if !self.is_current(generation) {
            return;
        }
        self.live.store(true, Ordering::SeqCst);

        if let Some(seeded) = self.seed_replay.lock().take() {
            if seeded == record {
                return;
            }
        }
        {
            let mut echoes = self.echoes.lock();
            if echoes.front() == Some(&record) {
                echoes.pop_front();
                return;
            }
            echoes.clear();
        }
        self.apply(&record);
    }

    fn apply(&self, record: &Value) -> bool {
        match store::decode::<T>(record) {
            Ok(Some(value)) => {
                trace!(path = %self.path.read(), "remote value");
                if self.initializing.load(Ordering::SeqCst) {
                    self.signal.replace_silent(value);
                } else {
                    self.signal.set_remote(value);
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(path = %self.path.read(), %err, "ignoring malformed signal record");
                false
            }
        }
    }

    /// The store refused `record`, so it will never be echoed.
    fn forget_echo(&self, record: &Value) {
        let mut echoes = self.echoes.lock();
        if let Some(at) = echoes.iter().position(|pending| pending == record) {
            echoes.remove(at);
        }
    }

    fn push(self: &Arc<Self>, value: &T) {
        if self.frozen.load(Ordering::SeqCst) {
            return;
        }
        let path = self.path.read().clone();
        let record = match store::encode(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(%path, %err, "cannot encode signal value");
                return;
            }
        };

        {
            let mut echoes = self.echoes.lock();
            if echoes.len() == MAX_PENDING_ECHOES {
                echoes.pop_front();
            }
            echoes.push_back(record.clone());
        }

        let node = self.store.get(&path);
        let hook = self.on_write_error.clone();
        let weak = Arc::downgrade(self);
        let written = record.clone();
        node.put(
            record,
            Some(Box::new(move |ack: Result<(), StoreError>| {
                if let Err(err) = ack {
                    if let Some(binding) = weak.upgrade() {
                        binding.forget_echo(&written);
                    }
                    match hook {
                        Some(hook) => hook(&path, &err),
                        None => warn!(%path, %err, "store write failed"),
                    }
                }
            })),
        );
    }
}

impl<T> BoundCell for Binding<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn path(&self) -> String {
        self.path.read().clone()
    }

    fn follows_global(&self) -> bool {
        self.origin.source.follows_global()
    }

    fn freeze(&self) {
        if !self.frozen.swap(true, Ordering::SeqCst) {
            self.release();
            self.echoes.lock().clear();
            debug!(path = %self.path.read(), "signal frozen");
        }
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    fn rebind(self: Arc<Self>, global: Option<&str>, registry: &SignalRegistry) {
        if self.is_frozen() || !self.follows_global() {
            return;
        }

        let context: Vec<String> = self.origin.context_namespace.iter().cloned().collect();
        let hints = ScopeHints {
            element_namespace: self.origin.element_namespace.as_deref(),
            context_stack: &context,
            global_namespace: global,
        };
        let (next, _) = resolve_with_source(&self.origin.key, &hints);
        let current = self.path();
        if next == current {
            return;
        }

        if !registry.rename(&current, &next) {
            warn!(from = %current, to = %next, "rebind target already bound, freezing signal");
            self.freeze();
            return;
        }

        *self.path.write() = next.clone();
        self.signal.set_path(Some(next.clone()));
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(from = %current, to = %next, "signal rebound");
        self.subscribe(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Subscriber;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bind_to(store: Arc<dyn StoreAdapter>, signal: &Signal<i32>, path: &str) -> Arc<Binding<i32>> {
        let origin = Origin {
            key: path.to_owned(),
            element_namespace: None,
            context_namespace: None,
            source: ScopeSource::Absolute,
        };
        let binding = Binding::new(signal.clone(), origin, path.to_owned(), store, None);
        binding.attach();
        binding
    }

    fn bind(store: &MemoryStore, signal: &Signal<i32>, path: &str) -> Arc<Binding<i32>> {
        bind_to(Arc::new(store.clone()), signal, path)
    }

    fn record(value: i32) -> Value {
        store::encode(&value).unwrap()
    }

    /// Follows `MemoryStore` but never stores local writes: they are either
    /// rejected or acknowledged without being echoed yet.
    struct Detached {
        inner: MemoryStore,
        reject: bool,
    }

    struct DetachedNode {
        inner: Arc<dyn NodeHandle>,
        reject: bool,
    }

    impl NodeHandle for DetachedNode {
        fn path(&self) -> &str {
            self.inner.path()
        }
        fn once(&self, cb: store::OnceCallback) {
            self.inner.once(cb);
        }
        fn on(&self, cb: store::ChangeCallback) -> ListenerId {
            self.inner.on(cb)
        }
        fn put(&self, _value: Value, ack: Option<store::AckCallback>) {
            let outcome = if self.reject {
                Err(StoreError::Rejected("read only".into()))
            } else {
                Ok(())
            };
            if let Some(ack) = ack {
                ack(outcome);
            }
        }
        fn set(&self, value: Value, ack: Option<store::AckCallback>) {
            self.inner.set(value, ack);
        }
        fn map(&self, cb: store::MapCallback) -> ListenerId {
            self.inner.map(cb)
        }
        fn off(&self, listener: ListenerId) {
            self.inner.off(listener);
        }
    }

    impl StoreAdapter for Detached {
        fn get(&self, path: &str) -> Arc<dyn NodeHandle> {
            Arc::new(DetachedNode {
                inner: self.inner.get(path),
                reject: self.reject,
            })
        }
        fn user_auth(&self, identity: &str, secret: &str, cb: store::AuthCallback) {
            self.inner.user_auth(identity, secret, cb);
        }
        fn user_create(&self, identity: &str, secret: &str, cb: store::AckCallback) {
            self.inner.user_create(identity, secret, cb);
        }
    }

    #[test]
    fn seeding_replaces_the_value_quietly() {
        let store = MemoryStore::new();
        store.get("~a.k").put(json!({ "kind": "signal", "value": 3 }), None);

        let signal = Signal::new(0);
        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        signal.subscribe(Arc::new(Subscriber::new(move || {
            n.fetch_add(1, Ordering::SeqCst);
        })));

        let _binding = bind(&store, &signal, "~a.k");
        assert_eq!(signal.get(), 3);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_from_an_old_generation_are_dropped() {
        let store = MemoryStore::new();
        let signal = Signal::new(0);
        let binding = bind(&store, &signal, "~a.k");

        binding.generation.fetch_add(1, Ordering::SeqCst);
        binding.ingest(0, json!({ "kind": "signal", "value": 5 }));
        assert_eq!(signal.get(), 0);

        binding.ingest(1, json!({ "kind": "signal", "value": 5 }));
        assert_eq!(signal.get(), 5);
    }

    #[test]
    fn frozen_binding_stops_exchanging_values() {
        let store = MemoryStore::new();
        let signal = Signal::new(0);
        let binding = bind(&store, &signal, "~a.k");

        signal.set(1);
        binding.freeze();
        assert!(binding.is_frozen());

        signal.set(2);
        assert_eq!(store.record("~a.k").unwrap().value, json!({ "kind": "signal", "value": 1 }));

        store.apply_remote("~a.k", 1_000, json!({ "kind": "signal", "value": 9 }));
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn own_echo_does_not_notify_again() {
        let store = MemoryStore::new();
        let signal = Signal::new(0);
        let _binding = bind(&store, &signal, "~a.k");

        let notified = Arc::new(AtomicUsize::new(0));
        let n = notified.clone();
        signal.subscribe(Arc::new(Subscriber::new(move || {
            n.fetch_add(1, Ordering::SeqCst);
        })));

        signal.set(4);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(store.record("~a.k").unwrap().value, record(4));
    }

    #[test]
    fn rejected_write_leaves_no_echo_behind() {
        let memory = MemoryStore::new();
        let store = Arc::new(Detached {
            inner: memory.clone(),
            reject: true,
        });
        let signal = Signal::new(0);
        let binding = bind_to(store, &signal, "~a.k");

        signal.set(9);
        assert!(binding.echoes.lock().is_empty());

        memory.apply_remote("~a.k", 10, record(7));
        memory.apply_remote("~a.k", 11, record(9));
        assert_eq!(signal.get(), 9);
    }

    #[test]
    fn peer_write_ahead_of_echo_clears_pending_echoes() {
        let memory = MemoryStore::new();
        let store = Arc::new(Detached {
            inner: memory.clone(),
            reject: false,
        });
        let signal = Signal::new(0);
        let binding = bind_to(store, &signal, "~a.k");

        // Acknowledged, but the echo has not arrived yet.
        signal.set(9);
        assert_eq!(binding.echoes.lock().len(), 1);

        memory.apply_remote("~a.k", 10, record(7));
        assert_eq!(signal.get(), 7);
        assert!(binding.echoes.lock().is_empty());

        memory.apply_remote("~a.k", 11, record(9));
        assert_eq!(signal.get(), 9);
    }

    #[test]
    fn rebinding_releases_the_old_listener() {
        let store = MemoryStore::new();
        let registry = SignalRegistry::new();
        let signal = registry
            .get_or_create(Some("~a.k"), || Signal::new(0))
            .unwrap();
        let origin = Origin {
            key: "k".to_owned(),
            element_namespace: None,
            context_namespace: None,
            source: ScopeSource::Global,
        };
        let binding = Binding::new(signal, origin, "~a.k".to_owned(), Arc::new(store.clone()), None);
        binding.attach();
        assert_eq!(store.listener_count("~a.k"), 1);

        binding.clone().rebind(Some("~b"), &registry);
        assert_eq!(binding.path(), "~b.k");
        assert_eq!(store.listener_count("~a.k"), 0);
        assert_eq!(store.listener_count("~b.k"), 1);

        binding.freeze();
        assert_eq!(store.listener_count("~b.k"), 0);
    }
}
