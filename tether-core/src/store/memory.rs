//! In-memory store.
//!
//! A complete, in-process [`StoreAdapter`]. Every record carries a state
//! number; a write with a lower state than the stored one loses, and equal
//! states are broken by comparing the serialized values, so replicas that
//! see the same writes in any order end up with the same data.
//!
//! Callbacks are invoked synchronously on the writer's thread, after all
//! internal locks have been released.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{
    AckCallback, AuthCallback, ChangeCallback, ListenerId, MapCallback, MapEvent, NodeHandle,
    OnceCallback, StoreAdapter,
};
use crate::error::StoreError;

/// A stored value and the state it was written at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub state: u64,
    pub value: Value,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    nodes: BTreeMap<String, Record>,
    children: BTreeMap<String, Vec<(String, Value)>>,
}

struct Account {
    secret: String,
    public_key: String,
}

#[derive(Default)]
struct Inner {
    clock: AtomicU64,
    nodes: DashMap<String, Record>,
    children: DashMap<String, IndexMap<String, Value>>,
    next_listener: AtomicU64,
    listeners: DashMap<String, Vec<(ListenerId, ChangeCallback)>>,
    map_listeners: DashMap<String, Vec<(ListenerId, MapCallback)>>,
    users: DashMap<String, Account>,
}

/// An in-process graph store.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a write that originated on another replica.
    ///
    /// Returns whether the write won. Listeners are only notified when it did.
    pub fn apply_remote(&self, path: &str, state: u64, value: Value) -> bool {
        self.inner.clock.fetch_max(state, Ordering::SeqCst);
        self.inner.merge(path, state, value)
    }

    /// The record stored at `path`.
    pub fn record(&self, path: &str) -> Option<Record> {
        self.inner.nodes.get(path).map(|r| r.value().clone())
    }

    /// Number of change listeners on `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        self.inner.listeners.get(path).map_or(0, |l| l.len())
    }

    /// Number of collection listeners on `path`.
    pub fn map_listener_count(&self, path: &str) -> usize {
        self.inner.map_listeners.get(path).map_or(0, |l| l.len())
    }

    /// Members of the collection at `path`, in insertion order.
    pub fn members(&self, path: &str) -> Vec<(String, Value)> {
        self.inner
            .children
            .get(path)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Serialize all nodes and collections to MessagePack.
    ///
    /// Listeners and accounts are not included.
    pub fn snapshot(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let snapshot = Snapshot {
            nodes: self
                .inner
                .nodes
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            children: self
                .inner
                .children
                .iter()
                .map(|e| {
                    let members = e.value().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    (e.key().clone(), members)
                })
                .collect(),
        };
        rmp_serde::to_vec_named(&snapshot)
    }

    /// Build a store from a [`snapshot`](Self::snapshot).
    pub fn restore(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        let snapshot: Snapshot = rmp_serde::from_slice(bytes)?;
        let store = Self::new();
        let max_state = snapshot.nodes.values().map(|r| r.state).max().unwrap_or(0);
        store.inner.clock.store(max_state, Ordering::SeqCst);
        for (path, record) in snapshot.nodes {
            store.inner.nodes.insert(path, record);
        }
        for (path, members) in snapshot.children {
            store.inner.children.insert(path, members.into_iter().collect());
        }
        Ok(store)
    }
}

impl Inner {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    /// Last-write-wins merge. Returns whether `value` was stored.
    fn merge(&self, path: &str, state: u64, value: Value) -> bool {
        let accepted = match self.nodes.entry(path.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(Record {
                    state,
                    value: value.clone(),
                });
                true
            }
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let wins = state > current.state
                    || (state == current.state && value.to_string() > current.value.to_string());
                if wins {
                    entry.insert(Record {
                        state,
                        value: value.clone(),
                    });
                }
                wins
            }
        };

        if accepted {
            trace!(path, state, "record accepted");
            self.deliver(path, value);
        } else {
            trace!(path, state, "record lost conflict");
        }
        accepted
    }

    fn deliver(&self, path: &str, value: Value) {
        let listeners: Vec<ChangeCallback> = self
            .listeners
            .get(path)
            .map(|l| l.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(value.clone());
        }
    }

    fn append(&self, path: &str, value: Value) -> String {
        let key = format!("{:016x}", self.tick());
        self.children
            .entry(path.to_owned())
            .or_default()
            .insert(key.clone(), value.clone());

        let listeners: Vec<MapCallback> = self
            .map_listeners
            .get(path)
            .map(|l| l.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(MapEvent::Item {
                key: key.clone(),
                value: value.clone(),
            });
        }
        key
    }
}

struct MemoryNode {
    store: Arc<Inner>,
    path: String,
}

impl NodeHandle for MemoryNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn once(&self, cb: OnceCallback) {
        let value = self.store.nodes.get(&self.path).map(|r| r.value.clone());
        cb(value);
    }

    fn on(&self, cb: ChangeCallback) -> ListenerId {
        let id = self.store.listener_id();
        self.store
            .listeners
            .entry(self.path.clone())
            .or_default()
            .push((id, cb.clone()));

        let current = self.store.nodes.get(&self.path).map(|r| r.value.clone());
        if let Some(value) = current {
            cb(value);
        }
        id
    }

    fn put(&self, value: Value, ack: Option<AckCallback>) {
        let state = self.store.tick();
        self.store.merge(&self.path, state, value);
        if let Some(ack) = ack {
            ack(Ok(()));
        }
    }

    fn set(&self, value: Value, ack: Option<AckCallback>) {
        self.store.append(&self.path, value);
        if let Some(ack) = ack {
            ack(Ok(()));
        }
    }

    fn map(&self, cb: MapCallback) -> ListenerId {
        let id = self.store.listener_id();
        self.store
            .map_listeners
            .entry(self.path.clone())
            .or_default()
            .push((id, cb.clone()));

        let existing: Vec<(String, Value)> = self
            .store
            .children
            .get(&self.path)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        for (key, value) in existing {
            cb(MapEvent::Item { key, value });
        }
        cb(MapEvent::Settled);
        id
    }

    fn off(&self, listener: ListenerId) {
        if let Some(mut l) = self.store.listeners.get_mut(&self.path) {
            l.retain(|(id, _)| *id != listener);
        }
        if let Some(mut l) = self.store.map_listeners.get_mut(&self.path) {
            l.retain(|(id, _)| *id != listener);
        }
        trace!(path = %self.path, id = listener.0, "listener removed");
    }
}

impl StoreAdapter for MemoryStore {
    fn get(&self, path: &str) -> Arc<dyn NodeHandle> {
        Arc::new(MemoryNode {
            store: self.inner.clone(),
            path: path.to_owned(),
        })
    }

    fn user_auth(&self, identity: &str, secret: &str, cb: AuthCallback) {
        let outcome = match self.inner.users.get(identity) {
            None => Err(StoreError::UnknownIdentity(identity.to_owned())),
            Some(account) if account.secret != secret => {
                Err(StoreError::Rejected("Wrong user or password.".to_owned()))
            }
            Some(account) => Ok(account.public_key.clone()),
        };
        debug!(identity, ok = outcome.is_ok(), "user auth");
        cb(outcome);
    }

    fn user_create(&self, identity: &str, secret: &str, cb: AckCallback) {
        let outcome = match self.inner.users.entry(identity.to_owned()) {
            Entry::Occupied(_) => Err(StoreError::Rejected("User already created!".to_owned())),
            Entry::Vacant(entry) => {
                let public_key = derive_public_key(identity, self.inner.tick());
                entry.insert(Account {
                    secret: secret.to_owned(),
                    public_key,
                });
                Ok(())
            }
        };
        debug!(identity, ok = outcome.is_ok(), "user create");
        cb(outcome);
    }
}

/// Stand-in for a real key pair: a stable FNV-1a digest of the identity and
/// the moment the account was created.
fn derive_public_key(identity: &str, nonce: u64) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for byte in identity.bytes().chain(nonce.to_le_bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")
}
