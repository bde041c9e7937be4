//! Store Adapter
//!
//! The boundary to the replicated graph store. The engine only needs a
//! handful of operations from it: read a node once, follow a node's
//! changes, write a node, append to a node's collection, and authenticate
//! users.
//!
//! The contract is callback based, mirroring how graph stores of this kind
//! deliver data: acknowledgements and change events may arrive on the
//! calling turn or on a later one. [`fetch`], [`put`], [`auth`] and
//! [`create`] wrap the callbacks in futures for async callers.
//!
//! Conflict resolution (last write wins) is entirely the store's business.

mod envelope;
mod memory;

pub use envelope::{decode, encode, Envelope, EnvelopeError, SIGNAL_KIND};
pub use memory::{MemoryStore, Record};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::StoreError;

/// Receives the current value of a node, or `None` if it has none.
pub type OnceCallback = Box<dyn FnOnce(Option<Value>) + Send>;

/// Receives every value a node takes.
pub type ChangeCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Receives the outcome of a write.
pub type AckCallback = Box<dyn FnOnce(Result<(), StoreError>) + Send>;

/// Receives the public key of an authenticated user.
pub type AuthCallback = Box<dyn FnOnce(Result<String, StoreError>) + Send>;

/// Receives the members of a node's collection.
pub type MapCallback = Arc<dyn Fn(MapEvent) + Send + Sync>;

/// An event delivered while scanning a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// A member of the collection.
    Item { key: String, value: Value },
    /// Every member known at subscription time has been delivered.
    ///
    /// Stores that cannot tell never send this.
    Settled,
}

/// Identifies a listener registered with [`NodeHandle::on`] or
/// [`NodeHandle::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A reference to one node of the graph.
pub trait NodeHandle: Send + Sync {
    /// The path this handle points at.
    fn path(&self) -> &str;

    /// Fetch the current value once.
    fn once(&self, cb: OnceCallback);

    /// Follow all future changes. The current value, if any, is delivered
    /// at least once.
    fn on(&self, cb: ChangeCallback) -> ListenerId;

    /// Write the node.
    fn put(&self, value: Value, ack: Option<AckCallback>);

    /// Add a member to the node's unordered collection.
    fn set(&self, value: Value, ack: Option<AckCallback>);

    /// Follow the members of the node's collection.
    fn map(&self, cb: MapCallback) -> ListenerId;

    /// Stop a listener registered on this node. Unknown ids are ignored.
    fn off(&self, listener: ListenerId);
}

/// The replicated graph store.
pub trait StoreAdapter: Send + Sync {
    /// Get a handle to the node at `path`.
    fn get(&self, path: &str) -> Arc<dyn NodeHandle>;

    /// Authenticate a user. Succeeds with the user's public key.
    fn user_auth(&self, identity: &str, secret: &str, cb: AuthCallback);

    /// Create a user account.
    fn user_create(&self, identity: &str, secret: &str, cb: AckCallback);
}

/// Fetch a node's current value.
pub async fn fetch(node: &dyn NodeHandle) -> Result<Option<Value>, StoreError> {
    let (tx, rx) = oneshot::channel();
    node.once(Box::new(move |value| {
        let _ = tx.send(value);
    }));
    rx.await.map_err(|_| StoreError::Disconnected)
}

/// Write a node and wait for the acknowledgement.
pub async fn put(node: &dyn NodeHandle, value: Value) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    node.put(
        value,
        Some(Box::new(move |ack| {
            let _ = tx.send(ack);
        })),
    );
    rx.await.map_err(|_| StoreError::Disconnected)?
}

/// Authenticate `identity`, returning its public key.
pub async fn auth(
    store: &dyn StoreAdapter,
    identity: &str,
    secret: &str,
) -> Result<String, StoreError> {
    let (tx, rx) = oneshot::channel();
    store.user_auth(
        identity,
        secret,
        Box::new(move |ack| {
            let _ = tx.send(ack);
        }),
    );
    rx.await.map_err(|_| StoreError::Disconnected)?
}

/// Create an account for `identity`.
pub async fn create(store: &dyn StoreAdapter, identity: &str, secret: &str) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    store.user_create(
        identity,
        secret,
        Box::new(move |ack| {
            let _ = tx.send(ack);
        }),
    );
    rx.await.map_err(|_| StoreError::Disconnected)?
}
