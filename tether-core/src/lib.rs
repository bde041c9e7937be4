//! Tether Core
//!
//! Reactive signals bound to a replicated, last-write-wins graph store.
//!
//! The crate provides:
//!
//! - Reactive primitives (signals, effects, memos) with automatic
//!   dependency tracking
//! - Key resolution from logical keys to namespaced store paths
//! - A registry that shares one signal per store path
//! - Store bindings that seed signals from the store, follow remote
//!   changes and push local writes
//! - A session manager that derives the namespace from the authenticated
//!   identity
//!
//! # Architecture
//!
//! - `reactive`: signals, effects, memos and the notification scheduler
//! - `namespace`: key resolution and sessions
//! - `registry`: path-keyed signal cache
//! - `store`: the store adapter boundary and an in-memory store
//! - `engine`: [`SyncEngine`], the context object tying it together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_core::{SignalOptions, SyncEngine};
//! use tether_core::store::MemoryStore;
//!
//! let engine = SyncEngine::new(Arc::new(MemoryStore::new()));
//! engine.authenticate("alice", "secret", true).await?;
//!
//! // Stored at "~<alice's key>.counter"
//! let count = engine.create_signal(0, SignalOptions::keyed("counter"))?;
//!
//! let c = count.clone();
//! let doubled = engine.create_memo(move || c.get() * 2);
//!
//! let d = doubled.clone();
//! engine.create_effect(move || println!("doubled: {}", d.get()));
//!
//! count.set(5);
//! // Effect runs before `set` returns, prints: "doubled: 10"
//! ```

mod binding;
pub mod collection;
pub mod config;
mod engine;
pub mod error;
pub mod namespace;
pub mod reactive;
pub mod registry;
pub mod store;

pub use binding::WriteErrorHook;
pub use config::{NamespacePolicy, SyncConfig};
pub use engine::{ScopeGuard, SignalOptions, SyncEngine};
pub use error::{Result, StoreError, SyncError};
pub use namespace::{resolve, ScopeHints, Session};
pub use reactive::{untrack, Effect, Memo, ReadSignal, Signal, WriteSignal};
