//! Reactive Primitives
//!
//! This module implements the local half of the engine: signals, effects
//! and memos.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reading a signal while an
//! effect runs subscribes that effect. Writing a signal notifies every
//! subscriber synchronously, before the write returns.
//!
//! ## Effects
//!
//! An Effect is a closure that reruns whenever a signal it read during its
//! last run changes. Its dependency set is rebuilt on every run.
//!
//! ## Memos
//!
//! A Memo is a signal written by an effect: a derived value that stays in
//! step with its inputs.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of running computations
//! ([`ReactiveContext`]), and notifications go through a thread-local work
//! queue ([`Runtime`]) so that writes made by effects never recurse.

mod context;
mod effect;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use context::{untrack, ReactiveContext, Source};
pub use effect::Effect;
pub use memo::Memo;
pub use runtime::{Runtime, MAX_FLUSH_RUNS};
pub use signal::{ReadSignal, Signal, WriteSignal};
pub use subscriber::{Subscriber, SubscriberId};
