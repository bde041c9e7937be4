//! Reactive Context
//!
//! The reactive context tracks which effect is currently running, so that a
//! signal read can register that effect as a subscriber before returning its
//! value.
//!
//! # Implementation
//!
//! A thread-local stack holds one entry per running computation. Entering a
//! context pushes the running effect's subscriber, dropping the guard pops
//! it. Nested effects (an effect created inside another effect's run) get
//! their own entry, and [`untrack`] pushes an entry without a subscriber so
//! reads inside it register nothing.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::subscriber::{Subscriber, SubscriberId};

/// Anything an effect can depend on.
///
/// Effects keep weak references to their sources so that they can drop
/// their subscription once a source is no longer read.
pub trait Source: Send + Sync {
    /// Identifier unique among live sources.
    fn source_id(&self) -> u64;

    /// Remove a subscriber from this source.
    fn unsubscribe(&self, subscriber_id: SubscriberId);
}

/// A source read during the current run.
#[derive(Clone)]
pub(crate) struct TrackedSource {
    pub(crate) id: u64,
    pub(crate) source: Weak<dyn Source>,
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

struct ContextEntry {
    /// `None` for untracked regions.
    subscriber: Option<Arc<Subscriber>>,
    sources: SmallVec<[TrackedSource; 4]>,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    pub fn enter(subscriber: Arc<Subscriber>) -> Self {
        let subscriber_id = Some(subscriber.id());
        Self::push(Some(subscriber));
        Self { subscriber_id }
    }

    fn enter_untracked() -> Self {
        Self::push(None);
        Self { subscriber_id: None }
    }

    fn push(subscriber: Option<Arc<Subscriber>>) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber,
                sources: SmallVec::new(),
            });
        });
    }

    /// Check if a tracking context is active.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber.is_some())
        })
    }

    /// Get the subscriber of the running computation, if any.
    pub fn current_subscriber() -> Option<Arc<Subscriber>> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.clone())
        })
    }

    /// Record that the running computation read `source`.
    ///
    /// Repeated reads of the same source are recorded once.
    pub(crate) fn track(id: u64, source: Weak<dyn Source>) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.subscriber.is_some() && !entry.sources.iter().any(|s| s.id == id) {
                    entry.sources.push(TrackedSource { id, source });
                }
            }
        });
    }

    /// Take the sources collected in the current context.
    pub(crate) fn take_sources() -> SmallVec<[TrackedSource; 4]> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.sources))
                .unwrap_or_default()
        })
    }

    /// IDs of the sources read so far in the current context.
    pub fn tracked_ids() -> Vec<u64> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.sources.iter().map(|s| s.id).collect())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber.as_ref().map(|s| s.id()),
                    self.subscriber_id,
                    "ReactiveContext mismatch"
                );
            }
        });
    }
}

/// Run `f` without registering any signal reads as dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
