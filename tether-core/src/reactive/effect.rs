//! Effect Implementation
//!
//! An Effect is a side-effecting computation that reruns whenever a signal
//! it read during its last run is written.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately to establish its
//!    dependencies.
//!
//! 2. Each signal read during a run subscribes the effect before the value
//!    is returned.
//!
//! 3. After each run the new dependency set is compared with the previous
//!    one and the effect unsubscribes from every signal it no longer reads.
//!
//! Reruns happen synchronously inside the write that triggered them. A
//! write performed by an effect while a notification pass is running is
//! queued and handled once the current pass finishes.
//!
//! The effect stays alive as long as any signal it subscribes to is alive.
//! Dropping the [`Effect`] handle does not stop it; [`Effect::dispose`] does.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::{ReactiveContext, TrackedSource};
use super::subscriber::{Subscriber, SubscriberId};

static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a running effect.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let c = count.clone();
/// let _effect = Effect::new(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
    subscriber: Arc<Subscriber>,
}

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    /// Signals hold the subscriber strongly; the subscriber holds this.
    subscriber: Weak<Subscriber>,
    run: Box<dyn Fn() + Send + Sync>,
    sources: Mutex<SmallVec<[TrackedSource; 4]>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl Effect {
    /// Create an effect and run it once.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create an effect without running it.
    ///
    /// It has no dependencies until [`Effect::execute`] is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut created = None;
        let subscriber = Arc::new_cyclic(|weak: &Weak<Subscriber>| {
            let id = SubscriberId::new();
            let inner = Arc::new(EffectInner {
                id: next_effect_id(),
                subscriber_id: id,
                subscriber: weak.clone(),
                run: Box::new(run),
                sources: Mutex::new(SmallVec::new()),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
            });
            created = Some(inner.clone());
            Subscriber::with_id(id, move || inner.execute())
        });
        let inner = created.expect("new_cyclic runs its initializer");
        Self { inner, subscriber }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// Run the effect now and refresh its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect and drop all of its subscriptions.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sources = std::mem::take(&mut *self.inner.sources.lock());
        for tracked in sources {
            if let Some(source) = tracked.source.upgrade() {
                source.unsubscribe(self.inner.subscriber_id);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.sources.lock().len()
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(subscriber) = self.subscriber.upgrade() else {
            return;
        };

        let tracked = {
            let _ctx = ReactiveContext::enter(subscriber);
            (self.run)();
            ReactiveContext::take_sources()
        };

        let stale: SmallVec<[TrackedSource; 4]> = {
            let mut sources = self.sources.lock();
            let previous = std::mem::replace(&mut *sources, tracked);
            previous
                .into_iter()
                .filter(|old| !sources.iter().any(|new| new.id == old.id))
                .collect()
        };

        for old in stale {
            if let Some(source) = old.source.upgrade() {
                trace!(effect = self.id, source = old.id, "dropping stale dependency");
                source.unsubscribe(self.subscriber_id);
            }
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
