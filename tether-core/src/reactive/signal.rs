//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and the
//! set of effects that read it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running effect, the effect is added to
//!    the signal's subscribers before the value is returned.
//!
//! 2. When a signal is written, the value is replaced, every subscriber is
//!    notified through the [`Runtime`], and then, if the signal is bound to a
//!    store path, the new value is pushed upstream.
//!
//! 3. Values arriving from the store replace the local value and notify
//!    subscribers, but are never pushed back.
//!
//! # Thread Safety
//!
//! The value and subscriber set sit behind `parking_lot` locks. No lock is
//! held while subscribers run, so effects may freely read and write the
//! signal that triggered them.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::context::{ReactiveContext, Source};
use super::runtime::Runtime;
use super::subscriber::{Subscriber, SubscriberId};

static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Callback pushing a locally written value to the store.
pub(crate) type Uplink<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A reactive cell holding a value of type `T`.
///
/// Cloning a `Signal` yields another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

pub(crate) struct SignalInner<T> {
    id: u64,
    value: RwLock<T>,
    /// Insertion ordered so effects are notified in the order they subscribed.
    subscribers: RwLock<IndexMap<SubscriberId, Arc<Subscriber>>>,
    path: RwLock<Option<String>>,
    uplink: RwLock<Option<Uplink<T>>>,
}

impl<T> Source for SignalInner<T>
where
    T: Send + Sync + 'static,
{
    fn source_id(&self) -> u64 {
        self.id
    }

    fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.subscribers.write().shift_remove(&subscriber_id);
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an unbound signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_signal_id(),
                value: RwLock::new(value),
                subscribers: RwLock::new(IndexMap::new()),
                path: RwLock::new(None),
                uplink: RwLock::new(None),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The store path this signal is bound to, if any.
    pub fn path(&self) -> Option<String> {
        self.inner.path.read().clone()
    }

    /// Whether two handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get the current value, subscribing the running effect if there is one.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.read().clone()
    }

    /// Borrow the current value, subscribing the running effect if there is one.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.read())
    }

    /// Get the current value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    fn track(&self) {
        let Some(subscriber) = ReactiveContext::current_subscriber() else {
            return;
        };

        self.inner
            .subscribers
            .write()
            .entry(subscriber.id())
            .or_insert(subscriber);

        let source: Arc<dyn Source> = self.inner.clone();
        ReactiveContext::track(self.inner.id, Arc::downgrade(&source));
    }

    /// Set a new value, notify subscribers, then push to the store if bound.
    pub fn set(&self, value: T) {
        let uplink = self.inner.uplink.read().clone();
        let pushed = uplink.as_ref().map(|_| value.clone());

        *self.inner.value.write() = value;
        self.notify_subscribers();

        if let (Some(uplink), Some(pushed)) = (uplink, pushed) {
            uplink(&pushed);
        }
    }

    /// Update the value from the previous one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next);
    }

    /// Apply a value delivered by the store.
    pub(crate) fn set_remote(&self, value: T) {
        *self.inner.value.write() = value;
        self.notify_subscribers();
    }

    /// Replace the value without notifying anyone.
    pub(crate) fn replace_silent(&self, value: T) {
        *self.inner.value.write() = value;
    }

    pub(crate) fn set_path(&self, path: Option<String>) {
        *self.inner.path.write() = path;
    }

    pub(crate) fn set_uplink(&self, uplink: Option<Uplink<T>>) {
        *self.inner.uplink.write() = uplink;
    }

    /// Register a subscriber directly, outside of any effect.
    pub fn subscribe(&self, subscriber: Arc<Subscriber>) {
        self.inner
            .subscribers
            .write()
            .insert(subscriber.id(), subscriber);
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.inner.unsubscribe(subscriber_id);
    }

    fn notify_subscribers(&self) {
        let subscribers: Vec<_> = self.inner.subscribers.read().values().cloned().collect();
        Runtime::notify(subscribers);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Split into separate read and write handles.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                signal: self.clone(),
            },
            WriteSignal {
                signal: self.clone(),
            },
        )
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("path", &self.path())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Read half of a [`Signal`].
#[derive(Clone)]
pub struct ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    signal: Signal<T>,
}

impl<T> ReadSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }
}

/// Write half of a [`Signal`].
#[derive(Clone)]
pub struct WriteSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    signal: Signal<T>,
}

impl<T> WriteSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn set(&self, value: T) {
        self.signal.set(value);
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.signal.update(f);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update_uses_previous_value() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn every_write_notifies_once() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        signal.subscribe(Arc::new(Subscriber::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        })));

        signal.set(1);
        signal.set(1);
        signal.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribed_callback_is_not_called() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let subscriber = Arc::new(Subscriber::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let id = subscriber.id();
        signal.subscribe(subscriber);

        signal.set(1);
        signal.unsubscribe(id);
        signal.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_sees_new_value() {
        let signal = Signal::new(0);
        let seen = Arc::new(AtomicI32::new(-1));

        let reader = signal.clone();
        let seen_clone = seen.clone();
        signal.subscribe(Arc::new(Subscriber::new(move || {
            seen_clone.store(reader.get_untracked(), Ordering::SeqCst);
        })));

        signal.update(|v| v + 9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn uplink_runs_after_notification() {
        let signal = Signal::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        signal.subscribe(Arc::new(Subscriber::new(move || {
            log_clone.lock().push("notify".to_string());
        })));
        let log_clone = log.clone();
        signal.set_uplink(Some(Arc::new(move |v: &i32| {
            log_clone.lock().push(format!("push {v}"));
        })));

        signal.set(3);
        assert_eq!(*log.lock(), vec!["notify", "push 3"]);
    }

    #[test]
    fn remote_values_are_not_pushed_back() {
        let signal = Signal::new(0);
        let pushes = Arc::new(AtomicI32::new(0));
        let pushes_clone = pushes.clone();
        signal.set_uplink(Some(Arc::new(move |_: &i32| {
            pushes_clone.fetch_add(1, Ordering::SeqCst);
        })));

        signal.set_remote(8);
        assert_eq!(signal.get(), 8);
        assert_eq!(pushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn split_handles_share_the_cell() {
        let (read, write) = Signal::new(String::from("a")).split();
        write.update(|s| format!("{s}b"));
        assert_eq!(read.get(), "ab");
        assert_eq!(read.with(|s| s.len()), 2);
    }

    #[test]
    fn clones_share_state_and_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = s1.clone();
        let s3 = Signal::new(0);

        s1.set(42);
        assert_eq!(s2.get(), 42);
        assert!(s1.ptr_eq(&s2));
        assert!(!s1.ptr_eq(&s3));
        assert_ne!(s1.id(), s3.id());
    }
}
