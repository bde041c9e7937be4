//! Signal Registry
//!
//! Maps resolved store paths to the one signal bound to each path, so that
//! every call site asking for the same path shares a cell and the store is
//! subscribed once per path.
//!
//! Entries are never evicted. The registry lives as long as its engine.

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::reactive::Signal;

type Erased = Arc<dyn Any + Send + Sync>;

/// Result of a registry lookup.
pub(crate) struct Lookup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) signal: Signal<T>,
    pub(crate) created: bool,
}

/// Path-keyed cache of signals.
#[derive(Default)]
pub struct SignalRegistry {
    cells: DashMap<String, Erased>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the signal registered at `path`, or register the one built by
    /// `factory`.
    ///
    /// A `None` path always builds a fresh, unregistered signal. When an
    /// entry exists, `factory` is not called, so any initial value it would
    /// have used is ignored in favour of the existing cell's value.
    ///
    /// `factory` runs while the path's shard is locked and must not touch
    /// the registry.
    pub fn get_or_create<T, F>(&self, path: Option<&str>, factory: F) -> Result<Signal<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Signal<T>,
    {
        match path {
            None => Ok(factory()),
            Some(path) => self.lookup(path, factory).map(|l| l.signal),
        }
    }

    pub(crate) fn lookup<T, F>(&self, path: &str, factory: F) -> Result<Lookup<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Signal<T>,
    {
        match self.cells.entry(path.to_owned()) {
            Entry::Occupied(entry) => {
                let signal = downcast::<T>(path, entry.get())?;
                Ok(Lookup {
                    signal,
                    created: false,
                })
            }
            Entry::Vacant(entry) => {
                let signal = factory();
                entry.insert(Arc::new(signal.clone()));
                debug!(path, "registered signal");
                Ok(Lookup {
                    signal,
                    created: true,
                })
            }
        }
    }

    /// Get the signal at `path`, if registered.
    pub fn get<T>(&self, path: &str) -> Result<Option<Signal<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(erased) = self.cells.get(path).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        downcast(path, &erased).map(Some)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.cells.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Registered paths, in no particular order.
    pub fn paths(&self) -> Vec<String> {
        self.cells.iter().map(|e| e.key().clone()).collect()
    }

    /// Move the entry at `from` to `to`.
    ///
    /// Fails, leaving both entries untouched, if `to` is taken or `from` is
    /// empty.
    pub(crate) fn rename(&self, from: &str, to: &str) -> bool {
        let Some((_, cell)) = self.cells.remove(from) else {
            return false;
        };
        let cell = match self.cells.entry(to.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(cell);
                return true;
            }
            Entry::Occupied(_) => cell,
        };
        self.cells.insert(from.to_owned(), cell);
        false
    }
}

fn downcast<T>(path: &str, erased: &Erased) -> Result<Signal<T>>
where
    T: Clone + Send + Sync + 'static,
{
    erased
        .downcast_ref::<Signal<T>>()
        .cloned()
        .ok_or_else(|| SyncError::TypeMismatch {
            path: path.to_owned(),
        })
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("len", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unkeyed_requests_always_build() {
        let registry = SignalRegistry::new();
        let a = registry.get_or_create(None, || Signal::new(1)).unwrap();
        let b = registry.get_or_create(None, || Signal::new(1)).unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(registry.is_empty());
    }

    #[test]
    fn second_factory_is_never_called() {
        let registry = SignalRegistry::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .get_or_create(Some("~abc.counter"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Signal::new(1)
            })
            .unwrap();
        let second = registry
            .get_or_create(Some("~abc.counter"), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Signal::new(99)
            })
            .unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(second.get(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let registry = SignalRegistry::new();
        registry.get_or_create(Some("k"), || Signal::new(1u32)).unwrap();
        let err = registry
            .get_or_create(Some("k"), || Signal::new(String::new()))
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { path } if path == "k"));
    }

    #[test]
    fn rename_refuses_occupied_targets() {
        let registry = SignalRegistry::new();
        let moved = registry.get_or_create(Some("a"), || Signal::new(1)).unwrap();
        registry.get_or_create(Some("b"), || Signal::new(2)).unwrap();

        assert!(!registry.rename("a", "b"));
        assert!(registry.rename("a", "c"));
        assert!(!registry.contains("a"));
        assert!(registry.get::<i32>("c").unwrap().unwrap().ptr_eq(&moved));
        assert!(!registry.rename("missing", "d"));
    }
}
