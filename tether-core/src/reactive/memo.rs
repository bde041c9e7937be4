//! Memo Implementation
//!
//! A Memo is a derived value kept up to date by an effect.
//!
//! It is built from the other two primitives: an unbound signal holds the
//! derived value, and an effect recomputes it and writes the signal on every
//! run. Reading a memo inside another effect subscribes that effect to the
//! memo's signal, so changes flow through exactly as they would for a
//! hand-written signal.
//!
//! Recomputation is eager. Every write to a dependency reruns the
//! computation and notifies the memo's readers, whether or not the result
//! changed.

use std::fmt::Debug;

use super::effect::Effect;
use super::signal::Signal;

/// A derived reactive value.
///
/// # Example
///
/// ```rust,ignore
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let (a2, b2) = (a.clone(), b.clone());
/// let sum = Memo::new(move || a2.get() + b2.get());
/// assert_eq!(sum.get(), 3);
/// a.set(5);
/// assert_eq!(sum.get(), 7);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    value: Signal<Option<T>>,
    effect: Effect,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a memo. The computation runs immediately.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let value = Signal::new(None);
        let target = value.clone();
        let effect = Effect::new(move || target.set(Some(compute())));
        Self { value, effect }
    }

    /// Get the current value, subscribing the running effect if there is one.
    pub fn get(&self) -> T {
        self.value
            .get()
            .expect("memo effect computes a value on construction")
    }

    /// Get the current value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.value
            .get_untracked()
            .expect("memo effect computes a value on construction")
    }

    /// Number of times the value has been computed.
    pub fn compute_count(&self) -> usize {
        self.effect.run_count()
    }

    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        self.effect.dispose();
    }

    /// The effect that drives this memo.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            effect: self.effect.clone(),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("value", &self.value.get_untracked())
            .field("compute_count", &self.compute_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
