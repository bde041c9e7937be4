//! Reactive Runtime
//!
//! The runtime delivers signal change notifications to subscribers.
//!
//! # How It Works
//!
//! 1. A signal write hands the runtime a snapshot of its subscribers.
//!
//! 2. If no notification pass is running on this thread, the runtime starts
//!    one: it runs the queued subscribers in order until the queue is empty.
//!
//! 3. If a pass is already running (an effect wrote a signal), the new
//!    subscribers are appended to the queue instead of being run
//!    recursively. The outermost write drains them before it returns.
//!
//! Every write produces one notification per subscriber; nothing is
//! coalesced. The subscribers of the outermost write always run. Beyond
//! them, a pass that queues more than [`Runtime::flush_limit`] further runs
//! is assumed to be an effect cycle and is aborted with an error log.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, trace};

use super::subscriber::Subscriber;

/// Default bound on the runs a notification pass may queue beyond the
/// subscribers of the write that started it.
pub const MAX_FLUSH_RUNS: usize = 100_000;

static FLUSH_LIMIT: AtomicUsize = AtomicUsize::new(MAX_FLUSH_RUNS);

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

#[derive(Default)]
struct SchedulerState {
    flushing: bool,
    queue: VecDeque<Arc<Subscriber>>,
}

/// Resets the scheduler when the outermost pass ends, even on panic.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.flushing = false;
            state.queue.clear();
        });
    }
}

/// The per-thread notification scheduler.
pub struct Runtime;

impl Runtime {
    /// Queue `subscribers` and, unless a pass is already running, drain the
    /// queue.
    pub fn notify(subscribers: Vec<Arc<Subscriber>>) {
        if subscribers.is_empty() {
            return;
        }

        let direct = subscribers.len();
        let start = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.queue.extend(subscribers);
            if state.flushing {
                false
            } else {
                state.flushing = true;
                true
            }
        });

        if !start {
            trace!("notification queued behind active pass");
            return;
        }

        let _guard = FlushGuard;
        let limit = direct.saturating_add(Self::flush_limit());
        let mut runs = 0usize;

        loop {
            let next = SCHEDULER.with(|state| state.borrow_mut().queue.pop_front());
            let Some(subscriber) = next else {
                break;
            };

            runs += 1;
            if runs > limit {
                let dropped = SCHEDULER.with(|state| state.borrow().queue.len()) + 1;
                error!(
                    runs = limit,
                    dropped, "aborting notification pass, effects keep re-triggering each other"
                );
                break;
            }

            trace!(subscriber = ?subscriber.id(), "notify");
            subscriber.notify();
        }
    }

    /// Bound on the runs a pass may queue beyond its direct subscribers.
    pub fn flush_limit() -> usize {
        FLUSH_LIMIT.load(Ordering::Relaxed)
    }

    /// Change the bound for every thread in the process.
    pub fn set_flush_limit(limit: usize) {
        FLUSH_LIMIT.store(limit.max(1), Ordering::Relaxed);
    }

    /// Whether a notification pass is running on this thread.
    pub fn is_flushing() -> bool {
        SCHEDULER.with(|state| state.borrow().flushing)
    }

    /// Number of notifications waiting in the current pass.
    pub fn pending() -> usize {
        SCHEDULER.with(|state| state.borrow().queue.len())
    }
}
