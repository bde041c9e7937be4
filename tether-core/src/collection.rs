//! Collection scans.
//!
//! A replicated collection has no reliable end: members trickle in from
//! peers in any order. A scan therefore stops on the first of
//!
//! - the store reporting [`MapEvent::Settled`],
//! - no new member arriving within the grace period,
//! - the hard deadline.
//!
//! The last two are heuristics. A scan that ends on a timeout may have
//! missed members that were still in flight.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::store::{MapEvent, NodeHandle};

/// Timing of a collection scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleWindow {
    /// Quiet period that ends the scan.
    pub grace: Duration,
    /// Deadline for the whole scan.
    pub max: Duration,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// The store said every member was delivered.
    Settled,
    /// Nothing new arrived for the grace period.
    Quiet,
    /// The deadline passed.
    Deadline,
    /// The store dropped the scan.
    Closed,
}

/// Members of a collection, keyed by their store key, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub items: Vec<(String, Value)>,
    pub end: ScanEnd,
}

/// Scan the collection under `node`.
///
/// Members delivered more than once keep their first position and their
/// latest value. The listener is removed from the node when the scan ends.
pub async fn collect_settled(node: &dyn NodeHandle, window: SettleWindow) -> Scan {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = node.map(Arc::new(move |event| {
        let _ = tx.send(event);
    }));

    let deadline = Instant::now() + window.max;
    let mut items = IndexMap::new();

    let end = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break ScanEnd::Deadline;
        }

        match timeout(window.grace.min(remaining), rx.recv()).await {
            Ok(Some(MapEvent::Item { key, value })) => {
                items.insert(key, value);
            }
            Ok(Some(MapEvent::Settled)) => break ScanEnd::Settled,
            Ok(None) => break ScanEnd::Closed,
            Err(_) if Instant::now() >= deadline => break ScanEnd::Deadline,
            Err(_) => break ScanEnd::Quiet,
        }
    };

    node.off(listener);
    debug!(path = node.path(), items = items.len(), ?end, "collection scan finished");
    Scan {
        items: items.into_iter().collect(),
        end,
    }
}
