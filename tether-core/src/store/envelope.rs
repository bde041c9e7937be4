//! Signal payload envelope.
//!
//! A bound signal stores its value as `{ "kind": "signal", "value": ... }`.
//! The tag tells signal payloads apart from unrelated data sharing the
//! path. Records written without the tag (`{ "value": ... }`) are still
//! accepted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The tag written into every envelope.
pub const SIGNAL_KIND: &str = "signal";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum Kind {
    #[default]
    #[serde(rename = "signal")]
    Signal,
}

/// The stored form of a signal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    kind: Kind,
    pub value: T,
}

impl<T> Envelope<T> {
    pub fn new(value: T) -> Self {
        Self {
            kind: Kind::Signal,
            value,
        }
    }
}

/// A record that is not a valid signal envelope.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

/// Wrap a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, EnvelopeError> {
    Ok(serde_json::to_value(Envelope::new(value))?)
}

/// Unwrap a stored record.
///
/// `null` means the node holds nothing and yields `Ok(None)`.
pub fn decode<T: DeserializeOwned>(record: &Value) -> Result<Option<T>, EnvelopeError> {
    if record.is_null() {
        return Ok(None);
    }
    let envelope: Envelope<T> = serde_json::from_value(record.clone())?;
    Ok(Some(envelope.value))
}
