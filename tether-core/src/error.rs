//! Error types.
//!
//! Only errors raised at the store boundary cross the public API. Key
//! resolution, registry lookups and notification are infallible.

use thiserror::Error;

/// An error reported by a [`StoreAdapter`](crate::store::StoreAdapter).
///
/// Authentication failures are handed back to the caller exactly as the
/// store reported them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The identity has no account in the store.
    #[error("unknown identity `{0}`")]
    UnknownIdentity(String),

    /// The store refused the operation.
    #[error("{0}")]
    Rejected(String),

    /// The store dropped the acknowledgement without answering.
    #[error("store went away before acknowledging")]
    Disconnected,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors returned by the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A keyed signal already exists at `path` with a different value type.
    #[error("signal at `{path}` holds a different value type")]
    TypeMismatch { path: String },

    /// A record at `path` is not a signal envelope.
    #[error("malformed record at `{path}`: {reason}")]
    Envelope { path: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
