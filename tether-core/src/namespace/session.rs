//! Session and namespace management.
//!
//! Tracks the authenticated identity and the global namespace derived from
//! it. The namespace is `~` followed by the identity's public key, or an
//! operator-supplied override.
//!
//! Concurrent `authenticate` calls are not serialized. Whichever completes
//! last decides the current namespace.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::resolver::NAMESPACE_MARKER;
use crate::error::StoreError;
use crate::store::{self, StoreAdapter};

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub namespace: String,
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<String>,
    namespace: Option<String>,
}

/// Owns the current identity and global namespace.
pub struct SessionManager {
    store: Arc<dyn StoreAdapter>,
    state: RwLock<SessionState>,
    namespace_tx: watch::Sender<Option<String>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        let (namespace_tx, _) = watch::channel(None);
        Self {
            store,
            state: RwLock::new(SessionState::default()),
            namespace_tx,
        }
    }

    /// Authenticate against the store and adopt the identity's namespace.
    ///
    /// If the store does not know `identity` and `create_if_missing` is set,
    /// the account is created and authentication retried once. Every other
    /// failure is returned exactly as the store reported it.
    pub async fn authenticate(
        &self,
        identity: &str,
        secret: &str,
        create_if_missing: bool,
    ) -> Result<Session, StoreError> {
        let public_key = match store::auth(self.store.as_ref(), identity, secret).await {
            Ok(key) => key,
            Err(StoreError::UnknownIdentity(_)) if create_if_missing => {
                debug!(identity, "creating account");
                store::create(self.store.as_ref(), identity, secret).await?;
                store::auth(self.store.as_ref(), identity, secret).await?
            }
            Err(err) => {
                debug!(identity, %err, "authentication failed");
                return Err(err);
            }
        };

        let namespace = format!("{NAMESPACE_MARKER}{public_key}");
        {
            let mut state = self.state.write();
            state.identity = Some(identity.to_owned());
            state.namespace = Some(namespace.clone());
        }
        self.namespace_tx.send_replace(Some(namespace.clone()));
        debug!(identity, %namespace, "authenticated");

        Ok(Session {
            identity: identity.to_owned(),
            namespace,
        })
    }

    /// Replace the global namespace. A missing `~` is added.
    ///
    /// Returns the namespace actually stored.
    pub fn set_namespace(&self, namespace: &str) -> String {
        let namespace = if namespace.starts_with(NAMESPACE_MARKER) {
            namespace.to_owned()
        } else {
            warn!(%namespace, "namespace does not start with `~`, prefixing it");
            format!("{NAMESPACE_MARKER}{namespace}")
        };
        self.state.write().namespace = Some(namespace.clone());
        self.namespace_tx.send_replace(Some(namespace.clone()));
        debug!(%namespace, "namespace set");
        namespace
    }

    /// Forget the identity and namespace.
    pub fn logout(&self) {
        let previous = {
            let mut state = self.state.write();
            state.identity = None;
            state.namespace.take()
        };
        self.namespace_tx.send_replace(None);
        debug!(?previous, "logged out");
    }

    pub fn namespace(&self) -> Option<String> {
        self.state.read().namespace.clone()
    }

    pub fn identity(&self) -> Option<String> {
        self.state.read().identity.clone()
    }

    /// Watch the global namespace.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.namespace_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SessionManager")
            .field("identity", &state.identity)
            .field("namespace", &state.namespace)
            .finish()
    }
}
