//! The synchronization engine.
//!
//! [`SyncEngine`] is the context object tying the pieces together: it owns
//! the store handle, the signal registry, the session, and the stack of
//! lexical namespace scopes. Everything that was process-wide state lives
//! here, so independent engines can coexist (one per tenant, one per test).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::binding::{Binding, BoundCell, Origin, WriteErrorHook};
use crate::collection::{collect_settled, SettleWindow};
use crate::config::{NamespacePolicy, SyncConfig};
use crate::error::{Result, StoreError, SyncError};
use crate::namespace::{resolve_with_source, ScopeHints, Session, SessionManager};
use crate::reactive::{Effect, Memo, Runtime, Signal};
use crate::registry::SignalRegistry;
use crate::store::StoreAdapter;

/// Options for [`SyncEngine::create_signal`].
#[derive(Clone, Default)]
pub struct SignalOptions {
    key: Option<String>,
    element_namespace: Option<String>,
    on_write_error: Option<WriteErrorHook>,
}

impl SignalOptions {
    /// A signal bound to the store under `key`.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Resolve the key against an element's namespace, ahead of any scope
    /// or session namespace.
    pub fn in_element(mut self, namespace: impl Into<String>) -> Self {
        self.element_namespace = Some(namespace.into());
        self
    }

    /// Report store write failures to `hook` instead of the log.
    pub fn on_write_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &StoreError) + Send + Sync + 'static,
    {
        self.on_write_error = Some(Arc::new(hook));
        self
    }
}

/// A lexical namespace override. Popped when dropped.
pub struct ScopeGuard<'a> {
    engine: &'a SyncEngine,
    depth: usize,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let mut scopes = self.engine.scopes.lock();
        debug_assert_eq!(scopes.len(), self.depth, "namespace scopes dropped out of order");
        scopes.pop();
    }
}

/// Binds reactive signals to a replicated store.
pub struct SyncEngine {
    store: Arc<dyn StoreAdapter>,
    registry: SignalRegistry,
    session: SessionManager,
    config: SyncConfig,
    scopes: Mutex<Vec<String>>,
    bindings: RwLock<Vec<Arc<dyn BoundCell>>>,
}

impl SyncEngine {
    /// Create an engine with the default configuration.
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self::build(store, SyncConfig::default())
    }

    /// Create an engine with a validated configuration.
    ///
    /// `max_flush_runs` is applied to the process-wide notification runtime.
    pub fn with_config(store: Arc<dyn StoreAdapter>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Runtime::set_flush_limit(config.max_flush_runs);
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<dyn StoreAdapter>, config: SyncConfig) -> Self {
        Self {
            session: SessionManager::new(store.clone()),
            store,
            registry: SignalRegistry::new(),
            config,
            scopes: Mutex::new(Vec::new()),
            bindings: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve `key` against the current scopes and session namespace.
    pub fn resolve(&self, key: &str, element_namespace: Option<&str>) -> String {
        let scopes = self.scopes.lock().clone();
        let global = self.session.namespace();
        let hints = ScopeHints {
            element_namespace,
            context_stack: &scopes,
            global_namespace: global.as_deref(),
        };
        resolve_with_source(key, &hints).0
    }

    /// Push a lexical namespace for keys resolved while the guard lives.
    pub fn scope(&self, namespace: impl Into<String>) -> ScopeGuard<'_> {
        let mut scopes = self.scopes.lock();
        scopes.push(namespace.into());
        ScopeGuard {
            engine: self,
            depth: scopes.len(),
        }
    }

    /// Run `f` with `namespace` pushed as the innermost scope.
    pub fn with_scope<R>(&self, namespace: impl Into<String>, f: impl FnOnce() -> R) -> R {
        let _guard = self.scope(namespace);
        f()
    }

    // ------------------------------------------------------------------
    // Reactive primitives
    // ------------------------------------------------------------------

    /// Create a signal, or join the one already bound to the same path.
    ///
    /// Without a key the signal is local and always new. With a key the
    /// path is resolved, and if a signal already lives there it is returned
    /// as is: `initial` is ignored and the existing value kept. A new keyed
    /// signal is seeded from the store when the store has a value, follows
    /// the path's changes, and pushes every local write.
    pub fn create_signal<T>(&self, initial: T, options: SignalOptions) -> Result<Signal<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let Some(key) = options.key else {
            return Ok(Signal::new(initial));
        };

        let scopes = self.scopes.lock().clone();
        let global = self.session.namespace();
        let hints = ScopeHints {
            element_namespace: options.element_namespace.as_deref(),
            context_stack: &scopes,
            global_namespace: global.as_deref(),
        };
        let (path, source) = resolve_with_source(&key, &hints);

        let lookup = self.registry.lookup(&path, || Signal::new(initial))?;
        if lookup.created {
            let origin = Origin {
                key,
                element_namespace: options.element_namespace,
                context_namespace: scopes.last().cloned(),
                source,
            };
            let binding = Binding::new(
                lookup.signal.clone(),
                origin,
                path,
                self.store.clone(),
                options.on_write_error,
            );
            binding.attach();
            self.bindings.write().push(binding);
        }
        Ok(lookup.signal)
    }

    /// Create an effect. It runs immediately.
    pub fn create_effect<F>(&self, f: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::new(f)
    }

    /// Create a derived value.
    pub fn create_memo<T, F>(&self, f: F) -> Memo<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Memo::new(f)
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Authenticate and switch to the identity's namespace.
    pub async fn authenticate(
        &self,
        identity: &str,
        secret: &str,
        create_if_missing: bool,
    ) -> Result<Session> {
        let session = self
            .session
            .authenticate(identity, secret, create_if_missing)
            .await?;
        self.namespace_changed();
        Ok(session)
    }

    /// [`authenticate`](Self::authenticate) with `create_if_missing` taken
    /// from the configuration.
    pub async fn login(&self, identity: &str, secret: &str) -> Result<Session> {
        self.authenticate(identity, secret, self.config.auto_create_accounts)
            .await
    }

    /// Override the global namespace.
    pub fn set_namespace(&self, namespace: &str) -> String {
        let namespace = self.session.set_namespace(namespace);
        self.namespace_changed();
        namespace
    }

    /// Clear the identity and global namespace.
    pub fn logout(&self) {
        self.session.logout();
        self.namespace_changed();
    }

    pub fn namespace(&self) -> Option<String> {
        self.session.namespace()
    }

    fn namespace_changed(&self) {
        let affected: Vec<_> = self
            .bindings
            .read()
            .iter()
            .filter(|b| b.follows_global() && !b.is_frozen())
            .cloned()
            .collect();

        let policy = self.config.on_namespace_change;
        debug!(?policy, signals = affected.len(), "namespace changed");

        match policy {
            NamespacePolicy::Stale => {}
            NamespacePolicy::Freeze => {
                for binding in affected {
                    binding.freeze();
                }
            }
            NamespacePolicy::Rebind => {
                let global = self.session.namespace();
                for binding in affected {
                    binding.rebind(global.as_deref(), &self.registry);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Add `item` to the collection at `key`.
    ///
    /// Like signal writes, the store's acknowledgement is only logged.
    pub fn append<T: Serialize>(&self, key: &str, item: &T) -> Result<()> {
        let path = self.resolve(key, None);
        let value = serde_json::to_value(item).map_err(|err| SyncError::Envelope {
            path: path.clone(),
            reason: err.to_string(),
        })?;

        let node = self.store.get(&path);
        node.set(
            value,
            Some(Box::new(move |ack: Result<(), StoreError>| {
                if let Err(err) = ack {
                    warn!(%path, %err, "collection append failed");
                }
            })),
        );
        Ok(())
    }

    /// Read the collection at `key`, waiting for it to settle.
    ///
    /// Members that do not deserialize as `T` are skipped.
    pub async fn collect<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let path = self.resolve(key, None);
        let node = self.store.get(&path);
        let window = SettleWindow {
            grace: self.config.settle_grace(),
            max: self.config.settle_max(),
        };

        collect_settled(node.as_ref(), window)
            .await
            .items
            .into_iter()
            .filter_map(|(member, value)| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(%path, %member, %err, "skipping malformed collection member");
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("registry", &self.registry)
            .field("scopes", &*self.scopes.lock())
            .finish()
    }
}
