//! Key resolution.
//!
//! Maps a logical key to the storage path it lives at. The first matching
//! rule wins and namespaces are never combined:
//!
//! 1. keys starting with `~` are already resolved,
//! 2. an explicit element namespace,
//! 3. the innermost lexical scope,
//! 4. the global (session) namespace,
//! 5. otherwise the key itself.

/// Marker that starts every namespace and every fully resolved path.
pub const NAMESPACE_MARKER: char = '~';

/// Scoping context consulted by [`resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeHints<'a> {
    /// Namespace carried by the nearest enclosing element, if any.
    pub element_namespace: Option<&'a str>,
    /// Lexical namespace overrides, innermost last.
    pub context_stack: &'a [String],
    /// The session's current namespace.
    pub global_namespace: Option<&'a str>,
}

/// Which rule produced a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeSource {
    /// The key was already a full path.
    Absolute,
    Element,
    Context,
    Global,
    /// No namespace applied.
    Unscoped,
}

impl ScopeSource {
    /// Whether the path would change if the global namespace changed.
    pub fn follows_global(self) -> bool {
        matches!(self, ScopeSource::Global | ScopeSource::Unscoped)
    }
}

/// Resolve `key` to a storage path.
pub fn resolve(key: &str, hints: &ScopeHints<'_>) -> String {
    resolve_with_source(key, hints).0
}

/// Resolve `key` and report which rule applied.
pub fn resolve_with_source(key: &str, hints: &ScopeHints<'_>) -> (String, ScopeSource) {
    if key.starts_with(NAMESPACE_MARKER) {
        return (key.to_owned(), ScopeSource::Absolute);
    }
    if let Some(ns) = hints.element_namespace {
        return (join(ns, key), ScopeSource::Element);
    }
    if let Some(ns) = hints.context_stack.last() {
        return (join(ns, key), ScopeSource::Context);
    }
    if let Some(ns) = hints.global_namespace {
        return (join(ns, key), ScopeSource::Global);
    }
    (key.to_owned(), ScopeSource::Unscoped)
}

fn join(namespace: &str, key: &str) -> String {
    let mut path = String::with_capacity(namespace.len() + 1 + key.len());
    path.push_str(namespace);
    path.push('.');
    path.push_str(key);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_namespace_prefixes_key() {
        let hints = ScopeHints {
            global_namespace: Some("~abc"),
            ..Default::default()
        };
        assert_eq!(resolve("counter", &hints), "~abc.counter");
    }

    #[test]
    fn absolute_keys_ignore_every_scope() {
        let stack = vec!["~override".to_string()];
        let hints = ScopeHints {
            element_namespace: Some("~element"),
            context_stack: &stack,
            global_namespace: Some("~abc"),
        };
        assert_eq!(
            resolve_with_source("~xyz.counter", &hints),
            ("~xyz.counter".to_string(), ScopeSource::Absolute)
        );
    }

    #[test]
    fn element_beats_context_beats_global() {
        let stack = vec!["~outer".to_string(), "~inner".to_string()];
        let mut hints = ScopeHints {
            element_namespace: Some("~el"),
            context_stack: &stack,
            global_namespace: Some("~g"),
        };
        assert_eq!(resolve("k", &hints), "~el.k");

        hints.element_namespace = None;
        assert_eq!(resolve_with_source("k", &hints), ("~inner.k".into(), ScopeSource::Context));

        hints.context_stack = &[];
        assert_eq!(resolve_with_source("k", &hints), ("~g.k".into(), ScopeSource::Global));

        hints.global_namespace = None;
        assert_eq!(resolve_with_source("k", &hints), ("k".into(), ScopeSource::Unscoped));
    }

    #[test]
    fn resolution_is_deterministic() {
        let stack = vec!["~a".to_string()];
        let hints = ScopeHints {
            context_stack: &stack,
            global_namespace: Some("~b"),
            ..Default::default()
        };
        let first = resolve("note", &hints);
        for _ in 0..10 {
            assert_eq!(resolve("note", &hints), first);
        }
    }

    #[test]
    fn resolved_paths_are_fixed_points() {
        let hints = ScopeHints {
            global_namespace: Some("~abc"),
            ..Default::default()
        };
        let once = resolve("counter", &hints);
        assert_eq!(resolve(&once, &hints), once);
    }

    #[test]
    fn only_global_and_unscoped_follow_the_session() {
        assert!(ScopeSource::Global.follows_global());
        assert!(ScopeSource::Unscoped.follows_global());
        assert!(!ScopeSource::Context.follows_global());
        assert!(!ScopeSource::Element.follows_global());
        assert!(!ScopeSource::Absolute.follows_global());
    }
}
