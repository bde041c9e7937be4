//! Namespaces
//!
//! Key resolution and the session that supplies the global namespace.

mod resolver;
mod session;

pub use resolver::{resolve, resolve_with_source, ScopeHints, ScopeSource, NAMESPACE_MARKER};
pub use session::{Session, SessionManager};
