use crate::Identifier;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    sync::Arc,
};

/// The lifetime of a resolved instance.
///
/// - **Transient:** a new instance is created for every resolution.
/// - **Injection:** one instance per top-level resolve call (or per request,
///   when resolving through a request's resolver).
/// - **Singleton:** one instance for the lifetime of the platform cache.
/// - **Request:** one instance per inbound request.
/// - **Custom:** an instance per caller-defined boundary, opened and closed
///   through [`DependencyCache::begin_scope`](crate::DependencyCache::begin_scope).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Scope {
    /// A new instance for every resolution.
    Transient,
    /// One instance per top-level resolve call.
    Injection,
    /// One instance for the lifetime of the platform.
    Singleton,
    /// One instance per inbound request.
    Request,
    /// One instance per caller-defined boundary.
    Custom(Arc<str>),
}

impl Scope {
    /// Creates a custom scope with the given name.
    #[must_use]
    pub fn custom(name: impl AsRef<str>) -> Self {
        Scope::Custom(Arc::from(name.as_ref()))
    }

    /// Whether instances of this scope are never cached.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Scope::Transient)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Injection
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Transient => f.write_str("transient"),
            Scope::Injection => f.write_str("injection"),
            Scope::Singleton => f.write_str("singleton"),
            Scope::Request => f.write_str("request"),
            Scope::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Records, per identifier, the scope its registration declared. Lookups of
/// identifiers that never declared a scope fall back to [`Scope::Injection`].
///
/// Cloning the catalog does not clone its contents. Both handles share the
/// same records.
#[derive(Clone, Debug, Default)]
pub struct ScopeCatalog {
    scopes: Arc<RwLock<HashMap<Identifier, Scope>>>,
}

impl ScopeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        ScopeCatalog::default()
    }

    /// Records the declared scope of an identifier, returning the previously
    /// declared scope if there was one.
    pub fn register(
        &self,
        identifier: Identifier,
        scope: Scope,
    ) -> Option<Scope> {
        self.scopes.write().insert(identifier, scope)
    }

    /// Gets the declared scope of an identifier if one was recorded.
    #[must_use]
    pub fn get(&self, identifier: &Identifier) -> Option<Scope> {
        self.scopes.read().get(identifier).cloned()
    }

    /// Gets the declared scope of an identifier, falling back to
    /// [`Scope::Injection`].
    #[must_use]
    pub fn scope_of(&self, identifier: &Identifier) -> Scope {
        self.get(identifier).unwrap_or_default()
    }
}
