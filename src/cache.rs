use crate::{ContainerId, DynSvc, Identifier, RequestLifecycle, Scope};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter},
    sync::{Arc, Weak},
};
use tracing::{debug, warn};

/// The key of a cached instance: the container owning its definition and the
/// identifier it was compiled for.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    container: ContainerId,
    identifier: Identifier,
}

impl CacheKey {
    /// Creates a cache key.
    #[must_use]
    pub fn new(container: ContainerId, identifier: Identifier) -> Self {
        CacheKey {
            container,
            identifier,
        }
    }

    /// The container owning the definition.
    #[must_use]
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// The identifier of the instance.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

/// An instance stored in a [`DependencyCache`], along with its request
/// lifecycle hooks if its definition declared any.
#[derive(Clone)]
pub struct CachedInstance {
    value: DynSvc,
    lifecycle: Option<Arc<dyn RequestLifecycle>>,
}

impl CachedInstance {
    /// Wraps a value that has no lifecycle hooks.
    #[must_use]
    pub fn new(value: DynSvc) -> Self {
        CachedInstance {
            value,
            lifecycle: None,
        }
    }

    pub(crate) fn with_lifecycle(
        value: DynSvc,
        lifecycle: Option<Arc<dyn RequestLifecycle>>,
    ) -> Self {
        CachedInstance { value, lifecycle }
    }

    /// The cached value.
    #[must_use]
    pub fn value(&self) -> &DynSvc {
        &self.value
    }

    /// The lifecycle hooks of the value, if any.
    #[must_use]
    pub fn lifecycle(&self) -> Option<&Arc<dyn RequestLifecycle>> {
        self.lifecycle.as_ref()
    }
}

impl Debug for CachedInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedInstance")
            .field("value", &self.value)
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}

/// A cell holding the instance of one key at one cache level. The first
/// resolver to initialize the cell constructs the instance; concurrent
/// resolvers wait for it.
pub type CacheSlot = Arc<OnceCell<CachedInstance>>;

type Level = HashMap<CacheKey, CacheSlot>;

/// A chain of per-scope instance caches.
///
/// Each cache holds one level per open scope. Instances are stored in the
/// nearest level of their declared scope, searching this cache and then its
/// ancestors. If no level of the declared scope is open anywhere in the
/// chain, the instance is not cached at all.
///
/// Cloning a [`DependencyCache`] returns another handle to the same cache.
///
/// ```
/// use scoped_injector::{
///     CacheKey, CachedInstance, Container, DependencyCache, Identifier, Scope,
/// };
/// use std::sync::Arc;
///
/// let container = Container::new("root");
/// let root = DependencyCache::new();
/// root.begin_scope(Scope::Singleton);
/// let request = root.child();
/// request.begin_scope(Scope::Request);
///
/// let key = CacheKey::new(container.id(), Identifier::token("config"));
/// let instance = CachedInstance::new(Arc::new(1));
/// assert!(request.set(&Scope::Singleton, key.clone(), instance));
/// assert!(root.get(&Scope::Singleton, &key).is_some());
///
/// request.end_scope(&Scope::Request);
/// assert!(!request.is_open(&Scope::Request));
/// assert!(request.get(&Scope::Singleton, &key).is_some());
/// ```
#[derive(Clone, Default)]
pub struct DependencyCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    parent: Option<DependencyCache>,
    levels: Mutex<HashMap<Scope, Level>>,
    children: Mutex<Vec<Weak<CacheInner>>>,
}

impl DependencyCache {
    /// Creates a cache without a parent and without open scopes.
    #[must_use]
    pub fn new() -> Self {
        DependencyCache::default()
    }

    /// Creates a cache whose lookups continue in this one. Ending a scope in
    /// this cache also ends it in the child.
    #[must_use]
    pub fn child(&self) -> DependencyCache {
        let child = DependencyCache {
            inner: Arc::new(CacheInner {
                parent: Some(self.clone()),
                levels: Mutex::default(),
                children: Mutex::default(),
            }),
        };

        let mut children = self.inner.children.lock();
        children.retain(|child| child.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    /// The parent of this cache, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&DependencyCache> {
        self.inner.parent.as_ref()
    }

    /// Opens a level for `scope` in this cache. Opening a scope that is
    /// already open does nothing.
    pub fn begin_scope(&self, scope: Scope) {
        if scope.is_transient() {
            warn!("transient instances are never cached, not opening a level");
            return;
        }

        let mut levels = self.inner.levels.lock();
        if !levels.contains_key(&scope) {
            debug!(scope = %scope, "began scope");
            levels.insert(scope, Level::new());
        }
    }

    /// Discards the level for `scope` in this cache and in all of its
    /// children, releasing the instances cached there.
    pub fn end_scope(&self, scope: &Scope) {
        let removed = self.inner.levels.lock().remove(scope);
        if let Some(level) = &removed {
            debug!(scope = %scope, instances = level.len(), "ended scope");
        }

        let children: Vec<_> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            DependencyCache { inner: child }.end_scope(scope);
        }

        drop(removed);
    }

    /// Whether this cache has a level open for `scope`.
    #[must_use]
    pub fn has_level(&self, scope: &Scope) -> bool {
        self.inner.levels.lock().contains_key(scope)
    }

    /// Whether this cache or one of its ancestors has a level open for
    /// `scope`.
    #[must_use]
    pub fn is_open(&self, scope: &Scope) -> bool {
        self.chain().any(|cache| cache.has_level(scope))
    }

    /// Gets the instance cached for `key` under `scope`, searching this cache
    /// and then its ancestors.
    #[must_use]
    pub fn get(&self, scope: &Scope, key: &CacheKey) -> Option<CachedInstance> {
        self.chain().find_map(|cache| {
            let levels = cache.inner.levels.lock();
            levels
                .get(scope)
                .and_then(|level| level.get(key))
                .and_then(|slot| slot.get().cloned())
        })
    }

    /// Stores an instance for `key` in the nearest open level of `scope`.
    /// Returns `false` if no level is open or an instance is already cached
    /// for the key, in which case the existing instance is kept.
    pub fn set(
        &self,
        scope: &Scope,
        key: CacheKey,
        instance: CachedInstance,
    ) -> bool {
        match self.slot(scope, key) {
            Some(slot) => slot.set(instance).is_ok(),
            None => false,
        }
    }

    /// Gets the slot for `key` under `scope`, creating it in the nearest open
    /// level if no level in the chain has one yet.
    #[must_use]
    pub fn slot(&self, scope: &Scope, key: CacheKey) -> Option<CacheSlot> {
        if scope.is_transient() {
            return None;
        }

        let mut nearest = None;
        for cache in self.chain() {
            let mut levels = cache.inner.levels.lock();
            if let Some(level) = levels.get_mut(scope) {
                if let Some(slot) = level.get(&key) {
                    return Some(slot.clone());
                }
                if nearest.is_none() {
                    nearest = Some(cache.clone());
                }
            }
        }

        let cache = nearest?;
        let mut levels = cache.inner.levels.lock();
        let level = levels.get_mut(scope)?;
        Some(level.entry(key).or_default().clone())
    }

    /// The distinct instances cached in the levels of this cache, excluding
    /// its ancestors.
    #[must_use]
    pub fn instances(&self) -> Vec<CachedInstance> {
        let levels = self.inner.levels.lock();
        let mut seen = HashSet::new();
        levels
            .values()
            .flat_map(HashMap::values)
            .filter_map(|slot| slot.get())
            .filter(|instance| {
                seen.insert(Arc::as_ptr(&instance.value).cast::<()>() as usize)
            })
            .cloned()
            .collect()
    }

    /// The keys and instances cached in this cache's level for `scope`.
    pub(crate) fn level_entries(
        &self,
        scope: &Scope,
    ) -> Vec<(CacheKey, CachedInstance)> {
        let levels = self.inner.levels.lock();
        levels
            .get(scope)
            .map(|level| {
                level
                    .iter()
                    .filter_map(|(key, slot)| {
                        slot.get().map(|instance| (key.clone(), instance.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn chain(&self) -> impl Iterator<Item = &DependencyCache> + '_ {
        std::iter::successors(Some(self), |cache| cache.inner.parent.as_ref())
    }
}

impl Debug for DependencyCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let scopes: Vec<_> = self
            .inner
            .levels
            .lock()
            .keys()
            .map(ToString::to_string)
            .collect();
        f.debug_struct("DependencyCache")
            .field("scopes", &scopes)
            .field("parent", &self.inner.parent)
            .finish()
    }
}
