use crate::{
    definition::downcast, Arguments, CacheKey, CachedInstance, Container,
    Deferred, DependencyCache, DynSvc, Edge, EdgeTarget, GraphNode, Identifier,
    InjectError, InjectResult, Intrinsic, NodeKind, RequestLifecycle, Resolved,
    Scope, Service, Svc, WeakContainer,
};
use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::{
    any::Any,
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::{Arc, Weak},
};
use tracing::trace;

type PendingProperties = Arc<Mutex<Vec<(Arc<GraphNode>, DynSvc)>>>;

/// Executes compiled dependency graphs, consulting and populating a
/// [`DependencyCache`].
///
/// Resolution uses the cache first and only constructs an instance when the
/// cache has none. A freshly constructed instance is cached under its declared
/// scope, and its properties are injected once the whole requested graph is
/// constructed, so properties may point back at any instance of the graph.
///
/// Graphs containing asynchronous factories must be resolved with the
/// `_async` methods. The synchronous methods fail with
/// [`InjectError::AsyncRequired`] when they reach one.
///
/// ```
/// use scoped_injector::{
///     Container, DependencyResolver, ParameterSpec, Scope, Svc,
///     TypeDefinition,
/// };
///
/// struct Clock;
/// struct Scheduler(Svc<Clock>);
///
/// let container = Container::new("root");
/// container
///     .register_type(TypeDefinition::new(|_| Ok(Clock)).scope(Scope::Singleton))
///     .unwrap();
/// container
///     .register_type(
///         TypeDefinition::new(|args| Ok(Scheduler(args.required()?)))
///             .parameter(ParameterSpec::of::<Clock>())
///             .scope(Scope::Transient),
///     )
///     .unwrap();
///
/// let resolver = DependencyResolver::new(container);
/// let first = resolver.get::<Scheduler>().unwrap();
/// let second = resolver.get::<Scheduler>().unwrap();
/// assert!(!Svc::ptr_eq(&first, &second));
/// assert!(Svc::ptr_eq(&first.0, &second.0));
/// ```
#[derive(Clone)]
pub struct DependencyResolver {
    container: Container,
    cache: DependencyCache,
    pending: PendingProperties,
    retained: Option<Retained>,
}

impl DependencyResolver {
    /// Creates a resolver with a fresh cache that has the singleton scope
    /// open.
    #[must_use]
    pub fn new(container: Container) -> Self {
        let cache = DependencyCache::new();
        cache.begin_scope(Scope::Singleton);
        DependencyResolver::with_cache(container, cache)
    }

    /// Creates a resolver over an existing cache.
    #[must_use]
    pub fn with_cache(container: Container, cache: DependencyCache) -> Self {
        DependencyResolver {
            container,
            cache,
            pending: PendingProperties::default(),
            retained: None,
        }
    }

    /// The container identifiers are looked up in.
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The cache instances are stored in.
    #[must_use]
    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }

    /// Creates a resolver over another container that shares this
    /// resolver's cache.
    #[must_use]
    pub fn with_container(&self, container: Container) -> Self {
        DependencyResolver {
            container,
            cache: self.cache.clone(),
            pending: PendingProperties::default(),
            retained: self.retained.clone(),
        }
    }

    /// Resolves `identifier` into an untyped instance.
    pub fn resolve_dyn(&self, identifier: &Identifier) -> InjectResult<DynSvc> {
        let node = self.container.dependency_graph(identifier)?;
        self.resolve_node(&node)
    }

    /// Resolves `identifier` into an instance of `T`.
    pub fn resolve<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Svc<T>> {
        let identifier = identifier.into();
        let value = self.resolve_dyn(&identifier)?;
        downcast(&identifier, value)
    }

    /// Resolves `identifier` into an instance of `T` by reference.
    pub fn resolve_as<T: Service>(
        &self,
        identifier: &Identifier,
    ) -> InjectResult<Svc<T>> {
        let value = self.resolve_dyn(identifier)?;
        downcast(identifier, value)
    }

    /// Resolves the type `T`.
    pub fn get<T: Service>(&self) -> InjectResult<Svc<T>> {
        self.resolve_as(&Identifier::of::<T>())
    }

    /// Resolves `identifier`, returning `None` if it has no reachable
    /// definition. Missing dependencies of a reachable definition are still
    /// errors.
    pub fn resolve_optional<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Option<Svc<T>>> {
        let identifier = identifier.into();
        let node = self.container.optional_dependency_graph(&identifier)?;
        if node.is_null() {
            return Ok(None);
        }

        let value = self.resolve_node(&node)?;
        downcast(&identifier, value).map(Some)
    }

    /// Resolves `identifier` into an untyped instance, awaiting asynchronous
    /// factories along the way.
    pub async fn resolve_dyn_async(
        &self,
        identifier: &Identifier,
    ) -> InjectResult<DynSvc> {
        let node = self.container.dependency_graph(identifier)?;
        self.resolve_node_async(&node).await
    }

    /// Resolves `identifier` into an instance of `T`, awaiting asynchronous
    /// factories along the way.
    pub async fn resolve_async<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Svc<T>> {
        let identifier = identifier.into();
        let value = self.resolve_dyn_async(&identifier).await?;
        downcast(&identifier, value)
    }

    /// Resolves the type `T`, awaiting asynchronous factories along the way.
    pub async fn get_async<T: Service>(&self) -> InjectResult<Svc<T>> {
        self.resolve_async(Identifier::of::<T>()).await
    }

    /// Opens an injection level for one top-level resolution, unless the
    /// cache chain has one open already.
    fn enter_injection_scope(&self) -> InjectionScope {
        if self.cache.is_open(&Scope::Injection) {
            return InjectionScope {
                resolver: self.session(),
                opened: false,
            };
        }

        let retained = self.retained.clone().unwrap_or_default();
        let cache = self.cache.child();
        cache.begin_scope(Scope::Injection);
        retained.restore(&cache);
        InjectionScope {
            resolver: DependencyResolver {
                container: self.container.clone(),
                cache,
                pending: PendingProperties::default(),
                retained: Some(retained),
            },
            opened: true,
        }
    }

    fn session(&self) -> Self {
        self.with_container(self.container.clone())
    }

    /// Resolves a compiled node into an instance, then injects the properties
    /// of every instance constructed along the way.
    pub fn resolve_node(&self, node: &Arc<GraphNode>) -> InjectResult<DynSvc> {
        let scope = self.enter_injection_scope();
        let session = &scope.resolver;
        let value = session.resolve_in_session(node)?;
        session.inject_pending()?;
        Ok(value)
    }

    /// Resolves a compiled node like [`resolve_node`](Self::resolve_node),
    /// awaiting asynchronous factories along the way.
    pub async fn resolve_node_async(
        &self,
        node: &Arc<GraphNode>,
    ) -> InjectResult<DynSvc> {
        let scope = self.enter_injection_scope();
        let session = &scope.resolver;
        let value = session.resolve_in_session_async(node).await?;
        session.inject_pending_async().await?;
        Ok(value)
    }

    fn resolve_in_session(&self, node: &Arc<GraphNode>) -> InjectResult<DynSvc> {
        match node.kind() {
            NodeKind::Null => Err(InjectError::UnknownType {
                identifier: node.identifier().clone(),
            }),
            NodeKind::Intrinsic(Intrinsic::Container(container)) => {
                let container = upgrade(container, node.identifier())?;
                Ok(Arc::new(container))
            }
            NodeKind::Intrinsic(Intrinsic::Resolver(container)) => {
                let container = upgrade(container, node.identifier())?;
                Ok(Arc::new(self.with_container(container)))
            }
            _ => self.resolve_cached(node),
        }
    }

    fn resolve_in_session_async<'a>(
        &'a self,
        node: &'a Arc<GraphNode>,
    ) -> BoxFuture<'a, InjectResult<DynSvc>> {
        async move {
            if node.is_async() {
                self.resolve_cached_async(node).await
            } else {
                self.resolve_in_session(node)
            }
        }
        .boxed()
    }

    fn resolve_cached(&self, node: &Arc<GraphNode>) -> InjectResult<DynSvc> {
        let key = CacheKey::new(node.container_id(), node.identifier().clone());
        let slot = match self.cache.slot(node.scope(), key) {
            Some(slot) => slot,
            None => {
                let instance = self.construct(node)?;
                self.defer_properties(node, instance.value());
                return Ok(instance.value().clone());
            }
        };

        if let Some(cached) = slot.get() {
            return Ok(cached.value().clone());
        }

        let mut constructed = false;
        let instance = slot
            .get_or_try_init(|| {
                constructed = true;
                self.construct(node)
            })?
            .clone();
        if constructed {
            trace!(
                identifier = %node.identifier(),
                scope = %node.scope(),
                "cached new instance"
            );
            self.defer_properties(node, instance.value());
        }

        Ok(instance.value().clone())
    }

    /// Concurrent first resolutions of an asynchronous node may each
    /// construct an instance. The first one cached wins and the others are
    /// dropped.
    async fn resolve_cached_async(
        &self,
        node: &Arc<GraphNode>,
    ) -> InjectResult<DynSvc> {
        let key = CacheKey::new(node.container_id(), node.identifier().clone());
        let slot = self.cache.slot(node.scope(), key);
        if let Some(cached) = slot.as_ref().and_then(|slot| slot.get()) {
            return Ok(cached.value().clone());
        }

        let instance = self.construct_async(node).await?;
        let stored = match &slot {
            Some(slot) => slot.get_or_init(|| instance.clone()).clone(),
            None => instance.clone(),
        };
        if Arc::ptr_eq(stored.value(), instance.value()) {
            trace!(
                identifier = %node.identifier(),
                scope = %node.scope(),
                "cached new instance"
            );
            self.defer_properties(node, stored.value());
        }

        Ok(stored.value().clone())
    }

    fn construct(&self, node: &GraphNode) -> InjectResult<CachedInstance> {
        match node.kind() {
            NodeKind::Type {
                definition,
                parameters,
                ..
            } => {
                let mut args = self.arguments(node, parameters)?;
                let value = definition.construct(&mut args)?;
                let lifecycle = definition.lifecycle().and_then(|cast| cast(&value));
                Ok(CachedInstance::with_lifecycle(value, lifecycle))
            }
            NodeKind::Factory {
                definition,
                parameters,
            } => {
                let mut args = self.arguments(node, parameters)?;
                let value = definition.invoke(&mut args)?;
                let lifecycle = definition.lifecycle().and_then(|cast| cast(&value));
                Ok(CachedInstance::with_lifecycle(value, lifecycle))
            }
            NodeKind::Value { definition } => {
                Ok(CachedInstance::new(definition.value()))
            }
            NodeKind::Intrinsic(_) | NodeKind::Null => {
                Err(InjectError::UnknownType {
                    identifier: node.identifier().clone(),
                })
            }
        }
    }

    async fn construct_async(
        &self,
        node: &GraphNode,
    ) -> InjectResult<CachedInstance> {
        match node.kind() {
            NodeKind::Type {
                definition,
                parameters,
                ..
            } => {
                let mut args = self.arguments_async(node, parameters).await?;
                let value = definition.construct(&mut args)?;
                let lifecycle = definition.lifecycle().and_then(|cast| cast(&value));
                Ok(CachedInstance::with_lifecycle(value, lifecycle))
            }
            NodeKind::Factory {
                definition,
                parameters,
            } => {
                let args = self.arguments_async(node, parameters).await?;
                let value = definition.invoke_async(args).await?;
                let lifecycle = definition.lifecycle().and_then(|cast| cast(&value));
                Ok(CachedInstance::with_lifecycle(value, lifecycle))
            }
            _ => self.construct(node),
        }
    }

    fn defer_properties(&self, node: &Arc<GraphNode>, instance: &DynSvc) {
        if let NodeKind::Type { properties, .. } = node.kind() {
            if !properties.is_empty() {
                self.pending.lock().push((node.clone(), instance.clone()));
            }
        }
    }

    fn take_pending(&self) -> Vec<(Arc<GraphNode>, DynSvc)> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn inject_pending(&self) -> InjectResult<()> {
        loop {
            let pending = self.take_pending();
            if pending.is_empty() {
                return Ok(());
            }

            for (node, instance) in pending {
                self.inject_properties(&node, &instance)?;
            }
        }
    }

    async fn inject_pending_async(&self) -> InjectResult<()> {
        loop {
            let pending = self.take_pending();
            if pending.is_empty() {
                return Ok(());
            }

            for (node, instance) in pending {
                let (definition, properties) = match node.kind() {
                    NodeKind::Type {
                        definition,
                        properties,
                        ..
                    } => (definition, properties),
                    _ => continue,
                };

                for (property, edge) in
                    definition.property_specs().iter().zip(properties)
                {
                    let resolved = self.resolve_edge_async(edge).await?;
                    let mut args = Arguments::new(
                        node.identifier().clone(),
                        vec![(property.spec.identifier().clone(), resolved)],
                    );
                    (property.setter)(&instance, &mut args)?;
                }
            }
        }
    }

    fn inject_properties(
        &self,
        node: &GraphNode,
        instance: &DynSvc,
    ) -> InjectResult<()> {
        let (definition, properties) = match node.kind() {
            NodeKind::Type {
                definition,
                properties,
                ..
            } => (definition, properties),
            _ => return Ok(()),
        };

        for (property, edge) in definition.property_specs().iter().zip(properties)
        {
            let resolved = self.resolve_edge(edge)?;
            let mut args = Arguments::new(
                node.identifier().clone(),
                vec![(property.spec.identifier().clone(), resolved)],
            );
            (property.setter)(instance, &mut args)?;
        }

        Ok(())
    }

    fn arguments(
        &self,
        node: &GraphNode,
        edges: &[Edge],
    ) -> InjectResult<Arguments> {
        let mut values = Vec::with_capacity(edges.len());
        for edge in edges {
            values.push((edge_identifier(edge), self.resolve_edge(edge)?));
        }

        Ok(Arguments::new(node.identifier().clone(), values))
    }

    async fn arguments_async(
        &self,
        node: &GraphNode,
        edges: &[Edge],
    ) -> InjectResult<Arguments> {
        let mut values = Vec::with_capacity(edges.len());
        for edge in edges {
            values.push((edge_identifier(edge), self.resolve_edge_async(edge).await?));
        }

        Ok(Arguments::new(node.identifier().clone(), values))
    }

    fn resolve_edge(&self, edge: &Edge) -> InjectResult<Resolved> {
        match edge {
            Edge::Node(node) if node.is_null() => Ok(Resolved::Null),
            Edge::Node(node) => {
                self.resolve_in_session(node).map(Resolved::Instance)
            }
            Edge::Reference(target) => {
                let container = upgrade(&target.container, &target.identifier)?;
                let node = container.dependency_graph(&target.identifier)?;
                self.resolve_in_session(&node).map(Resolved::Instance)
            }
            Edge::Deferred(target) => Ok(Resolved::Deferred(self.defer(target)?)),
        }
    }

    async fn resolve_edge_async(&self, edge: &Edge) -> InjectResult<Resolved> {
        match edge {
            Edge::Node(node) if node.is_null() => Ok(Resolved::Null),
            Edge::Node(node) => self
                .resolve_in_session_async(node)
                .await
                .map(Resolved::Instance),
            Edge::Reference(target) => {
                let container = upgrade(&target.container, &target.identifier)?;
                let node = container.dependency_graph(&target.identifier)?;
                self.resolve_in_session_async(&node)
                    .await
                    .map(Resolved::Instance)
            }
            Edge::Deferred(target) => Ok(Resolved::Deferred(self.defer(target)?)),
        }
    }

    fn defer(&self, target: &EdgeTarget) -> InjectResult<Deferred> {
        let container = upgrade(&target.container, &target.identifier)?;
        Ok(Deferred::new(
            target.identifier.clone(),
            self.with_container(container),
        ))
    }
}

impl Debug for DependencyResolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("container", &self.container)
            .field("cache", &self.cache)
            .finish()
    }
}

/// The injection level of one top-level resolution. Dropping it ends the
/// level if this resolution opened it.
struct InjectionScope {
    resolver: DependencyResolver,
    opened: bool,
}

impl Drop for InjectionScope {
    fn drop(&mut self) {
        if !self.opened {
            return;
        }

        if let Some(retained) = &self.resolver.retained {
            retained.keep(&self.resolver.cache);
        }
        self.resolver.cache.end_scope(&Scope::Injection);
    }
}

type WeakInstance = (
    Weak<dyn Any + Send + Sync>,
    Option<Weak<dyn RequestLifecycle>>,
);

/// Weak references to the injection-scoped instances of a resolution,
/// shared by the deferred handles it created. Reading a handle later
/// reopens an injection level holding the instances still alive, so the
/// handle reaches the same instances as the resolution that created it.
#[derive(Clone, Default)]
struct Retained {
    instances: Arc<Mutex<HashMap<CacheKey, WeakInstance>>>,
}

impl Retained {
    fn keep(&self, cache: &DependencyCache) {
        let entries = cache.level_entries(&Scope::Injection);
        let mut instances = self.instances.lock();
        instances.retain(|_, (value, _)| value.strong_count() > 0);
        for (key, instance) in entries {
            let value = Arc::downgrade(instance.value());
            let lifecycle = instance.lifecycle().map(Arc::downgrade);
            instances.insert(key, (value, lifecycle));
        }
    }

    fn restore(&self, cache: &DependencyCache) {
        let alive: Vec<_> = self
            .instances
            .lock()
            .iter()
            .filter_map(|(key, (value, lifecycle))| {
                let value = value.upgrade()?;
                let lifecycle = lifecycle.as_ref().and_then(Weak::upgrade);
                Some((key.clone(), value, lifecycle))
            })
            .collect();
        for (key, value, lifecycle) in alive {
            cache.set(
                &Scope::Injection,
                key,
                CachedInstance::with_lifecycle(value, lifecycle),
            );
        }
    }
}

fn edge_identifier(edge: &Edge) -> Identifier {
    match edge {
        Edge::Node(dependency) => dependency.identifier().clone(),
        Edge::Reference(target) | Edge::Deferred(target) => {
            target.identifier().clone()
        }
    }
}

fn upgrade(
    container: &WeakContainer,
    identifier: &Identifier,
) -> InjectResult<Container> {
    container.upgrade().ok_or_else(|| {
        InjectError::InternalError(format!(
            "the container compiling {} was dropped",
            identifier
        ))
    })
}
