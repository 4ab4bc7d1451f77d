use crate::{
    Definition, Identifier, InjectError, InjectResult, ParameterSpec,
    ScopeCatalog, TypeDefinition,
};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use tracing::{debug, trace};

mod graph;
mod node;

pub use node::*;

/// The logical identity of a container. Deep clones keep the identity of the
/// container they were cloned from, so instances cached under the original
/// (singletons, for example) are found again through the clone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ContainerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A hierarchical registry of definitions. Lookups that fail locally are
/// forwarded to imports and then to the parent container.
///
/// The container compiles definitions into [`GraphNode`]s on demand and
/// memoizes them. Registering, importing or overriding an identifier drops
/// only the memoized nodes that depend on it, in this container and in every
/// container that can see it (children and importers).
///
/// Cloning a [`Container`] returns another handle to the same container. Use
/// [`deep_clone`](Container::deep_clone) for an independent copy.
///
/// ```
/// use scoped_injector::{Container, DependencyResolver, ValueDefinition};
///
/// let parent = Container::new("parent");
/// parent.register("greeting", ValueDefinition::new("hello")).unwrap();
///
/// let child = parent.create_child("child");
/// child.register("greeting", ValueDefinition::new("howdy")).unwrap();
///
/// let from_parent = DependencyResolver::new(parent)
///     .resolve::<&str>("greeting")
///     .unwrap();
/// let from_child = DependencyResolver::new(child)
///     .resolve::<&str>("greeting")
///     .unwrap();
/// assert_eq!("hello", *from_parent);
/// assert_eq!("howdy", *from_child);
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// A non-owning handle to a [`Container`].
#[derive(Clone)]
pub struct WeakContainer {
    inner: Weak<ContainerInner>,
}

impl WeakContainer {
    /// Gets the container if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Container> {
        self.inner.upgrade().map(|inner| Container { inner })
    }
}

impl Debug for WeakContainer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(container) => write!(f, "WeakContainer({})", container.name()),
            None => f.write_str("WeakContainer(<dropped>)"),
        }
    }
}

struct ContainerInner {
    id: ContainerId,
    name: String,
    parent: Option<Container>,
    scopes: ScopeCatalog,
    state: RwLock<ContainerState>,
}

#[derive(Default)]
struct ContainerState {
    definitions: HashMap<Identifier, Definition>,
    aliases: HashMap<Identifier, Identifier>,
    imports: HashMap<Identifier, Container>,
    parameter_overrides: HashMap<Identifier, HashMap<usize, ParameterSpec>>,
    property_overrides: HashMap<Identifier, HashMap<String, ParameterSpec>>,
    graph: HashMap<Identifier, Arc<GraphNode>>,
    listeners: Vec<Weak<ContainerInner>>,
}

impl Container {
    /// Creates a root container with its own scope catalog.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Container::with_catalog(name, ScopeCatalog::new())
    }

    /// Creates a root container that records declared scopes in `scopes`.
    #[must_use]
    pub fn with_catalog(name: impl Into<String>, scopes: ScopeCatalog) -> Self {
        Container::from_parts(ContainerId::next(), name.into(), None, scopes)
    }

    fn from_parts(
        id: ContainerId,
        name: String,
        parent: Option<Container>,
        scopes: ScopeCatalog,
    ) -> Self {
        let container = Container {
            inner: Arc::new(ContainerInner {
                id,
                name,
                parent,
                scopes,
                state: RwLock::default(),
            }),
        };
        if let Some(parent) = &container.inner.parent {
            parent.add_listener(&container);
        }
        container
    }

    /// The logical identity of this container.
    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// The name this container was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The parent container, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    /// The scope catalog shared by this container's family.
    #[must_use]
    pub fn scopes(&self) -> &ScopeCatalog {
        &self.inner.scopes
    }

    /// Whether both handles point at the same container.
    #[must_use]
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a non-owning handle to this container.
    #[must_use]
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Creates a container whose failed lookups are forwarded to this one.
    #[must_use]
    pub fn create_child(&self, name: impl Into<String>) -> Container {
        Container::from_parts(
            ContainerId::next(),
            name.into(),
            Some(self.clone()),
            self.inner.scopes.clone(),
        )
    }

    /// Creates a container with the same parent as this one.
    #[must_use]
    pub fn create_sibling(&self, name: impl Into<String>) -> Container {
        Container::from_parts(
            ContainerId::next(),
            name.into(),
            self.inner.parent.clone(),
            self.inner.scopes.clone(),
        )
    }

    /// Registers a definition for an identifier. Fails if this container
    /// already has a definition or alias for the identifier.
    pub fn register(
        &self,
        identifier: impl Into<Identifier>,
        definition: impl Into<Definition>,
    ) -> InjectResult<()> {
        let identifier = identifier.into();
        let definition = definition.into();
        {
            let mut state = self.inner.state.write();
            if state.definitions.contains_key(&identifier)
                || state.aliases.contains_key(&identifier)
            {
                return Err(InjectError::AlreadyRegistered {
                    identifier,
                    container: self.inner.name.clone(),
                });
            }

            if let Some(scope) = definition.declared_scope() {
                self.inner.scopes.register(identifier.clone(), scope.clone());
            }
            debug!(
                container = %self.inner.name,
                identifier = %identifier,
                kind = definition.kind(),
                "registered definition"
            );
            state.definitions.insert(identifier.clone(), definition);
        }

        self.invalidate(&identifier);
        Ok(())
    }

    /// Registers a type definition under the type it constructs.
    pub fn register_type(&self, definition: TypeDefinition) -> InjectResult<()> {
        self.register(definition.service_info(), definition)
    }

    /// Redirects lookups of `alias` in this container to `identifier`.
    pub fn register_alias(
        &self,
        identifier: impl Into<Identifier>,
        alias: impl Into<Identifier>,
    ) -> InjectResult<()> {
        let identifier = identifier.into();
        let alias = alias.into();
        {
            let mut state = self.inner.state.write();
            if state.definitions.contains_key(&alias)
                || state.aliases.contains_key(&alias)
            {
                return Err(InjectError::AlreadyRegistered {
                    identifier: alias,
                    container: self.inner.name.clone(),
                });
            }

            debug!(
                container = %self.inner.name,
                alias = %alias,
                target = %identifier,
                "registered alias"
            );
            state.aliases.insert(alias.clone(), identifier);
        }

        self.invalidate(&alias);
        Ok(())
    }

    /// Resolves `identifier` through `source` instead of locally. Importing
    /// an identifier again replaces the previous source.
    pub fn import(
        &self,
        identifier: impl Into<Identifier>,
        source: &Container,
    ) -> InjectResult<()> {
        let identifier = identifier.into();
        if self.ptr_eq(source) {
            return Err(InjectError::CircularDependency {
                cycle: vec![identifier.clone(), identifier],
            });
        }

        let previous = self
            .inner
            .state
            .write()
            .imports
            .insert(identifier.clone(), source.clone());
        match previous {
            Some(previous) if previous.ptr_eq(source) => return Ok(()),
            Some(previous) => debug!(
                container = %self.inner.name,
                identifier = %identifier,
                previous = %previous.name(),
                source = %source.name(),
                "replaced import"
            ),
            None => trace!(
                container = %self.inner.name,
                identifier = %identifier,
                source = %source.name(),
                "imported identifier"
            ),
        }

        source.add_listener(self);
        self.invalidate(&identifier);
        Ok(())
    }

    /// Replaces the spec of a constructor parameter of `identifier` when it
    /// is compiled in (or through) this container.
    pub fn override_parameter(
        &self,
        identifier: impl Into<Identifier>,
        index: usize,
        spec: impl Into<ParameterSpec>,
    ) {
        let identifier = identifier.into();
        self.inner
            .state
            .write()
            .parameter_overrides
            .entry(identifier.clone())
            .or_default()
            .insert(index, spec.into());
        debug!(
            container = %self.inner.name,
            identifier = %identifier,
            index,
            "overrode parameter"
        );
        self.invalidate(&identifier);
    }

    /// Replaces the spec of an injected property of `identifier` when it is
    /// compiled in (or through) this container.
    pub fn override_property(
        &self,
        identifier: impl Into<Identifier>,
        name: impl Into<String>,
        spec: impl Into<ParameterSpec>,
    ) {
        let identifier = identifier.into();
        let name = name.into();
        debug!(
            container = %self.inner.name,
            identifier = %identifier,
            property = %name,
            "overrode property"
        );
        self.inner
            .state
            .write()
            .property_overrides
            .entry(identifier.clone())
            .or_default()
            .insert(name, spec.into());
        self.invalidate(&identifier);
    }

    /// Whether this container itself has a definition for `identifier`.
    #[must_use]
    pub fn has_definition(&self, identifier: &Identifier) -> bool {
        self.inner.state.read().definitions.contains_key(identifier)
    }

    /// Whether `identifier` can be compiled through this container.
    #[must_use]
    pub fn is_registered(&self, identifier: &Identifier) -> bool {
        matches!(
            self.optional_dependency_graph(identifier),
            Ok(node) if !node.is_null()
        )
    }

    /// Gets the compiled dependency graph of `identifier`, compiling it if
    /// needed.
    ///
    /// Fails if the identifier or one of its non-optional dependencies has no
    /// reachable definition, or if its non-deferred dependencies form a cycle.
    pub fn dependency_graph(
        &self,
        identifier: &Identifier,
    ) -> InjectResult<Arc<GraphNode>> {
        graph::compile(self, identifier, false)
    }

    /// Like [`dependency_graph`](Container::dependency_graph), but returns a
    /// null node instead of failing if `identifier` itself has no reachable
    /// definition.
    pub fn optional_dependency_graph(
        &self,
        identifier: &Identifier,
    ) -> InjectResult<Arc<GraphNode>> {
        graph::compile(self, identifier, true)
    }

    /// Gets the memoized node of `identifier` without compiling anything.
    #[must_use]
    pub fn compiled_node(&self, identifier: &Identifier) -> Option<Arc<GraphNode>> {
        self.inner.state.read().graph.get(identifier).cloned()
    }

    /// Creates an independent copy of this container together with its
    /// ancestors and everything it imports, transitively.
    ///
    /// Definitions are shared between the original and the copy, but
    /// registrations made on a copy are invisible to the original. Copies
    /// keep the [`ContainerId`]s of the originals.
    #[must_use]
    pub fn deep_clone(&self) -> ClonedContainers {
        let mut cloned = HashMap::new();
        let root = self.clone_into(&mut cloned);
        trace!(
            container = %self.inner.name,
            count = cloned.len(),
            "deep cloned container"
        );
        ClonedContainers {
            root,
            containers: cloned.into_values().collect(),
        }
    }

    fn clone_into(&self, cloned: &mut HashMap<usize, Container>) -> Container {
        let key = Arc::as_ptr(&self.inner) as usize;
        if let Some(existing) = cloned.get(&key) {
            return existing.clone();
        }

        let parent = self.inner.parent.as_ref().map(|p| p.clone_into(cloned));
        let (state, imports) = {
            let state = self.inner.state.read();
            let snapshot = ContainerState {
                definitions: state.definitions.clone(),
                aliases: state.aliases.clone(),
                imports: HashMap::new(),
                parameter_overrides: state.parameter_overrides.clone(),
                property_overrides: state.property_overrides.clone(),
                graph: HashMap::new(),
                listeners: Vec::new(),
            };
            let imports: Vec<_> = state
                .imports
                .iter()
                .map(|(id, source)| (id.clone(), source.clone()))
                .collect();
            (snapshot, imports)
        };

        let copy = Container::from_parts(
            self.inner.id,
            self.inner.name.clone(),
            parent,
            self.inner.scopes.clone(),
        );
        {
            let mut copy_state = copy.inner.state.write();
            let listeners = std::mem::take(&mut copy_state.listeners);
            *copy_state = state;
            copy_state.listeners = listeners;
        }
        cloned.insert(key, copy.clone());

        for (identifier, source) in imports {
            let source = source.clone_into(cloned);
            source.add_listener(&copy);
            copy.inner.state.write().imports.insert(identifier, source);
        }

        copy
    }

    fn add_listener(&self, listener: &Container) {
        let mut state = self.inner.state.write();
        let weak = Arc::downgrade(&listener.inner);
        if !state.listeners.iter().any(|l| Weak::ptr_eq(l, &weak)) {
            state.listeners.push(weak);
        }
    }

    /// Drops every memoized node that depends on `identifier`, here and in
    /// every container listening to this one.
    fn invalidate(&self, identifier: &Identifier) {
        let mut visited = HashSet::new();
        self.invalidate_inner(identifier, &mut visited);
    }

    fn invalidate_inner(
        &self,
        identifier: &Identifier,
        visited: &mut HashSet<usize>,
    ) {
        if !visited.insert(Arc::as_ptr(&self.inner) as usize) {
            return;
        }

        let listeners = {
            let mut state = self.inner.state.write();
            let before = state.graph.len();
            state.graph.retain(|key, node| {
                key != identifier && !node.depends_on(identifier)
            });
            let dropped = before - state.graph.len();
            if dropped > 0 {
                trace!(
                    container = %self.inner.name,
                    identifier = %identifier,
                    dropped,
                    "invalidated compiled nodes"
                );
            }

            state.listeners.retain(|listener| listener.strong_count() > 0);
            state.listeners.clone()
        };

        for listener in listeners.iter().filter_map(Weak::upgrade) {
            Container { inner: listener }.invalidate_inner(identifier, visited);
        }
    }

    pub(crate) fn memoize(&self, identifier: Identifier, node: Arc<GraphNode>) {
        self.inner.state.write().graph.insert(identifier, node);
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent.as_ref().map(Container::name))
            .finish()
    }
}

/// The result of [`Container::deep_clone`]: the copy of the cloned container
/// and every other container copied along with it.
#[derive(Clone, Debug)]
pub struct ClonedContainers {
    root: Container,
    containers: Vec<Container>,
}

impl ClonedContainers {
    /// The copy of the container that was cloned.
    #[must_use]
    pub fn root(&self) -> &Container {
        &self.root
    }

    /// Every copied container, including the root.
    #[must_use]
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Finds the copy of the container with the given identity.
    #[must_use]
    pub fn find(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|container| container.id() == id)
    }
}
