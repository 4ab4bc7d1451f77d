use crate::{
    ContainerId, FactoryDefinition, Identifier, Scope, TypeDefinition,
    ValueDefinition, WeakContainer,
};
use std::{collections::HashSet, sync::Arc};

/// A compiled plan for producing the value of one identifier within one
/// container.
#[derive(Debug)]
pub struct GraphNode {
    pub(crate) identifier: Identifier,
    pub(crate) container: ContainerId,
    pub(crate) scope: Scope,
    pub(crate) kind: NodeKind,
    pub(crate) dependencies: HashSet<Identifier>,
    pub(crate) asynchronous: bool,
}

impl GraphNode {
    pub(crate) fn null(identifier: Identifier, container: ContainerId) -> Self {
        let mut dependencies = HashSet::new();
        dependencies.insert(identifier.clone());
        GraphNode {
            identifier,
            container,
            scope: Scope::Transient,
            kind: NodeKind::Null,
            dependencies,
            asynchronous: false,
        }
    }

    /// The identifier this node produces, after aliases were followed.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The container owning the definition this node was compiled from.
    #[must_use]
    pub fn container_id(&self) -> ContainerId {
        self.container
    }

    /// The scope instances of this node are cached under.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// What kind of node this is, and its dependencies.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// A short name of this node's kind: `type`, `factory`, `value`,
    /// `intrinsic` or `null`.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Type { .. } => "type",
            NodeKind::Factory { .. } => "factory",
            NodeKind::Value { .. } => "value",
            NodeKind::Intrinsic(_) => "intrinsic",
            NodeKind::Null => "null",
        }
    }

    /// Whether this node stands for an optional dependency without a
    /// definition.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.kind, NodeKind::Null)
    }

    /// Whether resolving this node may await an asynchronous factory. Nodes
    /// with reference edges count as asynchronous since their targets are
    /// only known at resolution time.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Whether this node, directly or transitively, depends on
    /// `identifier`. Every node depends on its own identifier.
    #[must_use]
    pub fn depends_on(&self, identifier: &Identifier) -> bool {
        self.dependencies.contains(identifier)
    }

    /// The edges of this node: constructor parameters first, then properties.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        let (parameters, properties) = match &self.kind {
            NodeKind::Type {
                parameters,
                properties,
                ..
            } => (parameters.as_slice(), properties.as_slice()),
            NodeKind::Factory { parameters, .. } => {
                (parameters.as_slice(), [].as_slice())
            }
            _ => ([].as_slice(), [].as_slice()),
        };
        parameters.iter().chain(properties)
    }
}

pub(crate) fn needs_async(kind: &NodeKind) -> bool {
    let (parameters, properties) = match kind {
        NodeKind::Type {
            parameters,
            properties,
            ..
        } => (parameters.as_slice(), properties.as_slice()),
        NodeKind::Factory {
            definition,
            parameters,
        } => {
            if definition.is_async() {
                return true;
            }
            (parameters.as_slice(), [].as_slice())
        }
        _ => return false,
    };

    parameters.iter().chain(properties).any(|edge| match edge {
        Edge::Node(node) => node.asynchronous,
        Edge::Reference(_) => true,
        Edge::Deferred(_) => false,
    })
}

/// The kind of a [`GraphNode`].
#[derive(Debug)]
pub enum NodeKind {
    /// A type constructed from its definition.
    Type {
        /// The definition the node was compiled from.
        definition: Arc<TypeDefinition>,
        /// One edge per constructor parameter.
        parameters: Vec<Edge>,
        /// One edge per injected property.
        properties: Vec<Edge>,
    },
    /// A value produced by a factory.
    Factory {
        /// The definition the node was compiled from.
        definition: Arc<FactoryDefinition>,
        /// One edge per factory parameter.
        parameters: Vec<Edge>,
    },
    /// A precomputed value.
    Value {
        /// The definition the node was compiled from.
        definition: Arc<ValueDefinition>,
    },
    /// A value every container provides without registration.
    Intrinsic(Intrinsic),
    /// An optional dependency without a definition.
    Null,
}

/// Values every container provides without registration.
#[derive(Debug)]
pub enum Intrinsic {
    /// The container the lookup reached.
    Container(WeakContainer),
    /// A resolver over the container the lookup reached, sharing the cache of
    /// the active resolver.
    Resolver(WeakContainer),
}

/// A dependency of a [`GraphNode`].
#[derive(Debug)]
pub enum Edge {
    /// A dependency resolved eagerly.
    Node(Arc<GraphNode>),
    /// A dependency resolved eagerly by looking it up again, because it was
    /// still being compiled when the edge was created. Only found below
    /// property or deferred edges.
    Reference(EdgeTarget),
    /// A dependency injected as a lazy handle.
    Deferred(EdgeTarget),
}

/// Where a [`Edge::Reference`] or [`Edge::Deferred`] edge is looked up.
#[derive(Clone, Debug)]
pub struct EdgeTarget {
    pub(crate) identifier: Identifier,
    pub(crate) container: WeakContainer,
}

impl EdgeTarget {
    /// The identifier that is looked up.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}
