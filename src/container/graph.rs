use super::{
    node::needs_async, Container, ContainerId, Edge, EdgeTarget, GraphNode,
    Intrinsic, NodeKind,
};
use crate::{
    Definition, DependencyResolver, Identifier, InjectError, InjectResult,
    ParameterSpec, Scope,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::trace;

pub(super) fn compile(
    container: &Container,
    identifier: &Identifier,
    optional: bool,
) -> InjectResult<Arc<GraphNode>> {
    let mut builder = GraphBuilder::default();
    let edge =
        builder.visit(container, identifier, optional, EdgeMode::Eager)?;
    let node = match edge {
        Edge::Node(node) => node,
        Edge::Reference(_) | Edge::Deferred(_) => {
            return Err(InjectError::InternalError(format!(
                "{} compiled to a lazy edge",
                identifier
            )))
        }
    };

    builder.commit();
    Ok(node)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EdgeMode {
    /// Constructor and factory parameters.
    Eager,
    /// Properties, injected after the owner is cached.
    Property,
    Deferred,
}

struct Frame {
    container: ContainerId,
    identifier: Identifier,
    lazy: bool,
}

enum Located {
    Memoized(Arc<GraphNode>),
    Definition {
        owner: Container,
        identifier: Identifier,
        definition: Definition,
    },
    Intrinsic(GraphNode),
    Missing,
}

/// Compiles one graph. Compiled nodes are only memoized in their containers
/// once the whole graph compiled, so a failed compilation leaves no nodes
/// behind that point at a failed ancestor.
#[derive(Default)]
struct GraphBuilder {
    stack: Vec<Frame>,
    compiled: HashMap<(ContainerId, Identifier), Arc<GraphNode>>,
    memo: Vec<(Container, Identifier, Arc<GraphNode>)>,
}

impl GraphBuilder {
    fn memoize(
        &mut self,
        container: &Container,
        identifier: Identifier,
        node: Arc<GraphNode>,
    ) {
        self.compiled
            .insert((container.id(), identifier.clone()), node.clone());
        self.memo.push((container.clone(), identifier, node));
    }

    fn commit(self) {
        for (container, identifier, node) in self.memo {
            container.memoize(identifier, node);
        }
    }

    fn visit(
        &mut self,
        container: &Container,
        identifier: &Identifier,
        optional: bool,
        mode: EdgeMode,
    ) -> InjectResult<Edge> {
        let target = EdgeTarget {
            identifier: identifier.clone(),
            container: container.downgrade(),
        };
        let node = match locate(container, identifier, &self.compiled)? {
            Located::Memoized(node) => node,
            Located::Intrinsic(node) => Arc::new(node),
            Located::Missing if optional => Arc::new(GraphNode::null(
                identifier.clone(),
                container.id(),
            )),
            Located::Missing => {
                if self.stack.is_empty() {
                    return Err(InjectError::NotRegistered {
                        identifier: identifier.clone(),
                    });
                }

                let mut path: Vec<_> = self
                    .stack
                    .iter()
                    .map(|frame| frame.identifier.clone())
                    .collect();
                path.push(identifier.clone());
                return Err(InjectError::MissingDependency { path });
            }
            Located::Definition {
                owner,
                identifier: resolved,
                definition,
            } => {
                let in_progress = self.stack.iter().position(|frame| {
                    frame.container == owner.id() && frame.identifier == resolved
                });
                if let Some(position) = in_progress {
                    return self.revisit(
                        position, &owner, &resolved, &definition, mode, target,
                    );
                }

                self.stack.push(Frame {
                    container: owner.id(),
                    identifier: resolved.clone(),
                    lazy: mode != EdgeMode::Eager,
                });
                let built = self.build(&owner, &resolved, &definition);
                self.stack.pop();

                let node = built?;
                trace!(
                    container = %owner.name(),
                    identifier = %resolved,
                    kind = node.kind_name(),
                    scope = %node.scope(),
                    "compiled graph node"
                );
                self.memoize(&owner, resolved.clone(), node.clone());
                if !owner.ptr_eq(container) || resolved != *identifier {
                    self.memoize(container, identifier.clone(), node.clone());
                }
                node
            }
        };

        if mode == EdgeMode::Deferred && !node.is_null() {
            Ok(Edge::Deferred(target))
        } else {
            Ok(Edge::Node(node))
        }
    }

    /// Handles reaching a node that is still being compiled.
    fn revisit(
        &self,
        position: usize,
        owner: &Container,
        identifier: &Identifier,
        definition: &Definition,
        mode: EdgeMode,
        target: EdgeTarget,
    ) -> InjectResult<Edge> {
        if mode == EdgeMode::Deferred {
            return Ok(Edge::Deferred(target));
        }

        let crossed = mode == EdgeMode::Property
            || self.stack[position + 1..].iter().any(|frame| frame.lazy);
        if crossed && !scope_of(owner, identifier, definition).is_transient() {
            return Ok(Edge::Reference(target));
        }

        let mut cycle: Vec<_> = self.stack[position..]
            .iter()
            .map(|frame| frame.identifier.clone())
            .collect();
        cycle.push(identifier.clone());
        Err(InjectError::CircularDependency { cycle })
    }

    fn build(
        &mut self,
        owner: &Container,
        identifier: &Identifier,
        definition: &Definition,
    ) -> InjectResult<Arc<GraphNode>> {
        let (parameter_overrides, property_overrides) = {
            let state = owner.inner.state.read();
            (
                state.parameter_overrides.get(identifier).cloned(),
                state.property_overrides.get(identifier).cloned(),
            )
        };
        let parameter_spec = |index: usize, spec: &ParameterSpec| {
            parameter_overrides
                .as_ref()
                .and_then(|overrides| overrides.get(&index))
                .cloned()
                .unwrap_or_else(|| spec.clone())
        };

        let mut dependencies = HashSet::new();
        dependencies.insert(identifier.clone());
        let kind = match definition {
            Definition::Type(type_definition) => {
                let mut parameters = Vec::new();
                for (index, spec) in
                    type_definition.parameters().iter().enumerate()
                {
                    let spec = parameter_spec(index, spec);
                    parameters.push(self.visit_spec(
                        owner,
                        &spec,
                        EdgeMode::Eager,
                        &mut dependencies,
                    )?);
                }

                let mut properties = Vec::new();
                for property in type_definition.property_specs() {
                    let spec = property_overrides
                        .as_ref()
                        .and_then(|overrides| {
                            overrides.get(property.name.as_ref())
                        })
                        .unwrap_or(&property.spec)
                        .clone();
                    properties.push(self.visit_spec(
                        owner,
                        &spec,
                        EdgeMode::Property,
                        &mut dependencies,
                    )?);
                }

                NodeKind::Type {
                    definition: type_definition.clone(),
                    parameters,
                    properties,
                }
            }
            Definition::Factory(factory_definition) => {
                let mut parameters = Vec::new();
                for (index, spec) in
                    factory_definition.parameters().iter().enumerate()
                {
                    let spec = parameter_spec(index, spec);
                    parameters.push(self.visit_spec(
                        owner,
                        &spec,
                        EdgeMode::Eager,
                        &mut dependencies,
                    )?);
                }

                NodeKind::Factory {
                    definition: factory_definition.clone(),
                    parameters,
                }
            }
            Definition::Value(value_definition) => NodeKind::Value {
                definition: value_definition.clone(),
            },
        };

        Ok(Arc::new(GraphNode {
            identifier: identifier.clone(),
            container: owner.id(),
            scope: scope_of(owner, identifier, definition),
            asynchronous: needs_async(&kind),
            kind,
            dependencies,
        }))
    }

    fn visit_spec(
        &mut self,
        owner: &Container,
        spec: &ParameterSpec,
        mode: EdgeMode,
        dependencies: &mut HashSet<Identifier>,
    ) -> InjectResult<Edge> {
        let mode = if spec.is_deferred() {
            EdgeMode::Deferred
        } else {
            mode
        };
        let edge =
            self.visit(owner, spec.identifier(), spec.is_optional(), mode)?;

        dependencies.insert(spec.identifier().clone());
        match &edge {
            Edge::Node(node) => {
                dependencies.extend(node.dependencies.iter().cloned());
            }
            Edge::Reference(target) | Edge::Deferred(target) => {
                dependencies.insert(target.identifier.clone());
            }
        }
        Ok(edge)
    }
}

fn scope_of(
    owner: &Container,
    identifier: &Identifier,
    definition: &Definition,
) -> Scope {
    definition
        .declared_scope()
        .cloned()
        .unwrap_or_else(|| owner.scopes().scope_of(identifier))
}

/// Finds where `identifier` is defined when looked up from `container`.
///
/// Each container is searched for, in order: a node compiled earlier, an
/// alias, a definition, an import, and the intrinsic identifiers. The search
/// then continues in the imported container or the parent.
fn locate(
    container: &Container,
    identifier: &Identifier,
    compiled: &HashMap<(ContainerId, Identifier), Arc<GraphNode>>,
) -> InjectResult<Located> {
    let mut current = container.clone();
    let mut identifier = identifier.clone();
    let mut aliases_seen: Vec<(ContainerId, Identifier)> = Vec::new();

    loop {
        if let Some(node) = compiled.get(&(current.id(), identifier.clone())) {
            return Ok(Located::Memoized(node.clone()));
        }

        let next = {
            let state = current.inner.state.read();
            if let Some(node) = state.graph.get(&identifier) {
                return Ok(Located::Memoized(node.clone()));
            }

            if let Some(target) = state.aliases.get(&identifier) {
                let key = (current.id(), identifier.clone());
                if aliases_seen.contains(&key) {
                    let mut cycle: Vec<_> =
                        aliases_seen.into_iter().map(|(_, id)| id).collect();
                    cycle.push(identifier);
                    return Err(InjectError::CircularDependency { cycle });
                }

                aliases_seen.push(key);
                identifier = target.clone();
                continue;
            }

            if let Some(definition) = state.definitions.get(&identifier) {
                return Ok(Located::Definition {
                    owner: current.clone(),
                    identifier,
                    definition: definition.clone(),
                });
            }

            if let Some(source) = state.imports.get(&identifier) {
                Some(source.clone())
            } else if let Some(node) = intrinsic(&current, &identifier) {
                return Ok(Located::Intrinsic(node));
            } else {
                current.inner.parent.clone()
            }
        };

        match next {
            Some(next) => current = next,
            None => return Ok(Located::Missing),
        }
    }
}

fn intrinsic(container: &Container, identifier: &Identifier) -> Option<GraphNode> {
    let kind = if *identifier == Identifier::of::<Container>() {
        Intrinsic::Container(container.downgrade())
    } else if *identifier == Identifier::of::<DependencyResolver>() {
        Intrinsic::Resolver(container.downgrade())
    } else {
        return None;
    };

    let mut dependencies = HashSet::new();
    dependencies.insert(identifier.clone());
    Some(GraphNode {
        identifier: identifier.clone(),
        container: container.id(),
        scope: Scope::Transient,
        kind: NodeKind::Intrinsic(kind),
        dependencies,
        asynchronous: false,
    })
}
