use crate::{
    Deferred, DynSvc, Identifier, InjectError, InjectResult, Lazy,
    RequestLifecycle, Scope, Service, ServiceInfo, Svc,
};
use futures_util::{future::BoxFuture, FutureExt};
use std::{fmt::Debug, future::Future, sync::Arc};

pub(crate) type Constructor =
    Arc<dyn Fn(&mut Arguments) -> InjectResult<DynSvc> + Send + Sync>;
pub(crate) type AsyncConstructor = Arc<
    dyn Fn(Arguments) -> BoxFuture<'static, InjectResult<DynSvc>> + Send + Sync,
>;
pub(crate) type PropertySetter =
    Arc<dyn Fn(&DynSvc, &mut Arguments) -> InjectResult<()> + Send + Sync>;
pub(crate) type LifecycleCaster =
    fn(&DynSvc) -> Option<Arc<dyn RequestLifecycle>>;

/// Describes a single injected dependency: which identifier to inject, and
/// whether the injection is optional and/or deferred.
///
/// An optional dependency without a reachable definition is injected as
/// nothing instead of failing composition. A deferred dependency is injected
/// as a [`Deferred`] handle, which resolves its value the first time it is
/// read. Deferred dependencies may form cycles.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ParameterSpec {
    identifier: Identifier,
    optional: bool,
    defer: bool,
}

impl ParameterSpec {
    /// Creates a required, eager dependency on an identifier.
    #[must_use]
    pub fn new(identifier: impl Into<Identifier>) -> Self {
        ParameterSpec {
            identifier: identifier.into(),
            optional: false,
            defer: false,
        }
    }

    /// Creates a required, eager dependency on a type.
    #[must_use]
    pub fn of<T: Service>() -> Self {
        ParameterSpec::new(Identifier::of::<T>())
    }

    /// Creates a required, eager dependency on a string token.
    #[must_use]
    pub fn token(token: impl AsRef<str>) -> Self {
        ParameterSpec::new(Identifier::token(token))
    }

    /// Marks this dependency as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks this dependency as deferred.
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }

    /// The injected identifier.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Whether a missing definition is tolerated.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the dependency is injected as a lazy handle.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.defer
    }
}

impl From<Identifier> for ParameterSpec {
    fn from(identifier: Identifier) -> Self {
        ParameterSpec::new(identifier)
    }
}

impl From<&str> for ParameterSpec {
    fn from(token: &str) -> Self {
        ParameterSpec::token(token)
    }
}

impl From<String> for ParameterSpec {
    fn from(token: String) -> Self {
        ParameterSpec::token(token)
    }
}

/// A single resolved dependency, as handed to constructors, factories and
/// property setters.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// A fully constructed instance.
    Instance(DynSvc),
    /// An optional dependency that has no definition.
    Null,
    /// A deferred dependency that has not been read yet.
    Deferred(Deferred),
}

/// The resolved dependencies of a constructor, factory or property, in
/// declaration order. Each accessor consumes the next value.
///
/// ```
/// use scoped_injector::{
///     Container, DependencyResolver, ParameterSpec, TypeDefinition,
///     ValueDefinition,
/// };
///
/// struct Greeter {
///     greeting: String,
///     name: Option<std::sync::Arc<String>>,
/// }
///
/// let container = Container::new("root");
/// container
///     .register("greeting", ValueDefinition::new(String::from("Hello")))
///     .unwrap();
/// container
///     .register_type(
///         TypeDefinition::new(|args| {
///             Ok(Greeter {
///                 greeting: (*args.required::<String>()?).clone(),
///                 name: args.optional::<String>()?,
///             })
///         })
///         .parameter(ParameterSpec::token("greeting"))
///         .parameter(ParameterSpec::token("name").optional()),
///     )
///     .unwrap();
///
/// let resolver = DependencyResolver::new(container);
/// let greeter = resolver.get::<Greeter>().unwrap();
/// assert_eq!("Hello", greeter.greeting);
/// assert!(greeter.name.is_none());
/// ```
pub struct Arguments {
    owner: Identifier,
    values: std::vec::IntoIter<(Identifier, Resolved)>,
}

impl Arguments {
    pub(crate) fn new(
        owner: Identifier,
        values: Vec<(Identifier, Resolved)>,
    ) -> Self {
        Arguments {
            owner,
            values: values.into_iter(),
        }
    }

    /// The identifier being constructed.
    #[must_use]
    pub fn owner(&self) -> &Identifier {
        &self.owner
    }

    /// The number of values not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Takes the next value as it was resolved.
    pub fn dynamic(&mut self) -> InjectResult<(Identifier, Resolved)> {
        self.values.next().ok_or_else(|| {
            InjectError::InternalError(format!(
                "{} requested more dependencies than it declared",
                self.owner
            ))
        })
    }

    /// Takes the next value as a service pointer. Deferred values are read
    /// immediately.
    pub fn required<T: Service>(&mut self) -> InjectResult<Svc<T>> {
        let (identifier, resolved) = self.dynamic()?;
        match resolved {
            Resolved::Instance(value) => downcast(&identifier, value),
            Resolved::Deferred(deferred) => {
                downcast(&identifier, deferred.value()?)
            }
            Resolved::Null => Err(InjectError::NotRegistered { identifier }),
        }
    }

    /// Takes the next value as an optional service pointer.
    pub fn optional<T: Service>(&mut self) -> InjectResult<Option<Svc<T>>> {
        let (identifier, resolved) = self.dynamic()?;
        match resolved {
            Resolved::Instance(value) => downcast(&identifier, value).map(Some),
            Resolved::Deferred(deferred) => {
                downcast(&identifier, deferred.value()?).map(Some)
            }
            Resolved::Null => Ok(None),
        }
    }

    /// Takes the next value as a lazy handle. Eagerly resolved values are
    /// wrapped in an already-resolved handle.
    pub fn deferred<T: Service>(&mut self) -> InjectResult<Lazy<T>> {
        let (identifier, resolved) = self.dynamic()?;
        match resolved {
            Resolved::Deferred(deferred) => Ok(Lazy::new(deferred)),
            Resolved::Instance(value) => {
                Ok(Lazy::new(Deferred::resolved(identifier, value)))
            }
            Resolved::Null => Err(InjectError::NotRegistered { identifier }),
        }
    }
}

pub(crate) fn downcast<T: Service>(
    identifier: &Identifier,
    value: DynSvc,
) -> InjectResult<Svc<T>> {
    value.downcast::<T>().map_err(|_| InjectError::InvalidProvider {
        identifier: identifier.clone(),
        expected: std::any::type_name::<T>(),
    })
}

/// A property injected into an instance after it has been constructed and
/// cached.
#[derive(Clone)]
pub(crate) struct PropertySpec {
    pub(crate) name: Arc<str>,
    pub(crate) spec: ParameterSpec,
    pub(crate) setter: PropertySetter,
}

/// Describes how to construct a type: its constructor, the ordered
/// constructor dependencies, the injected properties and its declared scope.
///
/// Properties are injected after the instance is cached, so they may point
/// back at the instance being built (directly or through other services).
/// Since instances are shared, properties need interior mutability, usually
/// through a [`OnceCell`](once_cell::sync::OnceCell).
#[derive(Clone)]
pub struct TypeDefinition {
    service: ServiceInfo,
    constructor: Constructor,
    parameters: Vec<ParameterSpec>,
    properties: Vec<PropertySpec>,
    scope: Option<Scope>,
    lifecycle: Option<LifecycleCaster>,
}

impl TypeDefinition {
    /// Creates a definition for `T` from its constructor.
    pub fn new<T, F>(constructor: F) -> Self
    where
        T: Service,
        F: Fn(&mut Arguments) -> InjectResult<T> + Send + Sync + 'static,
    {
        TypeDefinition {
            service: ServiceInfo::of::<T>(),
            constructor: Arc::new(move |args| {
                constructor(args).map(|value| Svc::new(value) as DynSvc)
            }),
            parameters: Vec::new(),
            properties: Vec::new(),
            scope: None,
            lifecycle: None,
        }
    }

    /// Appends a constructor dependency.
    #[must_use]
    pub fn parameter(mut self, spec: impl Into<ParameterSpec>) -> Self {
        self.parameters.push(spec.into());
        self
    }

    /// Appends a property dependency. The setter receives the constructed
    /// instance and the resolved value of the property.
    #[must_use]
    pub fn property<T, F>(
        mut self,
        name: impl AsRef<str>,
        spec: impl Into<ParameterSpec>,
        setter: F,
    ) -> Self
    where
        T: Service,
        F: Fn(&T, &mut Arguments) -> InjectResult<()> + Send + Sync + 'static,
    {
        let setter: PropertySetter = Arc::new(move |instance, args| {
            let instance = instance.downcast_ref::<T>().ok_or_else(|| {
                InjectError::InvalidProvider {
                    identifier: args.owner().clone(),
                    expected: std::any::type_name::<T>(),
                }
            })?;
            setter(instance, args)
        });
        self.properties.push(PropertySpec {
            name: Arc::from(name.as_ref()),
            spec: spec.into(),
            setter,
        });
        self
    }

    /// Declares the scope of this type.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Registers request lifecycle hooks for instances of `T`.
    #[must_use]
    pub fn with_lifecycle<T: RequestLifecycle + Service>(mut self) -> Self {
        self.lifecycle = Some(cast_lifecycle::<T>);
        self
    }

    /// The type this definition constructs.
    #[must_use]
    pub fn service_info(&self) -> ServiceInfo {
        self.service
    }

    /// The declared scope, if any.
    #[must_use]
    pub fn declared_scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// The constructor dependencies in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// The names and specs of the injected properties.
    pub fn properties(
        &self,
    ) -> impl Iterator<Item = (&str, &ParameterSpec)> + '_ {
        self.properties
            .iter()
            .map(|property| (property.name.as_ref(), &property.spec))
    }

    pub(crate) fn property_specs(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub(crate) fn construct(
        &self,
        args: &mut Arguments,
    ) -> InjectResult<DynSvc> {
        (self.constructor)(args)
    }

    pub(crate) fn lifecycle(&self) -> Option<LifecycleCaster> {
        self.lifecycle
    }
}

impl Debug for TypeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("service", &self.service.name())
            .field("parameters", &self.parameters)
            .field(
                "properties",
                &self.properties().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone)]
enum Factory {
    Sync(Constructor),
    Async(AsyncConstructor),
}

/// Describes a value produced by invoking a function with resolved
/// dependencies.
///
/// Asynchronous factories are created with
/// [`new_async`](FactoryDefinition::new_async) and are only invoked by the
/// asynchronous resolution methods, such as
/// [`DependencyResolver::resolve_async`](crate::DependencyResolver::resolve_async).
///
/// ```
/// use scoped_injector::{
///     Container, DependencyResolver, FactoryDefinition, InjectError,
/// };
///
/// struct Connection {
///     url: String,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let container = Container::new("root");
/// container
///     .register("db.url", scoped_injector::ValueDefinition::new("postgres://localhost"))
///     .unwrap();
/// container
///     .register(
///         "db",
///         FactoryDefinition::new_async(["db.url"], |mut args| async move {
///             let url = args.required::<&str>()?;
///             tokio::task::yield_now().await;
///             Ok::<_, InjectError>(Connection { url: url.to_string() })
///         }),
///     )
///     .unwrap();
///
/// let resolver = DependencyResolver::new(container);
/// let db = resolver.resolve_async::<Connection>("db").await.unwrap();
/// assert_eq!("postgres://localhost", db.url);
/// assert!(resolver.resolve::<Connection>("db").is_err());
/// # }
/// ```
#[derive(Clone)]
pub struct FactoryDefinition {
    factory: Factory,
    parameters: Vec<ParameterSpec>,
    scope: Option<Scope>,
    lifecycle: Option<LifecycleCaster>,
}

impl FactoryDefinition {
    /// Creates a factory definition from its dependencies and function.
    pub fn new<T, F, P>(parameters: P, factory: F) -> Self
    where
        T: Service,
        F: Fn(&mut Arguments) -> InjectResult<T> + Send + Sync + 'static,
        P: IntoIterator,
        P::Item: Into<ParameterSpec>,
    {
        FactoryDefinition::with_factory(
            parameters,
            Factory::Sync(Arc::new(move |args| {
                factory(args).map(|value| Svc::new(value) as DynSvc)
            })),
        )
    }

    /// Creates a factory definition for a function without dependencies.
    pub fn from_fn<T, F>(factory: F) -> Self
    where
        T: Service,
        F: Fn() -> InjectResult<T> + Send + Sync + 'static,
    {
        FactoryDefinition::new(Vec::<ParameterSpec>::new(), move |_| factory())
    }

    /// Creates a factory definition from its dependencies and an
    /// asynchronous function.
    pub fn new_async<T, F, Fut, P>(parameters: P, factory: F) -> Self
    where
        T: Service,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InjectResult<T>> + Send + 'static,
        P: IntoIterator,
        P::Item: Into<ParameterSpec>,
    {
        FactoryDefinition::with_factory(
            parameters,
            Factory::Async(Arc::new(move |args| {
                factory(args)
                    .map(|result| result.map(|value| Svc::new(value) as DynSvc))
                    .boxed()
            })),
        )
    }

    fn with_factory<P>(parameters: P, factory: Factory) -> Self
    where
        P: IntoIterator,
        P::Item: Into<ParameterSpec>,
    {
        FactoryDefinition {
            factory,
            parameters: parameters.into_iter().map(Into::into).collect(),
            scope: None,
            lifecycle: None,
        }
    }

    /// Declares the scope of the produced value.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Registers request lifecycle hooks for produced values of type `T`.
    #[must_use]
    pub fn with_lifecycle<T: RequestLifecycle + Service>(mut self) -> Self {
        self.lifecycle = Some(cast_lifecycle::<T>);
        self
    }

    /// The dependencies in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// The declared scope, if any.
    #[must_use]
    pub fn declared_scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Whether the factory function is asynchronous.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.factory, Factory::Async(_))
    }

    pub(crate) fn invoke(&self, args: &mut Arguments) -> InjectResult<DynSvc> {
        match &self.factory {
            Factory::Sync(factory) => factory(args),
            Factory::Async(_) => Err(InjectError::AsyncRequired {
                identifier: args.owner().clone(),
            }),
        }
    }

    pub(crate) async fn invoke_async(
        &self,
        mut args: Arguments,
    ) -> InjectResult<DynSvc> {
        match &self.factory {
            Factory::Sync(factory) => factory(&mut args),
            Factory::Async(factory) => factory(args).await,
        }
    }

    pub(crate) fn lifecycle(&self) -> Option<LifecycleCaster> {
        self.lifecycle
    }
}

impl Debug for FactoryDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryDefinition")
            .field("parameters", &self.parameters)
            .field("async", &self.is_async())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Describes a precomputed value.
#[derive(Clone, Debug)]
pub struct ValueDefinition {
    value: DynSvc,
    scope: Option<Scope>,
}

impl ValueDefinition {
    /// Creates a definition for a value.
    pub fn new<T: Service>(value: T) -> Self {
        ValueDefinition::from_svc(Svc::new(value))
    }

    /// Creates a definition for a value that is already behind a service
    /// pointer.
    pub fn from_svc<T: Service>(value: Svc<T>) -> Self {
        ValueDefinition {
            value,
            scope: None,
        }
    }

    /// Declares the scope of the value.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// The declared scope, if any.
    #[must_use]
    pub fn declared_scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub(crate) fn value(&self) -> DynSvc {
        self.value.clone()
    }
}

/// How to build the value of an identifier.
#[derive(Clone, Debug)]
pub enum Definition {
    /// A constructible type.
    Type(Arc<TypeDefinition>),
    /// A function invoked with resolved dependencies.
    Factory(Arc<FactoryDefinition>),
    /// A precomputed value.
    Value(Arc<ValueDefinition>),
}

impl Definition {
    /// The declared scope, if any.
    #[must_use]
    pub fn declared_scope(&self) -> Option<&Scope> {
        match self {
            Definition::Type(definition) => definition.declared_scope(),
            Definition::Factory(definition) => definition.declared_scope(),
            Definition::Value(definition) => definition.declared_scope(),
        }
    }

    /// The kind of this definition, as shown in graph nodes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Type(_) => "type",
            Definition::Factory(_) => "factory",
            Definition::Value(_) => "value",
        }
    }
}

impl From<TypeDefinition> for Definition {
    fn from(definition: TypeDefinition) -> Self {
        Definition::Type(Arc::new(definition))
    }
}

impl From<FactoryDefinition> for Definition {
    fn from(definition: FactoryDefinition) -> Self {
        Definition::Factory(Arc::new(definition))
    }
}

impl From<ValueDefinition> for Definition {
    fn from(definition: ValueDefinition) -> Self {
        Definition::Value(Arc::new(definition))
    }
}

fn cast_lifecycle<T: RequestLifecycle + Service>(
    value: &DynSvc,
) -> Option<Arc<dyn RequestLifecycle>> {
    value
        .clone()
        .downcast::<T>()
        .ok()
        .map(|value| value as Arc<dyn RequestLifecycle>)
}
