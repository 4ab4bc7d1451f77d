use crate::{
    definition::downcast,
    server::{
        ActionArguments, ActionResult, FilterRegistration, HandlerResult,
        HttpMethod, ParameterMetadata, RequestContext, Transformer,
    },
    DynSvc, Identifier, InjectError, InjectResult, Service, Svc,
    TypeDefinition,
};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    future::Future,
    sync::Arc,
};
use tracing::warn;

type ActionHandler = Arc<
    dyn Fn(
            DynSvc,
            ActionArguments,
            RequestContext,
        ) -> BoxFuture<'static, HandlerResult<ActionResult>>
        + Send
        + Sync,
>;

/// A method of a controller that handles requests to a route.
///
/// ```
/// use scoped_injector::server::{
///     ActionArguments, ActionMetadata, ActionResult, HttpMethod,
///     RequestContext, ValueProvider,
/// };
/// use scoped_injector::Svc;
///
/// struct UserController;
///
/// let action = ActionMetadata::new(
///     "show",
///     HttpMethod::Get,
///     "/:id",
///     |_: Svc<UserController>, args: ActionArguments, _: RequestContext| async move {
///         Ok(ActionResult::text(format!("user {}", args.text(0).unwrap_or("?"))))
///     },
/// )
/// .parameter(ValueProvider::route_param("id"));
///
/// assert_eq!("show", action.name());
/// assert_eq!(1, action.parameters().len());
/// ```
#[derive(Clone)]
pub struct ActionMetadata {
    name: String,
    method: HttpMethod,
    route: String,
    parameters: Vec<ParameterMetadata>,
    filters: Vec<FilterRegistration>,
    transformers: Vec<Transformer>,
    handler: ActionHandler,
}

impl ActionMetadata {
    /// Creates an action of controller `C`.
    pub fn new<C, F, Fut>(
        name: impl Into<String>,
        method: HttpMethod,
        route: impl Into<String>,
        handler: F,
    ) -> Self
    where
        C: Service,
        F: Fn(Svc<C>, ActionArguments, RequestContext) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = HandlerResult<ActionResult>> + Send + 'static,
    {
        let name = name.into();
        let controller = Identifier::of::<C>();
        let handler: ActionHandler = Arc::new(move |instance, args, context| {
            match downcast::<C>(&controller, instance) {
                Ok(instance) => handler(instance, args, context).boxed(),
                Err(error) => {
                    let result: HandlerResult<ActionResult> = Err(error.into());
                    futures_util::future::ready(result).boxed()
                }
            }
        });

        ActionMetadata {
            name,
            method,
            route: route.into(),
            parameters: Vec::new(),
            filters: Vec::new(),
            transformers: Vec::new(),
            handler,
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn parameter(mut self, parameter: impl Into<ParameterMetadata>) -> Self {
        self.parameters.push(parameter.into());
        self
    }

    /// Adds a filter of this action.
    #[must_use]
    pub fn filter(mut self, filter: FilterRegistration) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds a transformer applied to every parameter of this action.
    #[must_use]
    pub fn transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// The name of the action.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handled method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The route, relative to the controller's route.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The parameters.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterMetadata] {
        &self.parameters
    }

    /// The filters of this action.
    #[must_use]
    pub fn filters(&self) -> &[FilterRegistration] {
        &self.filters
    }

    /// The transformers of this action.
    #[must_use]
    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }

    pub(crate) fn invoke(
        &self,
        controller: DynSvc,
        arguments: ActionArguments,
        context: RequestContext,
    ) -> BoxFuture<'static, HandlerResult<ActionResult>> {
        (self.handler)(controller, arguments, context)
    }
}

impl Debug for ActionMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMetadata")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("route", &self.route)
            .field("parameters", &self.parameters)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// A controller: an injectable type rooted at a route, with the actions it
/// declares.
#[derive(Clone, Debug)]
pub struct ControllerMetadata {
    identifier: Identifier,
    route: String,
    definition: TypeDefinition,
    actions: Vec<Arc<ActionMetadata>>,
    filters: Vec<FilterRegistration>,
    transformers: Vec<Transformer>,
}

impl ControllerMetadata {
    /// Creates a controller rooted at `route`.
    #[must_use]
    pub fn new(route: impl Into<String>, definition: TypeDefinition) -> Self {
        ControllerMetadata {
            identifier: definition.service_info().into(),
            route: route.into(),
            definition,
            actions: Vec::new(),
            filters: Vec::new(),
            transformers: Vec::new(),
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, action: ActionMetadata) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    /// Adds a filter applied to every action of this controller.
    #[must_use]
    pub fn filter(mut self, filter: FilterRegistration) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds a transformer applied to every parameter of this controller's
    /// actions.
    #[must_use]
    pub fn transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// The identifier of the controller type.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The route the controller is rooted at.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// How to construct the controller.
    #[must_use]
    pub fn definition(&self) -> &TypeDefinition {
        &self.definition
    }

    /// The actions.
    #[must_use]
    pub fn actions(&self) -> &[Arc<ActionMetadata>] {
        &self.actions
    }

    /// The filters of this controller.
    #[must_use]
    pub fn filters(&self) -> &[FilterRegistration] {
        &self.filters
    }

    /// The transformers of this controller.
    #[must_use]
    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }
}

/// Controller metadata, keyed by controller identifier.
#[derive(Clone, Debug, Default)]
pub struct ControllerCatalog {
    controllers: Arc<RwLock<HashMap<Identifier, Arc<ControllerMetadata>>>>,
}

impl ControllerCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        ControllerCatalog::default()
    }

    /// Registers a controller. A later registration of the same controller
    /// replaces the earlier one.
    pub fn register(&self, metadata: ControllerMetadata) {
        let identifier = metadata.identifier.clone();
        let previous = self
            .controllers
            .write()
            .insert(identifier.clone(), Arc::new(metadata));
        if previous.is_some() {
            warn!(controller = %identifier, "replaced controller metadata");
        }
    }

    /// Gets a registered controller.
    pub fn get(&self, identifier: &Identifier) -> InjectResult<Arc<ControllerMetadata>> {
        self.controllers.read().get(identifier).cloned().ok_or_else(|| {
            InjectError::NotAController {
                identifier: identifier.clone(),
            }
        })
    }
}
