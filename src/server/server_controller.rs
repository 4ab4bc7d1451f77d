use crate::{
    server::{
        bind_parameters, filter, middleware, ActionInvocation, ActionMetadata,
        ActionResult, ContentResult, ContextValue, ControllerCatalog,
        ControllerMetadata, ErrorHandler, FilterRegistration, HandlerResult,
        HttpContext, HttpException, Middleware, MiddlewareRegistration,
        RedirectResult, RequestContext, RequestError, RouteDefinition,
        RouteHandler, ServerOptions, ServerPlatform, StatusCodeResult,
    },
    Container, DependencyCache, DependencyResolver, Identifier, InjectError,
    InjectResult, ModuleRef, Scope, ValueDefinition, WeakContainer,
};
use futures_util::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::{
    fmt::{Debug, Formatter},
    sync::{Arc, Weak},
};
use tracing::{debug, error, info_span, trace, warn, Instrument};

/// Runs the request pipeline: middleware, controller resolution, lifecycle
/// hooks, parameter binding, filters, the action and the response.
///
/// Every request resolves its controller through a deep clone of the
/// declaring module's container, with fresh injection and request scopes
/// that end when the request completes, however it completes.
///
/// The server controller is registered in the platform container, so module
/// classes can depend on it to register middleware and filters.
#[derive(Clone)]
pub struct ServerController {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    platform: Arc<dyn ServerPlatform>,
    options: ServerOptions,
    container: WeakContainer,
    cache: DependencyCache,
    middleware: RwLock<Vec<MiddlewareRegistration>>,
    middleware_chain: OnceCell<Vec<Arc<dyn Middleware>>>,
    filters: RwLock<Vec<FilterRegistration>>,
    error_handler: RwLock<Option<Arc<dyn ErrorHandler>>>,
}

impl ServerController {
    pub(crate) fn new(
        platform: Arc<dyn ServerPlatform>,
        options: ServerOptions,
        container: &Container,
        cache: DependencyCache,
    ) -> Self {
        ServerController {
            inner: Arc::new(ServerInner {
                platform,
                options,
                container: container.downgrade(),
                cache,
                middleware: RwLock::default(),
                middleware_chain: OnceCell::new(),
                filters: RwLock::default(),
                error_handler: RwLock::default(),
            }),
        }
    }

    /// The platform serving requests.
    #[must_use]
    pub fn platform(&self) -> &Arc<dyn ServerPlatform> {
        &self.inner.platform
    }

    /// The pipeline configuration.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Appends a middleware. Middleware registered after the first request
    /// was handled is ignored.
    pub fn register_middleware(&self, middleware: MiddlewareRegistration) {
        if self.inner.middleware_chain.get().is_some() {
            warn!(?middleware, "middleware registered after the first request is ignored");
        }
        self.inner.middleware.write().push(middleware);
    }

    /// Adds a filter applied to every action.
    pub fn register_filter(&self, filter: FilterRegistration) {
        self.inner.filters.write().push(filter);
    }

    /// Sets the error handler offered every request error first.
    pub fn set_error_handler<H: ErrorHandler + 'static>(&self, handler: H) {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    /// Registers a route for every action of every controller of `root` and
    /// the modules it imports. Nothing is registered unless every controller
    /// has metadata.
    pub(crate) fn register_routes(
        &self,
        root: &ModuleRef,
        catalog: &ControllerCatalog,
    ) -> InjectResult<()> {
        let mut routes = Vec::new();
        for module in root.modules() {
            for identifier in module.controllers() {
                let controller = catalog.get(identifier)?;
                for action in controller.actions() {
                    let route = self.inner.options.route(controller.route(), action.route());
                    let handler = self.route_handler(
                        controller.clone(),
                        action.clone(),
                        module.container(),
                        route.clone(),
                    );
                    routes.push((
                        RouteDefinition {
                            method: action.method(),
                            route,
                            controller: controller.clone(),
                            action: action.clone(),
                        },
                        handler,
                    ));
                }
            }
        }

        for (route, handler) in routes {
            debug!(
                method = %route.method,
                route = %route.route,
                controller = %route.controller.identifier(),
                action = route.action.name(),
                "registered route"
            );
            self.inner.platform.add_route_handler(route, handler);
        }
        Ok(())
    }

    /// Registers the middleware chain with the platform.
    pub(crate) fn install_middleware(&self) {
        let server = Arc::downgrade(&self.inner);
        self.inner
            .platform
            .add_middleware_handler(Arc::new(move |http: HttpContext| {
                let server = upgrade(&server);
                async move {
                    match server {
                        Some(server) => server.run_middleware(http).await,
                        None => false,
                    }
                }
                .boxed()
            }));
    }

    fn route_handler(
        &self,
        controller: Arc<ControllerMetadata>,
        action: Arc<ActionMetadata>,
        module: &Container,
        route: String,
    ) -> RouteHandler {
        let server = Arc::downgrade(&self.inner);
        let module = module.downgrade();
        Arc::new(move |http: HttpContext| {
            let span = info_span!(
                "request",
                method = %action.method(),
                route = %route,
            );
            let server = upgrade(&server);
            let module = module.upgrade();
            let controller = controller.clone();
            let action = action.clone();
            async move {
                if let (Some(server), Some(module)) = (server, module) {
                    server.handle_request(controller, action, module, http).await;
                }
            }
            .instrument(span)
            .boxed()
        })
    }

    async fn run_middleware(&self, http: HttpContext) -> bool {
        let context = RequestContext::new(self.inner.platform.clone(), http);
        let chain = match self.middleware_chain() {
            Ok(chain) => chain,
            Err(error) => {
                self.handle_error(error.into(), &context).await;
                return false;
            }
        };
        if chain.is_empty() {
            return true;
        }

        match middleware::run_chain(&chain, &context).await {
            Ok(reached) => reached,
            Err(error) => {
                self.handle_error(error, &context).await;
                false
            }
        }
    }

    fn middleware_chain(&self) -> InjectResult<Vec<Arc<dyn Middleware>>> {
        self.inner
            .middleware_chain
            .get_or_try_init(|| {
                let container = self.container()?;
                let resolver = DependencyResolver::with_cache(
                    container,
                    self.inner.cache.clone(),
                );
                let registrations = self.inner.middleware.read().clone();
                trace!(count = registrations.len(), "resolving middleware");
                registrations
                    .iter()
                    .map(|registration| registration.resolve(&resolver))
                    .collect()
            })
            .map(Clone::clone)
    }

    fn container(&self) -> InjectResult<Container> {
        self.inner.container.upgrade().ok_or_else(|| {
            InjectError::InternalError(String::from(
                "the platform container was dropped",
            ))
        })
    }

    /// Handles a request routed to `action`.
    pub(crate) async fn handle_request(
        &self,
        controller: Arc<ControllerMetadata>,
        action: Arc<ActionMetadata>,
        module: Container,
        http: HttpContext,
    ) {
        let context = RequestContext::new(self.inner.platform.clone(), http);
        let scope = RequestScope::open(&self.inner.cache);

        let outcome = match self
            .execute(&controller, &action, &module, &scope.cache, &context)
            .await
        {
            Ok(result) => self.materialize(result, &context),
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            self.handle_error(error, &context).await;
        }

        drop(scope);
    }

    async fn execute(
        &self,
        controller: &Arc<ControllerMetadata>,
        action: &Arc<ActionMetadata>,
        module: &Container,
        cache: &DependencyCache,
        context: &RequestContext,
    ) -> HandlerResult<ActionResult> {
        let cloned = module.deep_clone();
        for container in cloned.containers() {
            container.register(
                Identifier::of::<RequestContext>(),
                ValueDefinition::new(context.clone()).scope(Scope::Request),
            )?;
        }

        let resolver =
            DependencyResolver::with_cache(cloned.root().clone(), cache.clone());
        let instance = resolver
            .resolve_dyn_async(controller.identifier())
            .await?;
        trace!(controller = %controller.identifier(), "resolved controller");

        run_hooks(cache, context, Hook::Start).await?;
        let arguments = bind_parameters(controller, action, context)?;
        let filters = self.filters(controller, action, &resolver)?;

        let invocation = ActionInvocation {
            context: context.clone(),
            controller: instance,
            controller_metadata: controller.clone(),
            action: action.clone(),
            arguments,
            resolver,
        };
        let result = filter::run_chain(&filters, &invocation).await?;

        run_hooks(cache, context, Hook::End).await?;
        Ok(result)
    }

    fn filters(
        &self,
        controller: &ControllerMetadata,
        action: &ActionMetadata,
        resolver: &DependencyResolver,
    ) -> InjectResult<Vec<Arc<dyn crate::server::Filter>>> {
        let mut registrations = self.inner.filters.read().clone();
        registrations.extend(controller.filters().iter().cloned());
        registrations.extend(action.filters().iter().cloned());
        registrations.sort_by_key(FilterRegistration::priority);

        registrations
            .iter()
            .map(|registration| registration.resolve(resolver))
            .collect()
    }

    fn materialize(
        &self,
        result: ActionResult,
        context: &RequestContext,
    ) -> HandlerResult<()> {
        match result {
            ActionResult::Value(value) => context.set_body(value),
            ActionResult::Status(StatusCodeResult { status }) => {
                context.set_status(status)
            }
            ActionResult::Redirect(RedirectResult { location, status }) => {
                let status =
                    status.unwrap_or(self.inner.options.default_redirect_status);
                context.set_status(status)?;
                context.set_header("Location", location)
            }
            ActionResult::Content(ContentResult {
                status,
                content,
                content_type,
            }) => {
                context.set_status(status)?;
                if let Some(content_type) = content_type {
                    context.set_header("Content-Type", content_type)?;
                }
                context.set_body(content)
            }
        }
    }

    async fn handle_error(&self, error: RequestError, context: &RequestContext) {
        let handler = self.inner.error_handler.read().clone();
        if let Some(handler) = handler {
            if handler.handle(&error, context).await {
                debug!(error = %error, "request error handled");
                return;
            }
        }

        let written = match &error {
            RequestError::Http(exception) => {
                debug!(
                    status = exception.error_code(),
                    message = exception.message(),
                    "request failed"
                );
                write_exception(exception, context)
            }
            _ => {
                error!(error = %error, "request failed");
                let body = if self.inner.options.expose_error_details {
                    format!("Internal Server Error: {}", error)
                } else {
                    String::from("Internal Server Error")
                };
                context
                    .set_status(500)
                    .and_then(|_| context.set_header("Content-Type", "text/plain"))
                    .and_then(|_| context.set_body(body))
            }
        };

        if let Err(write_error) = written {
            error!(error = %write_error, "failed to write the error response");
        }
    }
}

impl Debug for ServerController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerController")
            .field("options", &self.inner.options)
            .field("middleware", &self.inner.middleware.read().len())
            .field("filters", &self.inner.filters.read().len())
            .finish_non_exhaustive()
    }
}

fn upgrade(server: &Weak<ServerInner>) -> Option<ServerController> {
    server.upgrade().map(|inner| ServerController { inner })
}

fn write_exception(
    exception: &HttpException,
    context: &RequestContext,
) -> HandlerResult<()> {
    let body = exception.to_json().map_err(RequestError::application)?;
    context.set_status(exception.error_code())?;
    context.set_header("Content-Type", "application/json")?;
    context.set_body(ContextValue::text(body))
}

/// The injection and request scopes of one request. Dropping it ends both.
struct RequestScope {
    cache: DependencyCache,
}

impl RequestScope {
    fn open(parent: &DependencyCache) -> Self {
        let cache = parent.child();
        cache.begin_scope(Scope::Injection);
        cache.begin_scope(Scope::Request);
        RequestScope { cache }
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.cache.end_scope(&Scope::Request);
        self.cache.end_scope(&Scope::Injection);
    }
}

#[derive(Clone, Copy)]
enum Hook {
    Start,
    End,
}

async fn run_hooks(
    cache: &DependencyCache,
    context: &RequestContext,
    hook: Hook,
) -> HandlerResult<()> {
    let hooks: Vec<_> = cache
        .instances()
        .into_iter()
        .filter_map(|instance| instance.lifecycle().cloned())
        .collect();
    for lifecycle in hooks {
        match hook {
            Hook::Start => lifecycle.on_request_start(context).await?,
            Hook::End => lifecycle.on_request_end(context).await?,
        }
    }
    Ok(())
}
