use crate::{
    server::{ServerController, ServerOptions, ServerPlatform},
    Container, DependencyCache, DependencyResolver, Identifier, InjectError,
    InjectResult, ModuleRef, Registry, Scope, Service, Svc, ValueDefinition,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{info, warn};

/// An application: a registry of injectables, modules and controllers served
/// through a [`ServerPlatform`].
///
/// The platform container is the parent of every module container. It
/// provides the [`ServerController`], the [`ServerOptions`] and the
/// [`Registry`], so module classes can depend on them.
pub struct Platform {
    registry: Registry,
    container: Container,
    cache: DependencyCache,
    server: ServerController,
    root: OnceCell<ModuleRef>,
}

impl Platform {
    /// Creates a platform serving through `adapter`.
    pub fn new(
        adapter: Arc<dyn ServerPlatform>,
        registry: Registry,
        options: ServerOptions,
    ) -> InjectResult<Self> {
        let container =
            Container::with_catalog("platform", registry.scopes().clone());
        let cache = DependencyCache::new();
        cache.begin_scope(Scope::Singleton);

        let server =
            ServerController::new(adapter, options.clone(), &container, cache.clone());
        container.register(
            Identifier::of::<ServerController>(),
            ValueDefinition::new(server.clone()).scope(Scope::Singleton),
        )?;
        container.register(
            Identifier::of::<ServerOptions>(),
            ValueDefinition::new(options).scope(Scope::Singleton),
        )?;
        container.register(
            Identifier::of::<Registry>(),
            ValueDefinition::new(registry.clone()).scope(Scope::Singleton),
        )?;

        Ok(Platform {
            registry,
            container,
            cache,
            server,
            root: OnceCell::new(),
        })
    }

    /// Composes the root module and every module it imports, then registers
    /// their routes and the middleware chain with the platform.
    ///
    /// A platform is bootstrapped once. Later calls return the root module
    /// composed by the first. A failed bootstrap registers nothing with the
    /// platform and may be retried.
    pub fn bootstrap(&self, module: impl Into<Identifier>) -> InjectResult<ModuleRef> {
        let module = module.into();
        if let Some(root) = self.bootstrapped(&module) {
            return Ok(root);
        }

        let root = ModuleRef::create(
            &self.registry,
            &module,
            &self.container,
            &self.cache,
        )?;
        self.install(&module, root)
    }

    /// Bootstraps the platform like [`bootstrap`](Platform::bootstrap),
    /// awaiting asynchronous factories and module classes along the way.
    pub async fn bootstrap_async(
        &self,
        module: impl Into<Identifier>,
    ) -> InjectResult<ModuleRef> {
        let module = module.into();
        if let Some(root) = self.bootstrapped(&module) {
            return Ok(root);
        }

        let root = ModuleRef::create_async(
            &self.registry,
            &module,
            &self.container,
            &self.cache,
        )
        .await?;
        self.install(&module, root)
    }

    fn bootstrapped(&self, module: &Identifier) -> Option<ModuleRef> {
        let root = self.root.get()?;
        warn!(module = %module, "platform is already bootstrapped");
        Some(root.clone())
    }

    fn install(&self, module: &Identifier, root: ModuleRef) -> InjectResult<ModuleRef> {
        self.server
            .register_routes(&root, self.registry.controllers())?;
        self.server.install_middleware();
        info!(module = %module, modules = root.modules().len(), "platform bootstrapped");

        Ok(self.root.get_or_init(|| root).clone())
    }

    /// The root module.
    pub fn module(&self) -> InjectResult<&ModuleRef> {
        self.root.get().ok_or(InjectError::NotBootstrapped)
    }

    /// The root module's container.
    pub fn container(&self) -> InjectResult<&Container> {
        self.module().map(ModuleRef::container)
    }

    /// Resolves a service from the root module's container.
    pub fn resolve<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Svc<T>> {
        self.resolver()?.resolve(identifier)
    }

    /// Resolves a service from the root module's container, awaiting
    /// asynchronous factories along the way.
    pub async fn resolve_async<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Svc<T>> {
        self.resolver()?.resolve_async(identifier).await
    }

    fn resolver(&self) -> InjectResult<DependencyResolver> {
        let module = self.module()?;
        Ok(DependencyResolver::with_cache(
            module.container().clone(),
            self.cache.clone(),
        ))
    }

    /// The container every module container descends from.
    #[must_use]
    pub fn platform_container(&self) -> &Container {
        &self.container
    }

    /// The registry the platform was created with.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The server controller.
    #[must_use]
    pub fn server(&self) -> &ServerController {
        &self.server
    }

    /// Ends the singleton scope. Services resolved afterwards are constructed
    /// without caching.
    pub fn shutdown(&self) {
        self.cache.end_scope(&Scope::Singleton);
        info!("platform shut down");
    }
}
