use crate::{
    definition::downcast, Container, DependencyCache, DependencyResolver,
    DynSvc, Identifier, InjectError, InjectResult, ModuleEntry, ModuleImport,
    Registry, Service, Svc,
};
use futures_util::{future::BoxFuture, FutureExt};
use std::{
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter},
    sync::Arc,
};
use tracing::debug;

/// A composed module: its container, its instantiated class and the modules
/// it imports.
///
/// An identifier provided by a module is visible to the modules importing it
/// only if the module exports it, or if it is one of the module's
/// controllers. Everything else stays invisible outside the module.
///
/// ```
/// use scoped_injector::{
///     define_module, Container, DependencyCache, Identifier, InjectError,
///     ModuleRef, Provider, Registry, Scope, TypeDefinition,
/// };
///
/// struct DatabaseModule;
/// struct AppModule;
///
/// let registry = Registry::new();
/// registry.modules().register(
///     TypeDefinition::new(|_| Ok(DatabaseModule)),
///     define_module! {
///         providers = [
///             Provider::value("db.url", "postgres://localhost"),
///             Provider::value("db.password", "hunter2"),
///         ],
///         exports = [Identifier::token("db.url")],
///     },
/// );
/// registry.modules().register(
///     TypeDefinition::new(|_| Ok(AppModule)),
///     define_module! {
///         imports = [Identifier::of::<DatabaseModule>()],
///     },
/// );
///
/// let cache = DependencyCache::new();
/// cache.begin_scope(Scope::Singleton);
/// let app = ModuleRef::create(
///     &registry,
///     &Identifier::of::<AppModule>(),
///     &Container::new("platform"),
///     &cache,
/// )
/// .unwrap();
///
/// assert_eq!(
///     "postgres://localhost",
///     *app.resolve::<&str>("db.url").unwrap()
/// );
/// assert!(matches!(
///     app.resolve::<&str>("db.password"),
///     Err(InjectError::NotRegistered { .. })
/// ));
/// ```
#[derive(Clone)]
pub struct ModuleRef {
    inner: Arc<ModuleRefInner>,
}

struct ModuleRefInner {
    identifier: Identifier,
    container: Container,
    cache: DependencyCache,
    instance: DynSvc,
    imports: Vec<ModuleRef>,
    exports: Vec<Identifier>,
    controllers: Vec<Identifier>,
}

impl ModuleRef {
    /// Composes a registered module and, first, every module it imports.
    /// Each module gets its own child container of `parent`.
    ///
    /// Fails with [`InjectError::AsyncRequired`] if a module class or one of
    /// its dependencies needs an asynchronous factory. Use
    /// [`create_async`](ModuleRef::create_async) for those.
    pub fn create(
        registry: &Registry,
        module: &Identifier,
        parent: &Container,
        cache: &DependencyCache,
    ) -> InjectResult<ModuleRef> {
        let entry = registry.modules().get_metadata(module)?;
        ModuleRef::create_from_entry(registry, entry, parent, cache)
    }

    /// Composes a module from its entry.
    pub fn create_from_entry(
        registry: &Registry,
        entry: ModuleEntry,
        parent: &Container,
        cache: &DependencyCache,
    ) -> InjectResult<ModuleRef> {
        let identifier = entry.identifier().clone();
        ModuleRef::create_from_entry_async(registry, entry, parent, cache)
            .now_or_never()
            .unwrap_or(Err(InjectError::AsyncRequired { identifier }))
    }

    /// Composes a registered module like [`create`](ModuleRef::create),
    /// awaiting asynchronous factories and module classes along the way.
    pub async fn create_async(
        registry: &Registry,
        module: &Identifier,
        parent: &Container,
        cache: &DependencyCache,
    ) -> InjectResult<ModuleRef> {
        let entry = registry.modules().get_metadata(module)?;
        ModuleRef::create_from_entry_async(registry, entry, parent, cache).await
    }

    /// Composes a module from its entry, awaiting asynchronous factories and
    /// module classes along the way.
    pub async fn create_from_entry_async(
        registry: &Registry,
        entry: ModuleEntry,
        parent: &Container,
        cache: &DependencyCache,
    ) -> InjectResult<ModuleRef> {
        let mut composer = ModuleComposer {
            registry,
            parent,
            cache,
            composed: HashMap::new(),
            stack: Vec::new(),
        };
        composer.compose(entry, true).await
    }

    /// The identifier of the module.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.inner.identifier
    }

    /// The container holding the module's providers and imports.
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// The cache the module was composed with.
    #[must_use]
    pub fn cache(&self) -> &DependencyCache {
        &self.inner.cache
    }

    /// The instantiated module class.
    #[must_use]
    pub fn instance(&self) -> &DynSvc {
        &self.inner.instance
    }

    /// The instantiated module class as a `T`.
    pub fn instance_as<T: Service>(&self) -> InjectResult<Svc<T>> {
        downcast(&self.inner.identifier, self.inner.instance.clone())
    }

    /// The modules this module imports.
    #[must_use]
    pub fn imports(&self) -> &[ModuleRef] {
        &self.inner.imports
    }

    /// The identifiers visible to modules importing this one, excluding
    /// controllers. Exporting an imported module exports what that module
    /// exports.
    #[must_use]
    pub fn exports(&self) -> &[Identifier] {
        &self.inner.exports
    }

    /// The controllers declared by this module.
    #[must_use]
    pub fn controllers(&self) -> &[Identifier] {
        &self.inner.controllers
    }

    /// A resolver over this module's container.
    #[must_use]
    pub fn resolver(&self) -> DependencyResolver {
        DependencyResolver::with_cache(
            self.inner.container.clone(),
            self.inner.cache.clone(),
        )
    }

    /// Resolves `identifier` through this module's container.
    pub fn resolve<T: Service>(
        &self,
        identifier: impl Into<Identifier>,
    ) -> InjectResult<Svc<T>> {
        self.resolver().resolve(identifier)
    }

    /// This module and every module it imports, transitively, each listed
    /// once.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleRef> {
        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(module) = pending.pop() {
            if seen.insert(Arc::as_ptr(&module.inner) as usize) {
                pending.extend(module.imports().iter().rev().cloned());
                modules.push(module);
            }
        }
        modules
    }
}

impl Debug for ModuleRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("identifier", &self.inner.identifier)
            .field("container", &self.inner.container)
            .field(
                "imports",
                &self
                    .inner
                    .imports
                    .iter()
                    .map(ModuleRef::identifier)
                    .collect::<Vec<_>>(),
            )
            .field("exports", &self.inner.exports)
            .field("controllers", &self.inner.controllers)
            .finish()
    }
}

struct ModuleComposer<'a> {
    registry: &'a Registry,
    parent: &'a Container,
    cache: &'a DependencyCache,
    composed: HashMap<Identifier, ModuleRef>,
    stack: Vec<Identifier>,
}

impl ModuleComposer<'_> {
    fn compose(
        &mut self,
        entry: ModuleEntry,
        shared: bool,
    ) -> BoxFuture<'_, InjectResult<ModuleRef>> {
        async move { self.compose_entry(entry, shared).await }.boxed()
    }

    async fn compose_entry(
        &mut self,
        entry: ModuleEntry,
        shared: bool,
    ) -> InjectResult<ModuleRef> {
        let identifier = entry.identifier().clone();
        if shared {
            if let Some(existing) = self.composed.get(&identifier) {
                return Ok(existing.clone());
            }
        }

        if let Some(position) = self.stack.iter().position(|m| *m == identifier) {
            let mut cycle = self.stack[position..].to_vec();
            cycle.push(identifier);
            return Err(InjectError::CircularDependency { cycle });
        }

        self.stack.push(identifier.clone());
        let module = self.build(entry).await;
        self.stack.pop();

        let module = module?;
        if shared {
            self.composed.insert(identifier, module.clone());
        }
        Ok(module)
    }

    async fn build(&mut self, entry: ModuleEntry) -> InjectResult<ModuleRef> {
        let identifier = entry.identifier().clone();
        let metadata = entry.metadata();
        let container = self.parent.create_child(identifier.name());

        let mut imports = Vec::with_capacity(metadata.imports().len());
        for import in metadata.imports() {
            let base = self.registry.modules().get_metadata(import.module())?;
            let module = match import {
                ModuleImport::Static(_) => self.compose(base, true).await?,
                ModuleImport::Dynamic(dynamic) => {
                    let merged = base.with_metadata(base.metadata().merged(dynamic));
                    self.compose(merged, false).await?
                }
            };
            imports.push(module);
        }

        for provider in metadata.providers() {
            provider.register(&container, self.registry.injectables())?;
        }

        for imported in &imports {
            for visible in imported.exports().iter().chain(imported.controllers()) {
                container.import(visible.clone(), imported.container())?;
            }
        }

        for controller in metadata.controllers() {
            let controller_metadata = self.registry.controllers().get(controller)?;
            container
                .register(controller.clone(), controller_metadata.definition().clone())?;
        }

        container.register(identifier.clone(), entry.definition().clone())?;
        let resolver =
            DependencyResolver::with_cache(container.clone(), self.cache.clone());
        let instance = resolver.resolve_dyn_async(&identifier).await?;

        let mut exports = Vec::with_capacity(metadata.exports().len());
        for export in metadata.exports() {
            match imports.iter().find(|module| module.identifier() == export) {
                Some(imported) => exports.extend(imported.exports().iter().cloned()),
                None => exports.push(export.clone()),
            }
        }

        debug!(
            module = %identifier,
            imports = imports.len(),
            exports = exports.len(),
            controllers = metadata.controllers().len(),
            "composed module"
        );
        Ok(ModuleRef {
            inner: Arc::new(ModuleRefInner {
                identifier,
                container,
                cache: self.cache.clone(),
                instance,
                imports,
                exports,
                controllers: metadata.controllers().to_vec(),
            }),
        })
    }
}
