use crate::{
    Container, FactoryDefinition, Identifier, InjectResult, InjectableCatalog,
    Scope, Service, TypeDefinition, ValueDefinition,
};

/// The declarative shape of a module: the modules it imports, the providers
/// it registers, its controllers and the identifiers it exports.
#[derive(Clone, Debug, Default)]
pub struct ModuleMetadata {
    imports: Vec<ModuleImport>,
    providers: Vec<Provider>,
    controllers: Vec<Identifier>,
    exports: Vec<Identifier>,
}

impl ModuleMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        ModuleMetadata::default()
    }

    /// Appends an imported module.
    #[must_use]
    pub fn import(mut self, import: impl Into<ModuleImport>) -> Self {
        self.imports.push(import.into());
        self
    }

    /// Appends a provider.
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Appends a controller.
    #[must_use]
    pub fn controller(mut self, controller: impl Into<Identifier>) -> Self {
        self.controllers.push(controller.into());
        self
    }

    /// Appends an exported identifier.
    #[must_use]
    pub fn export(mut self, export: impl Into<Identifier>) -> Self {
        self.exports.push(export.into());
        self
    }

    /// The imported modules.
    #[must_use]
    pub fn imports(&self) -> &[ModuleImport] {
        &self.imports
    }

    /// The providers.
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// The controllers.
    #[must_use]
    pub fn controllers(&self) -> &[Identifier] {
        &self.controllers
    }

    /// The exported identifiers.
    #[must_use]
    pub fn exports(&self) -> &[Identifier] {
        &self.exports
    }

    /// Merges the additions of a dynamic module onto this metadata.
    #[must_use]
    pub fn merged(&self, dynamic: &DynamicModule) -> ModuleMetadata {
        let mut merged = self.clone();
        merged.imports.extend(dynamic.imports.iter().cloned());
        merged.providers.extend(dynamic.providers.iter().cloned());
        merged.exports.extend(dynamic.exports.iter().cloned());
        merged
    }
}

/// A module imported by another module.
#[derive(Clone, Debug)]
pub enum ModuleImport {
    /// A registered module. Within one composition, every static import of
    /// the same module shares one instance.
    Static(Identifier),
    /// A registered module with extra imports, providers and exports. Every
    /// dynamic import creates a new instance.
    Dynamic(DynamicModule),
}

impl ModuleImport {
    /// The identifier of the imported module.
    #[must_use]
    pub fn module(&self) -> &Identifier {
        match self {
            ModuleImport::Static(module) => module,
            ModuleImport::Dynamic(dynamic) => &dynamic.module,
        }
    }
}

impl From<Identifier> for ModuleImport {
    fn from(module: Identifier) -> Self {
        ModuleImport::Static(module)
    }
}

impl From<DynamicModule> for ModuleImport {
    fn from(dynamic: DynamicModule) -> Self {
        ModuleImport::Dynamic(dynamic)
    }
}

/// A runtime-parameterized variant of a registered module.
///
/// ```
/// use scoped_injector::{DynamicModule, Identifier, ModuleMetadata, Provider};
///
/// struct ConfigModule;
///
/// let base = ModuleMetadata::new().export("config.path");
/// let dynamic = DynamicModule::new(Identifier::of::<ConfigModule>())
///     .provider(Provider::value("config.path", "/etc/app.toml"))
///     .export("config.env");
///
/// let merged = base.merged(&dynamic);
/// assert_eq!(1, merged.providers().len());
/// assert_eq!(2, merged.exports().len());
/// ```
#[derive(Clone, Debug)]
pub struct DynamicModule {
    module: Identifier,
    imports: Vec<ModuleImport>,
    providers: Vec<Provider>,
    exports: Vec<Identifier>,
}

impl DynamicModule {
    /// Creates a variant of a registered module without additions.
    #[must_use]
    pub fn new(module: impl Into<Identifier>) -> Self {
        DynamicModule {
            module: module.into(),
            imports: Vec::new(),
            providers: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Adds an import.
    #[must_use]
    pub fn import(mut self, import: impl Into<ModuleImport>) -> Self {
        self.imports.push(import.into());
        self
    }

    /// Adds a provider.
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adds an export.
    #[must_use]
    pub fn export(mut self, export: impl Into<Identifier>) -> Self {
        self.exports.push(export.into());
        self
    }

    /// The identifier of the base module.
    #[must_use]
    pub fn module(&self) -> &Identifier {
        &self.module
    }
}

/// Registers one identifier in a module's container.
#[derive(Clone, Debug)]
pub enum Provider {
    /// A type with an explicit definition.
    Constructor {
        /// The provided identifier.
        provide: Identifier,
        /// How to construct the type.
        definition: TypeDefinition,
    },
    /// An injectable type, constructed from its declaration in the
    /// [`InjectableCatalog`]. If `provide` differs from `class`, `provide`
    /// becomes an alias of `class`.
    Class {
        /// The provided identifier.
        provide: Identifier,
        /// The injectable type.
        class: Identifier,
        /// Replaces the declared scope of the class.
        scope: Option<Scope>,
    },
    /// A factory.
    Factory {
        /// The provided identifier.
        provide: Identifier,
        /// The factory.
        definition: FactoryDefinition,
    },
    /// A precomputed value.
    Value {
        /// The provided identifier.
        provide: Identifier,
        /// The value.
        definition: ValueDefinition,
    },
}

impl Provider {
    /// Provides a type under its own identifier.
    #[must_use]
    pub fn constructor(definition: TypeDefinition) -> Self {
        Provider::Constructor {
            provide: definition.service_info().into(),
            definition,
        }
    }

    /// Provides a type under another identifier.
    #[must_use]
    pub fn constructor_for(
        provide: impl Into<Identifier>,
        definition: TypeDefinition,
    ) -> Self {
        Provider::Constructor {
            provide: provide.into(),
            definition,
        }
    }

    /// Provides an injectable type under its own identifier.
    #[must_use]
    pub fn class<T: Service>() -> Self {
        Provider::class_as(Identifier::of::<T>(), Identifier::of::<T>())
    }

    /// Provides an injectable type under another identifier.
    #[must_use]
    pub fn class_as(
        provide: impl Into<Identifier>,
        class: impl Into<Identifier>,
    ) -> Self {
        Provider::Class {
            provide: provide.into(),
            class: class.into(),
            scope: None,
        }
    }

    /// Provides the result of a factory.
    #[must_use]
    pub fn factory(
        provide: impl Into<Identifier>,
        definition: FactoryDefinition,
    ) -> Self {
        Provider::Factory {
            provide: provide.into(),
            definition,
        }
    }

    /// Provides a value.
    #[must_use]
    pub fn value<T: Service>(provide: impl Into<Identifier>, value: T) -> Self {
        Provider::Value {
            provide: provide.into(),
            definition: ValueDefinition::new(value),
        }
    }

    /// Declares the scope of the provided identifier.
    #[must_use]
    pub fn scoped(self, scope: Scope) -> Self {
        match self {
            Provider::Constructor {
                provide,
                definition,
            } => Provider::Constructor {
                provide,
                definition: definition.scope(scope),
            },
            Provider::Class { provide, class, .. } => Provider::Class {
                provide,
                class,
                scope: Some(scope),
            },
            Provider::Factory {
                provide,
                definition,
            } => Provider::Factory {
                provide,
                definition: definition.scope(scope),
            },
            Provider::Value {
                provide,
                definition,
            } => Provider::Value {
                provide,
                definition: definition.scope(scope),
            },
        }
    }

    /// The provided identifier.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        match self {
            Provider::Constructor { provide, .. }
            | Provider::Class { provide, .. }
            | Provider::Factory { provide, .. }
            | Provider::Value { provide, .. } => provide,
        }
    }

    pub(crate) fn register(
        &self,
        container: &Container,
        injectables: &InjectableCatalog,
    ) -> InjectResult<()> {
        match self {
            Provider::Constructor {
                provide,
                definition,
            } => container.register(provide.clone(), definition.clone()),
            Provider::Class {
                provide,
                class,
                scope,
            } => {
                if !container.has_definition(class) {
                    let mut definition = injectables.definition(class)?;
                    if let Some(scope) = scope {
                        definition = definition.scope(scope.clone());
                    }
                    container.register(class.clone(), definition)?;
                }

                if provide == class {
                    Ok(())
                } else {
                    container.register_alias(class.clone(), provide.clone())
                }
            }
            Provider::Factory {
                provide,
                definition,
            } => container.register(provide.clone(), definition.clone()),
            Provider::Value {
                provide,
                definition,
            } => container.register(provide.clone(), definition.clone()),
        }
    }
}
