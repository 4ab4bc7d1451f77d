use crate::{
    ControllerCatalog, Identifier, InjectError, InjectResult, ModuleCatalog,
    ScopeCatalog, TypeDefinition,
};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

/// Records which types are injectable, and how to construct them. Class
/// providers and controllers look their definitions up here.
#[derive(Clone, Debug, Default)]
pub struct InjectableCatalog {
    definitions: Arc<RwLock<HashMap<Identifier, TypeDefinition>>>,
}

impl InjectableCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        InjectableCatalog::default()
    }

    /// Declares a type injectable under `identifier`. A later declaration
    /// for the same identifier replaces the earlier one.
    pub fn register(
        &self,
        identifier: impl Into<Identifier>,
        definition: TypeDefinition,
    ) {
        let identifier = identifier.into();
        let previous = self
            .definitions
            .write()
            .insert(identifier.clone(), definition);
        if previous.is_some() {
            warn!(identifier = %identifier, "replaced injectable definition");
        }
    }

    /// Declares a type injectable under its own type.
    pub fn register_type(&self, definition: TypeDefinition) {
        self.register(definition.service_info(), definition);
    }

    /// Gets the definition of an injectable identifier.
    #[must_use]
    pub fn get(&self, identifier: &Identifier) -> Option<TypeDefinition> {
        self.definitions.read().get(identifier).cloned()
    }

    /// Gets the definition of an injectable identifier, failing if it was
    /// never declared.
    pub fn definition(
        &self,
        identifier: &Identifier,
    ) -> InjectResult<TypeDefinition> {
        self.get(identifier).ok_or_else(|| InjectError::NotRegistered {
            identifier: identifier.clone(),
        })
    }
}

/// The catalogs an application registers its metadata into before it is
/// bootstrapped. Every handle shares the same catalogs.
///
/// ```
/// use scoped_injector::{Identifier, Registry, Scope, TypeDefinition};
///
/// struct Mailer;
///
/// let registry = Registry::new();
/// registry.injectables().register_type(
///     TypeDefinition::new(|_| Ok(Mailer)).scope(Scope::Singleton),
/// );
///
/// assert!(registry
///     .injectables()
///     .get(&Identifier::of::<Mailer>())
///     .is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Registry {
    scopes: ScopeCatalog,
    injectables: InjectableCatalog,
    modules: ModuleCatalog,
    controllers: ControllerCatalog,
}

impl Registry {
    /// Creates a registry with empty catalogs.
    #[must_use]
    pub fn new() -> Self {
        Registry::default()
    }

    /// Declared scopes, per identifier.
    #[must_use]
    pub fn scopes(&self) -> &ScopeCatalog {
        &self.scopes
    }

    /// Injectable types.
    #[must_use]
    pub fn injectables(&self) -> &InjectableCatalog {
        &self.injectables
    }

    /// Module metadata.
    #[must_use]
    pub fn modules(&self) -> &ModuleCatalog {
        &self.modules
    }

    /// Controller metadata.
    #[must_use]
    pub fn controllers(&self) -> &ControllerCatalog {
        &self.controllers
    }
}
