use crate::{Identifier, InjectError, InjectResult, ModuleMetadata, TypeDefinition};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

/// A registered module: the definition of its class and its metadata.
#[derive(Clone, Debug)]
pub struct ModuleEntry {
    identifier: Identifier,
    definition: TypeDefinition,
    metadata: ModuleMetadata,
}

impl ModuleEntry {
    /// The identifier of the module.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// How to construct the module class.
    #[must_use]
    pub fn definition(&self) -> &TypeDefinition {
        &self.definition
    }

    /// The declared shape of the module.
    #[must_use]
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    pub(crate) fn with_metadata(&self, metadata: ModuleMetadata) -> Self {
        ModuleEntry {
            identifier: self.identifier.clone(),
            definition: self.definition.clone(),
            metadata,
        }
    }
}

/// Module metadata, keyed by module identifier.
#[derive(Clone, Debug, Default)]
pub struct ModuleCatalog {
    entries: Arc<RwLock<HashMap<Identifier, ModuleEntry>>>,
}

impl ModuleCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        ModuleCatalog::default()
    }

    /// Registers a module. The definition describes the module class,
    /// including its constructor parameters and properties.
    pub fn register_metadata(
        &self,
        identifier: impl Into<Identifier>,
        definition: TypeDefinition,
        metadata: ModuleMetadata,
    ) {
        let identifier = identifier.into();
        let entry = ModuleEntry {
            identifier: identifier.clone(),
            definition,
            metadata,
        };
        if self.entries.write().insert(identifier.clone(), entry).is_some() {
            warn!(module = %identifier, "replaced module metadata");
        }
    }

    /// Registers a module under the type its class definition constructs.
    pub fn register(&self, definition: TypeDefinition, metadata: ModuleMetadata) {
        self.register_metadata(definition.service_info(), definition, metadata);
    }

    /// Gets a registered module.
    pub fn get_metadata(&self, identifier: &Identifier) -> InjectResult<ModuleEntry> {
        self.entries.read().get(identifier).cloned().ok_or_else(|| {
            InjectError::NotAModule {
                identifier: identifier.clone(),
            }
        })
    }

    /// Whether `identifier` is a registered module.
    #[must_use]
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.entries.read().contains_key(identifier)
    }
}
