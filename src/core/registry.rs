//! Registry of entity metadata shared by stores and resources

use crate::core::entity::EntityDescriptor;
use crate::core::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry for all entities a store holds
///
/// Entity names are the keys; registering the same name twice replaces the
/// earlier descriptor.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) {
        self.entities
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn with(mut self, descriptor: EntityDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    /// Look up an entity that must exist
    pub fn require(&self, name: &str) -> Result<&Arc<EntityDescriptor>, ConfigError> {
        self.entities.get(name).ok_or_else(|| ConfigError::UnknownEntity {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Get all registered entity names
    pub fn entity_types(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }
}
