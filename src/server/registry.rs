//! Registry of mounted resources and the routes they expose

use super::exposure::rest::resource_routes;
use crate::operation::Resource;
use axum::Router;
use indexmap::IndexMap;
use std::sync::Arc;

/// Normalize a mount path to its bare segment form (`/songs/` -> `songs`)
pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Registry for all resources mounted in the application
///
/// Keyed by mount path; one entity may be mounted under several paths with
/// different configuration contexts.
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: IndexMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            resources: IndexMap::new(),
        }
    }

    /// Register a resource under a mount path
    ///
    /// Mounting the same path twice replaces the earlier resource.
    pub fn register(&mut self, path: &str, resource: Resource) {
        let path = normalize_path(path);
        if self
            .resources
            .insert(path.clone(), Arc::new(resource))
            .is_some()
        {
            tracing::warn!(path = %path, "resource mount replaced");
        }
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Resource>> {
        self.resources.get(&normalize_path(path))
    }

    /// Mount paths in registration order
    pub fn paths(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Entities behind the mounts, deduplicated
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for resource in self.resources.values() {
            let name = resource.entity().name.as_str();
            if !types.contains(&name) {
                types.push(name);
            }
        }
        types
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Build a router with every mounted resource's routes
    pub fn build_routes(&self) -> Router {
        self.resources
            .iter()
            .fold(Router::new(), |router, (path, resource)| {
                router.merge(resource_routes(path, resource.clone()))
            })
    }
}
