//! Server host for transport-agnostic API exposure
//!
//! The host owns the store, the merged configuration and every mounted
//! resource. Exposures turn it into protocol-specific routers.

use super::registry::ResourceRegistry;
use crate::config::ConfigStack;
use crate::core::store::EntityStore;
use std::sync::Arc;

/// Host context containing all framework state
///
/// # Example
///
/// ```rust,ignore
/// let host = ServerHost::new(store, config, resources);
/// let rest_app = RestExposure::build_router(Arc::new(host), vec![])?;
/// ```
pub struct ServerHost {
    /// Merged configuration hierarchy
    pub config: Arc<ConfigStack>,

    /// Store shared by every resource
    pub store: Arc<dyn EntityStore>,

    /// Mounted resources keyed by path
    pub resources: ResourceRegistry,
}

impl ServerHost {
    pub fn new(store: Arc<dyn EntityStore>, config: ConfigStack, resources: ResourceRegistry) -> Self {
        Self {
            config: Arc::new(config),
            store,
            resources,
        }
    }

    /// Mount paths registered in the host
    pub fn paths(&self) -> Vec<&str> {
        self.resources.paths()
    }

    /// Entities exposed through at least one mount
    pub fn entity_types(&self) -> Vec<&str> {
        self.resources.entity_types()
    }

    /// Check if the host exposes anything
    pub fn is_ready(&self) -> bool {
        !self.resources.is_empty()
    }
}
