//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::RestExposure;
use super::host::ServerHost;
use super::registry::ResourceRegistry;
use crate::config::{ConfigLayer, ConfigStack, OperationKind};
use crate::core::store::EntityStore;
use crate::operation::Resource;
use anyhow::Result;
use axum::Router;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// One entity exposed under one path
///
/// ```ignore
/// Mount::new("public/songs", "song")
///     .context("public")
///     .with_override(OperationKind::Create, ConfigLayer::new().pre(vec![owner_hook]));
/// ```
#[derive(Debug, Clone)]
pub struct Mount {
    pub path: String,
    pub entity: String,
    /// Named configuration context applied after entity defaults
    pub context: Option<String>,
    /// Per-operation layers applied last
    pub overrides: HashMap<OperationKind, ConfigLayer>,
}

impl Mount {
    pub fn new(path: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entity: entity.into(),
            context: None,
            overrides: HashMap::new(),
        }
    }

    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context = Some(name.into());
        self
    }

    /// Merge a layer into one operation's overrides
    pub fn with_override(mut self, kind: OperationKind, layer: ConfigLayer) -> Self {
        self.overrides.entry(kind).or_default().merge(&layer);
        self
    }

    /// Merge a layer into every operation's overrides
    pub fn with_overrides(mut self, layer: ConfigLayer) -> Self {
        for kind in OperationKind::ALL {
            self.overrides.entry(kind).or_default().merge(&layer);
        }
        self
    }
}

/// Builder for creating HTTP servers exposing mounted resources
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_store(InMemoryStore::new(registry))
///     .with_config_file("resources.yaml")?
///     .mount("songs", "song")
///     .build()?;
/// ```
pub struct ServerBuilder {
    store: Option<Arc<dyn EntityStore>>,
    configs: Vec<ConfigStack>,
    mounts: Vec<Mount>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            store: None,
            configs: Vec::new(),
            mounts: Vec::new(),
            custom_routes: Vec::new(),
        }
    }

    /// Set the entity store (required)
    pub fn with_store(mut self, store: impl EntityStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set an already shared entity store
    pub fn with_shared_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a configuration stack; later stacks win per key
    pub fn with_config(mut self, config: ConfigStack) -> Self {
        self.configs.push(config);
        self
    }

    /// Load and add a YAML configuration file
    pub fn with_config_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let config = ConfigStack::from_yaml_file(path)?;
        Ok(self.with_config(config))
    }

    /// Expose an entity under a path with the shared configuration
    pub fn mount(self, path: impl Into<String>, entity: impl Into<String>) -> Self {
        self.mount_with(Mount::new(path, entity))
    }

    /// Expose an entity with a context or per-operation overrides
    pub fn mount_with(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add custom routes to the server
    ///
    /// Use this for endpoints that are not resource operations.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the transport-agnostic host
    ///
    /// Configuration is resolved for every mount and operation here, so
    /// unknown entities, unknown contexts and malformed options fail the
    /// build instead of a request.
    pub fn build_host(mut self) -> Result<ServerHost> {
        let store = self
            .store
            .take()
            .ok_or_else(|| anyhow::anyhow!("EntityStore is required. Call .with_store()"))?;
        let config = ConfigStack::merge(std::mem::take(&mut self.configs));

        let mut resources = ResourceRegistry::new();
        for mount in std::mem::take(&mut self.mounts) {
            let resource = Resource::new(
                store.clone(),
                &mount.entity,
                &config,
                mount.context.as_deref(),
                &mount.overrides,
            )?;
            tracing::debug!(path = %mount.path, entity = %mount.entity, "resource mounted");
            resources.register(&mount.path, resource);
        }

        Ok(ServerHost::new(store, config, resources))
    }

    /// Build the final REST router
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        RestExposure::build_router(host, custom_routes)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C) for graceful shutdown.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
