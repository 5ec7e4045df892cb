//! # restshape
//!
//! Declarative REST resource operations over relational entities.
//!
//! ## Features
//!
//! - **Constraint Parsing**: `field:op=value` filters and `a,-b` ordering with allow/block lists
//! - **Field Aliases**: external names decoupled from internal attributes
//! - **Identifier Mapping**: expose a public key instead of the primary key, relations included
//! - **Flattening**: lift attributes of associated entities onto the root record
//! - **Hook Pipelines**: pre/post hooks with cancellation inside one transaction
//! - **Layered Configuration**: global, operation, entity, context and override layers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use restshape::prelude::*;
//!
//! let registry = EntityRegistry::new().with(
//!     EntityDescriptor::new("item")
//!         .attribute(Attribute::primary_key("id", AttributeType::Integer))
//!         .attribute(Attribute::new("external_id", AttributeType::String).unique())
//!         .attribute(Attribute::new("name", AttributeType::String).required())
//!         .defaults(ConfigLayer::new().set("id_mapping", "external_id")),
//! );
//!
//! ServerBuilder::new()
//!     .with_store(InMemoryStore::new(registry))
//!     .mount("items", "item")
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod operation;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Schema ===
    pub use crate::core::{
        Association, Attribute, AttributeType, Cardinality, EntityDescriptor, EntityRegistry,
        FieldFormat, FieldValue, Through,
    };

    // === Store ===
    pub use crate::core::{
        EntityStore, IncludeSpec, Paging, QueryPage, Record, StoreQuery, ThroughInclude,
        Transaction,
    };

    // === Errors ===
    pub use crate::core::{
        BadRequestError, ConfigError, NotFoundError, ResourceError, ResourceResult,
        ValidationError,
    };

    // === Operations ===
    pub use crate::operation::{
        FnHook, Hook, HookList, OperationContext, PipelineState, Resource, ResourceRequest,
        ResourceResponse, hook,
    };

    // === Config ===
    pub use crate::config::{ConfigLayer, ConfigStack, OperationConfig, OperationKind};

    // === Storage ===
    #[cfg(feature = "in-memory")]
    pub use crate::storage::InMemoryStore;

    // === Server ===
    pub use crate::server::{Mount, ServerBuilder, init_tracing};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use axum::http::StatusCode;
    pub use serde_json::{Value, json};
}
