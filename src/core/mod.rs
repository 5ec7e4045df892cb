//! Core module containing the translation and shaping building blocks

pub mod alias;
pub mod constraint;
pub mod entity;
pub mod error;
pub mod field;
pub mod flatten;
pub mod identifier;
pub mod query;
pub mod registry;
pub mod store;
pub mod validation;

pub use alias::FieldAliases;
pub use constraint::{
    ConstraintParser, FieldPath, FilterClause, FilterOperator, FilterValue, OrderClause,
    SortDirection,
};
pub use entity::{Association, Attribute, Cardinality, EntityDescriptor, Through};
pub use error::{
    BadRequestError, ConfigError, FieldValidationError, NotFoundError, ResourceError,
    ResourceResult, ValidationError,
};
pub use field::{AttributeType, FieldFormat, FieldValue};
pub use flatten::{FlattenThrough, FlattenedAttribute, FlatteningPlan, FlatteningSpec};
pub use identifier::{IdentifierMapper, RelationMapping, RelationMappingConfig};
pub use query::{PagingMeta, ResourceQuery};
pub use registry::EntityRegistry;
pub use store::{
    EntityStore, IncludeSpec, Paging, QueryPage, Record, StoreQuery, ThroughInclude, Transaction,
};
pub use validation::{WriteMode, validate_payload};
