//! Storage abstraction used by the resource pipeline
//!
//! The pipeline never touches storage directly: every read and write goes
//! through an [`EntityStore`], addressed by entity name, with records carried
//! as JSON objects keyed by internal attribute names.

use crate::core::constraint::{FilterClause, OrderClause};
use crate::core::registry::EntityRegistry;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One stored row, keyed by internal attribute names
///
/// Included associations are nested under the association name: an object for
/// single-valued associations, an array for collections.
pub type Record = Map<String, Value>;

/// Handle of an open store transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: Uuid,
}

impl Transaction {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Options applied to the join rows of a many-to-many include
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughInclude {
    /// Join attributes to keep; `None` keeps all
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    /// Equality constraints on join rows
    #[serde(default, rename = "where", alias = "filter")]
    pub filter: Map<String, Value>,
}

/// Request to load an association alongside the primary rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeSpec {
    #[serde(alias = "as")]
    pub association: String,
    /// Target entity; inferred from the association when absent
    #[serde(default, alias = "model")]
    pub entity: Option<String>,
    /// Inner-join semantics: primary rows without a match are dropped
    #[serde(default)]
    pub required: bool,
    /// Related attributes to load; `None` loads all
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    #[serde(default)]
    pub through: Option<ThroughInclude>,
    /// Nested includes on the related entity
    #[serde(default)]
    pub include: Vec<IncludeSpec>,
}

impl IncludeSpec {
    pub fn new(association: impl Into<String>) -> Self {
        Self {
            association: association.into(),
            entity: None,
            required: false,
            attributes: None,
            through: None,
            include: Vec::new(),
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: usize,
    pub limit: usize,
}

/// Constraints of one store read
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub filters: Vec<FilterClause>,
    pub order: Vec<OrderClause>,
    pub paging: Option<Paging>,
    pub include: Vec<IncludeSpec>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: FilterClause) -> Self {
        self.filters.push(clause);
        self
    }
}

/// One page of results and the total matching count before paging
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub rows: Vec<Record>,
    pub total: usize,
}

/// Entity storage used by resources
///
/// Writes and reads may run inside a transaction obtained from
/// [`begin`](EntityStore::begin); passing `None` operates on committed data.
/// Implementations must reject unique-constraint violations with a
/// [`ValidationError`](crate::core::error::ValidationError).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Metadata of every entity this store holds
    fn registry(&self) -> &EntityRegistry;

    async fn begin(&self) -> Result<Transaction>;

    async fn commit(&self, tx: Transaction) -> Result<()>;

    async fn rollback(&self, tx: Transaction) -> Result<()>;

    /// Filter, order and page rows, loading requested includes
    async fn query(
        &self,
        entity: &str,
        query: &StoreQuery,
        tx: Option<&Transaction>,
    ) -> Result<QueryPage>;

    /// Fetch one row by primary key, subject to the query's filters and includes
    async fn find_by_key(
        &self,
        entity: &str,
        key: &Value,
        query: &StoreQuery,
        tx: Option<&Transaction>,
    ) -> Result<Option<Record>>;

    /// Insert a row; a missing primary key is generated
    async fn create(&self, entity: &str, values: Record, tx: Option<&Transaction>)
    -> Result<Record>;

    /// Overwrite the given attributes of one row
    async fn update(
        &self,
        entity: &str,
        key: &Value,
        values: Record,
        tx: Option<&Transaction>,
    ) -> Result<Option<Record>>;

    /// Remove one row; returns whether it existed
    async fn delete(&self, entity: &str, key: &Value, tx: Option<&Transaction>) -> Result<bool>;
}
