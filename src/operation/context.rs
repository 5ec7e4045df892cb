//! Per-request operation state shared with hooks

use crate::config::{OperationConfig, OperationKind};
use crate::core::constraint::{FieldPath, FilterClause, FilterOperator, FilterValue, resolve_attribute};
use crate::core::entity::EntityDescriptor;
use crate::core::error::BadRequestError;
use crate::core::field::FieldValue;
use crate::core::registry::EntityRegistry;
use crate::core::store::{EntityStore, Record, Transaction};
use axum::http::StatusCode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Life-cycle position of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    BuildContext,
    RunPreHooks,
    ExecuteStoreOperation,
    RunPostHooks,
    EmitResponse,
    Cancelled,
    Failed,
}

/// Mutable state threaded through one operation
///
/// Hooks read the request through [`param`](Self::param) and
/// [`body`](Self::body), scope the store call with
/// [`apply_where`](Self::apply_where), inject write values with
/// [`set_value`](Self::set_value), and shape the response through
/// [`payload`](Self::payload). Field names are internal attribute names.
pub struct OperationContext {
    kind: OperationKind,
    entity: Arc<EntityDescriptor>,
    store: Arc<dyn EntityStore>,
    config: Arc<OperationConfig>,
    params: HashMap<String, String>,
    body: Value,
    state: PipelineState,
    transaction: Option<Transaction>,
    constraints: Vec<FilterClause>,
    values: Record,
    cancellation: Option<(StatusCode, Value)>,
    result: Option<Value>,

    /// Return value of the last pre-hook
    pub pre_result: Option<Value>,
    /// Response body under construction
    pub payload: Map<String, Value>,
}

impl OperationContext {
    pub(crate) fn new(
        kind: OperationKind,
        entity: Arc<EntityDescriptor>,
        store: Arc<dyn EntityStore>,
        config: Arc<OperationConfig>,
        params: HashMap<String, String>,
        body: Value,
    ) -> Self {
        Self {
            kind,
            entity,
            store,
            config,
            params,
            body,
            state: PipelineState::BuildContext,
            transaction: None,
            constraints: Vec::new(),
            values: Record::new(),
            cancellation: None,
            result: None,
            pre_result: None,
            payload: Map::new(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PipelineState) {
        tracing::debug!(
            entity = %self.entity.name,
            operation = %self.kind,
            from = ?self.state,
            to = ?state,
            "pipeline transition"
        );
        self.state = state;
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    /// Every entity known to the store
    pub fn models(&self) -> &EntityRegistry {
        self.store.registry()
    }

    /// The store, for hooks that read or write other entities
    ///
    /// Pass [`transaction`](Self::transaction) along so the work joins the
    /// operation's atomic scope.
    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Open transaction; only write operations have one
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub(crate) fn set_transaction(&mut self, tx: Option<Transaction>) {
        self.transaction = tx;
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Any configuration key, by snake_case or camelCase spelling
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.config.option(key)
    }

    /// Path or query-string parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Constrain the store call to records where `field` equals `value`
    ///
    /// `field` may be a dotted association path. Used to scope reads and
    /// writes, e.g. to the requesting owner.
    pub fn apply_where(&mut self, field: &str, value: impl Into<Value>) -> anyhow::Result<()> {
        let value = value.into();
        let path = FieldPath::parse(field);
        let attribute = resolve_attribute(&self.entity, self.store.registry(), &path).map_err(|entity| {
            BadRequestError::UnknownField {
                entity,
                field: field.to_string(),
            }
        })?;
        let typed = FieldValue::coerce(attribute.attr_type, &value).ok_or_else(|| {
            BadRequestError::InvalidValue {
                field: field.to_string(),
                expected: attribute.attr_type.label(),
                value: value.to_string(),
            }
        })?;

        self.constraints.push(FilterClause {
            field: field.to_string(),
            path,
            operator: FilterOperator::Eq,
            value: FilterValue::Single(typed),
        });
        Ok(())
    }

    /// Add a fully built constraint
    pub fn apply_filter(&mut self, clause: FilterClause) {
        self.constraints.push(clause);
    }

    pub fn constraints(&self) -> &[FilterClause] {
        &self.constraints
    }

    /// Inject a write value; injected values override the request body
    pub fn set_value(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn set_multiple_values(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        for (field, value) in values {
            self.values.insert(field, value);
        }
    }

    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Stop the operation and respond with exactly `status` and `body`
    ///
    /// Remaining hooks and the store call are skipped and any open
    /// transaction is rolled back.
    pub fn cancel_operation(&mut self, status: StatusCode, body: impl Into<Value>) {
        self.cancellation = Some((status, body.into()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    pub(crate) fn take_cancellation(&mut self) -> Option<(StatusCode, Value)> {
        self.cancellation.take()
    }

    /// Outcome of the store call, available to post-hooks
    ///
    /// Shaped rows for list/search, the shaped record for single, the stored
    /// record for writes.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("kind", &self.kind)
            .field("entity", &self.entity.name)
            .field("state", &self.state)
            .field("transaction", &self.transaction)
            .field("constraints", &self.constraints)
            .field("values", &self.values)
            .field("pre_result", &self.pre_result)
            .finish()
    }
}
