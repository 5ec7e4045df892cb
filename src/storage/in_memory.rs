//! In-memory implementation of EntityStore for testing and development
//!
//! Tables are vectors of records in insertion order. A transaction reads and
//! writes a snapshot of every table taken at `begin` and logs each change it
//! makes. `commit` replays the log onto the tables committed at that moment,
//! so transactions that overlap never overwrite each other; `rollback` drops
//! snapshot and log. Integer keys come from one sequence shared by every
//! transaction, so keys are never handed out twice.
//!
//! Relational semantics follow a SQL backend closely enough for the pipeline:
//! dotted-path filters behave like joins, `required` includes behave like
//! inner joins, nulls sort first.

use crate::core::constraint::{FieldPath, FilterClause, OrderClause, SortDirection};
use crate::core::entity::{Association, Cardinality, EntityDescriptor};
use crate::core::error::{FieldValidationError, ValidationError};
use crate::core::field::{AttributeType, FieldValue};
use crate::core::registry::EntityRegistry;
use crate::core::store::{
    EntityStore, IncludeSpec, QueryPage, Record, StoreQuery, ThroughInclude, Transaction,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    /// Last generated integer key per entity
    sequences: HashMap<String, i64>,
}

impl Tables {
    fn table(&self, entity: &str) -> &[Record] {
        self.rows.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One write made inside a transaction, replayed at commit
#[derive(Debug, Clone)]
enum Change {
    Create { entity: String, record: Record },
    Update { entity: String, key: Value, values: Record },
    Delete { entity: String, key: Value },
}

impl Change {
    fn apply(self, registry: &EntityRegistry, tables: &mut Tables) -> Result<()> {
        let entity = match &self {
            Change::Create { entity, .. } | Change::Update { entity, .. } | Change::Delete { entity, .. } => {
                entity
            }
        };
        let descriptor = registry
            .get(entity)
            .map(|d| d.as_ref())
            .ok_or_else(|| anyhow!("Unknown entity '{}'", entity))?;
        match self {
            Change::Create { record, .. } => insert_row(tables, descriptor, record).map(|_| ()),
            Change::Update { key, values, .. } => update_row(tables, descriptor, &key, values).map(|_| ()),
            Change::Delete { key, .. } => {
                delete_row(tables, descriptor, &key);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct OpenTransaction {
    tables: Tables,
    changes: Vec<Change>,
}

/// In-memory entity store
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
#[derive(Clone)]
pub struct InMemoryStore {
    registry: Arc<EntityRegistry>,
    committed: Arc<RwLock<Tables>>,
    transactions: Arc<RwLock<HashMap<Uuid, OpenTransaction>>>,
}

impl InMemoryStore {
    /// Create an empty store holding the given entities
    pub fn new(registry: EntityRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            committed: Arc::new(RwLock::new(Tables::default())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert committed rows directly, bypassing validation
    ///
    /// Integer primary keys still advance the key sequence.
    pub fn seed(&self, entity: &str, rows: Vec<Value>) -> Result<()> {
        let descriptor = self.descriptor(entity)?;
        let mut tables = self
            .committed
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        for row in rows {
            let Value::Object(record) = row else {
                return Err(anyhow!("seed rows for {entity} must be objects"));
            };
            let record = materialize(descriptor, record);
            advance_sequence(&mut tables, descriptor, &record);
            tables.rows.entry(entity.to_string()).or_default().push(record);
        }
        Ok(())
    }

    /// Number of committed rows of an entity
    pub fn count(&self, entity: &str) -> Result<usize> {
        let tables = self
            .committed
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(tables.table(entity).len())
    }

    fn descriptor(&self, entity: &str) -> Result<&EntityDescriptor> {
        self.registry
            .get(entity)
            .map(|d| d.as_ref())
            .ok_or_else(|| anyhow!("Unknown entity '{}'", entity))
    }

    /// Fill in a missing primary key from the shared sequence
    ///
    /// An explicit integer key moves the sequence past it instead.
    fn assign_key(&self, descriptor: &EntityDescriptor, record: &mut Record) -> Result<()> {
        let mut committed = self
            .committed
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        let primary_key = descriptor.primary_key();
        if record.get(primary_key).is_none_or(Value::is_null) {
            let key = generate_key(&mut committed, descriptor)?;
            record.insert(primary_key.to_string(), key);
        } else {
            advance_sequence(&mut committed, descriptor, record);
        }
        Ok(())
    }

    fn read<R>(&self, tx: Option<&Transaction>, f: impl FnOnce(&Tables) -> Result<R>) -> Result<R> {
        match tx {
            Some(tx) => {
                let transactions = self
                    .transactions
                    .read()
                    .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
                let open = transactions
                    .get(&tx.id())
                    .ok_or_else(|| anyhow!("Transaction {} is not open", tx.id()))?;
                f(&open.tables)
            }
            None => {
                let tables = self
                    .committed
                    .read()
                    .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
                f(&tables)
            }
        }
    }

    /// Run `f` against the transaction snapshot, logging `change` on success,
    /// or directly against committed tables outside a transaction
    fn write<R>(
        &self,
        tx: Option<&Transaction>,
        change: Change,
        f: impl FnOnce(&mut Tables) -> Result<R>,
    ) -> Result<R> {
        match tx {
            Some(tx) => {
                let mut transactions = self
                    .transactions
                    .write()
                    .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
                let open = transactions
                    .get_mut(&tx.id())
                    .ok_or_else(|| anyhow!("Transaction {} is not open", tx.id()))?;
                let result = f(&mut open.tables)?;
                open.changes.push(change);
                Ok(result)
            }
            None => {
                let mut tables = self
                    .committed
                    .write()
                    .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
                f(&mut tables)
            }
        }
    }
}

/// Append a keyed record after checking unique attributes
fn insert_row(tables: &mut Tables, descriptor: &EntityDescriptor, record: Record) -> Result<Record> {
    check_unique(tables.table(&descriptor.name), descriptor, &record, None)?;
    advance_sequence(tables, descriptor, &record);
    tables
        .rows
        .entry(descriptor.name.clone())
        .or_default()
        .push(record.clone());
    Ok(record)
}

fn update_row(
    tables: &mut Tables,
    descriptor: &EntityDescriptor,
    key: &Value,
    values: Record,
) -> Result<Option<Record>> {
    let key_type = Engine::key_type(descriptor, descriptor.primary_key());
    let table = tables.rows.entry(descriptor.name.clone()).or_default();
    let Some(index) = table.iter().position(|row| {
        row.get(descriptor.primary_key())
            .is_some_and(|pk| same_value(key_type, pk, key))
    }) else {
        return Ok(None);
    };

    let mut updated = table[index].clone();
    for (field, value) in values {
        if descriptor.has_attribute(&field) {
            updated.insert(field, value);
        }
    }
    check_unique(table, descriptor, &updated, Some(index))?;
    table[index] = updated.clone();
    Ok(Some(updated))
}

fn delete_row(tables: &mut Tables, descriptor: &EntityDescriptor, key: &Value) -> bool {
    let key_type = Engine::key_type(descriptor, descriptor.primary_key());
    let Some(table) = tables.rows.get_mut(&descriptor.name) else {
        return false;
    };
    let before = table.len();
    table.retain(|row| {
        !row.get(descriptor.primary_key())
            .is_some_and(|pk| same_value(key_type, pk, key))
    });
    table.len() != before
}

/// Record in attribute order with absent attributes set to null
fn materialize(descriptor: &EntityDescriptor, mut values: Record) -> Record {
    descriptor
        .attributes
        .iter()
        .map(|attribute| {
            let value = values.shift_remove(&attribute.name).unwrap_or(Value::Null);
            (attribute.name.clone(), value)
        })
        .collect()
}

fn advance_sequence(tables: &mut Tables, descriptor: &EntityDescriptor, record: &Record) {
    if let Some(key) = record.get(descriptor.primary_key()).and_then(Value::as_i64) {
        let sequence = tables.sequences.entry(descriptor.name.clone()).or_insert(0);
        *sequence = (*sequence).max(key);
    }
}

fn generate_key(tables: &mut Tables, descriptor: &EntityDescriptor) -> Result<Value> {
    let attr_type = descriptor
        .primary_key_attribute()
        .map(|a| a.attr_type)
        .unwrap_or(AttributeType::Integer);
    match attr_type {
        AttributeType::Integer => {
            let sequence = tables.sequences.entry(descriptor.name.clone()).or_insert(0);
            *sequence += 1;
            Ok(Value::from(*sequence))
        }
        AttributeType::Uuid | AttributeType::String | AttributeType::Text => {
            Ok(Value::String(Uuid::new_v4().to_string()))
        }
        other => Err(anyhow!(
            "Cannot generate a {} primary key for {}",
            other.label(),
            descriptor.name
        )),
    }
}

/// Reject values colliding with another row on a unique attribute
fn check_unique(
    table: &[Record],
    descriptor: &EntityDescriptor,
    record: &Record,
    skip_index: Option<usize>,
) -> Result<()> {
    let errors: Vec<FieldValidationError> = descriptor
        .attributes
        .iter()
        .filter(|a| a.unique)
        .filter_map(|attribute| {
            let value = record.get(&attribute.name).filter(|v| !v.is_null())?;
            table
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip_index && row.get(&attribute.name) == Some(value))
                .then(|| FieldValidationError::new(&attribute.name, "must be unique"))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::FieldErrors(errors).into())
    }
}

fn same_value(attr_type: AttributeType, a: &Value, b: &Value) -> bool {
    match (FieldValue::coerce(attr_type, a), FieldValue::coerce(attr_type, b)) {
        (Some(a), Some(b)) => !a.is_null() && a.compare(&b) == Some(Ordering::Equal),
        _ => false,
    }
}

/// Read-only relational evaluation over one table snapshot
struct Engine<'a> {
    tables: &'a Tables,
    registry: &'a EntityRegistry,
}

/// A related row, with its join row for many-to-many associations
struct Related<'a> {
    row: &'a Record,
    join: Option<&'a Record>,
}

impl<'a> Engine<'a> {
    fn descriptor(&self, entity: &str) -> Result<&'a EntityDescriptor> {
        self.registry
            .get(entity)
            .map(|d| d.as_ref())
            .ok_or_else(|| anyhow!("Unknown entity '{}'", entity))
    }

    fn key_type(descriptor: &EntityDescriptor, attribute: &str) -> AttributeType {
        descriptor
            .find_attribute(attribute)
            .map(|a| a.attr_type)
            .unwrap_or(AttributeType::Integer)
    }

    /// Rows of the association's target linked to `row`
    fn related(
        &self,
        source: &EntityDescriptor,
        row: &Record,
        association: &Association,
        join_filter: Option<&ThroughInclude>,
    ) -> Result<Vec<Related<'a>>> {
        let target = self.descriptor(&association.target)?;
        let target_rows = self.tables.table(&target.name);

        let related = match association.cardinality {
            Cardinality::BelongsTo => {
                let Some(fk) = row.get(&association.foreign_key) else {
                    return Ok(Vec::new());
                };
                let key_type = Self::key_type(target, target.primary_key());
                target_rows
                    .iter()
                    .filter(|t| {
                        t.get(target.primary_key())
                            .is_some_and(|pk| same_value(key_type, pk, fk))
                    })
                    .map(|row| Related { row, join: None })
                    .collect()
            }
            Cardinality::HasOne | Cardinality::HasMany => {
                let Some(pk) = row.get(source.primary_key()) else {
                    return Ok(Vec::new());
                };
                let key_type = Self::key_type(source, source.primary_key());
                let mut related: Vec<Related<'a>> = target_rows
                    .iter()
                    .filter(|t| {
                        t.get(&association.foreign_key)
                            .is_some_and(|fk| same_value(key_type, pk, fk))
                    })
                    .map(|row| Related { row, join: None })
                    .collect();
                if association.cardinality == Cardinality::HasOne {
                    related.truncate(1);
                }
                related
            }
            Cardinality::BelongsToMany => {
                let through = association
                    .through
                    .as_ref()
                    .ok_or_else(|| anyhow!("Association '{}' has no join entity", association.name))?;
                let join_descriptor = self.descriptor(&through.entity)?;
                let Some(pk) = row.get(source.primary_key()) else {
                    return Ok(Vec::new());
                };
                let source_type = Self::key_type(source, source.primary_key());
                let target_type = Self::key_type(target, target.primary_key());

                let mut related = Vec::new();
                for join in self.tables.table(&through.entity) {
                    let linked = join
                        .get(&through.source_key)
                        .is_some_and(|v| same_value(source_type, v, pk));
                    let accepted = join_filter.is_none_or(|t| {
                        t.filter.iter().all(|(field, expected)| {
                            let attr_type = Self::key_type(join_descriptor, field);
                            join.get(field).is_some_and(|v| same_value(attr_type, v, expected))
                        })
                    });
                    if !linked || !accepted {
                        continue;
                    }
                    let Some(target_key) = join.get(&through.target_key) else {
                        continue;
                    };
                    related.extend(
                        target_rows
                            .iter()
                            .filter(|t| {
                                t.get(target.primary_key())
                                    .is_some_and(|k| same_value(target_type, k, target_key))
                            })
                            .map(|row| Related {
                                row,
                                join: Some(join),
                            }),
                    );
                }
                related
            }
        };
        Ok(related)
    }

    /// Every value reachable at `path` from `row`; empty joins yield null
    ///
    /// After a many-to-many step, a segment naming the join entity moves onto
    /// the join row that linked each related row.
    fn values_at(&self, entity: &EntityDescriptor, row: &Record, path: &FieldPath) -> Result<Vec<FieldValue>> {
        let mut frontier: Vec<(&EntityDescriptor, &Record, Option<(&str, &Record)>)> = vec![(entity, row, None)];
        for segment in &path.associations {
            let mut next = Vec::new();
            for (descriptor, current, via) in frontier {
                if let Some(association) = descriptor.find_association(segment) {
                    let target = self.descriptor(&association.target)?;
                    let join_entity = association.through.as_ref().map(|t| t.entity.as_str());
                    for related in self.related(descriptor, current, association, None)? {
                        next.push((target, related.row, join_entity.zip(related.join)));
                    }
                } else if let Some((join_entity, join)) = via.filter(|(name, _)| *name == segment.as_str()) {
                    next.push((self.descriptor(join_entity)?, join, None));
                } else {
                    return Err(anyhow!("Unknown association '{}' on {}", segment, descriptor.name));
                }
            }
            frontier = next;
        }

        if frontier.is_empty() {
            return Ok(vec![FieldValue::Null]);
        }
        frontier
            .into_iter()
            .map(|(descriptor, current, _)| {
                let attr_type = descriptor
                    .find_attribute(&path.attribute)
                    .map(|a| a.attr_type)
                    .ok_or_else(|| anyhow!("Unknown attribute '{}' on {}", path.attribute, descriptor.name))?;
                let raw = current.get(&path.attribute).unwrap_or(&Value::Null);
                Ok(FieldValue::coerce(attr_type, raw).unwrap_or(FieldValue::Null))
            })
            .collect()
    }

    fn matches(&self, entity: &EntityDescriptor, row: &Record, clause: &FilterClause) -> Result<bool> {
        let values = self.values_at(entity, row, &clause.path)?;
        Ok(values
            .iter()
            .any(|candidate| clause.operator.matches(candidate, &clause.value)))
    }

    fn sort_key(&self, entity: &EntityDescriptor, row: &Record, order: &OrderClause) -> Result<FieldValue> {
        Ok(self
            .values_at(entity, row, &order.path)?
            .into_iter()
            .next()
            .unwrap_or(FieldValue::Null))
    }

    /// Whether every required include has at least one related row
    fn satisfies_includes(&self, entity: &EntityDescriptor, row: &Record, includes: &[IncludeSpec]) -> Result<bool> {
        for include in includes.iter().filter(|i| i.required) {
            let association = entity
                .find_association(&include.association)
                .ok_or_else(|| anyhow!("Unknown association '{}' on {}", include.association, entity.name))?;
            let target = self.descriptor(&association.target)?;
            let related = self.related(entity, row, association, include.through.as_ref())?;
            let mut any = false;
            for r in related {
                if self.satisfies_includes(target, r.row, &include.include)? {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Copy of `row` with included associations nested under their names
    fn load_includes(&self, entity: &EntityDescriptor, row: &Record, includes: &[IncludeSpec]) -> Result<Record> {
        let mut out = row.clone();
        for include in includes {
            let association = entity
                .find_association(&include.association)
                .ok_or_else(|| anyhow!("Unknown association '{}' on {}", include.association, entity.name))?;
            if let Some(expected) = &include.entity
                && *expected != association.target
            {
                return Err(anyhow!(
                    "Include '{}' targets {}, association targets {}",
                    include.association,
                    expected,
                    association.target
                ));
            }
            let target = self.descriptor(&association.target)?;

            let mut items = Vec::new();
            for related in self.related(entity, row, association, include.through.as_ref())? {
                if !self.satisfies_includes(target, related.row, &include.include)? {
                    continue;
                }
                let mut item = self.load_includes(target, related.row, &include.include)?;
                if let Some(attributes) = &include.attributes {
                    item.retain(|key, _| {
                        attributes.iter().any(|a| a == key)
                            || include.include.iter().any(|i| &i.association == key)
                    });
                }
                if let (Some(join), Some(through)) = (related.join, &association.through) {
                    let mut join = join.clone();
                    if let Some(attributes) = include.through.as_ref().and_then(|t| t.attributes.as_ref()) {
                        join.retain(|key, _| attributes.iter().any(|a| a == key));
                    }
                    item.insert(through.entity.clone(), Value::Object(join));
                }
                items.push(Value::Object(item));
            }

            let value = if association.cardinality.is_collection() {
                Value::Array(items)
            } else {
                items.into_iter().next().unwrap_or(Value::Null)
            };
            out.insert(include.association.clone(), value);
        }
        Ok(out)
    }

    fn run(&self, entity: &str, query: &StoreQuery) -> Result<QueryPage> {
        let descriptor = self.descriptor(entity)?;

        let mut matched: Vec<&Record> = Vec::new();
        'rows: for row in self.tables.table(entity) {
            for clause in &query.filters {
                if !self.matches(descriptor, row, clause)? {
                    continue 'rows;
                }
            }
            if self.satisfies_includes(descriptor, row, &query.include)? {
                matched.push(row);
            }
        }

        if !query.order.is_empty() {
            let mut keyed = matched
                .into_iter()
                .map(|row| {
                    let keys = query
                        .order
                        .iter()
                        .map(|order| self.sort_key(descriptor, row, order))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((keys, row))
                })
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), order) in a.iter().zip(b.iter()).zip(&query.order) {
                    let ordering = x.compare(y).unwrap_or(Ordering::Equal);
                    let ordering = match order.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            matched = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let total = matched.len();
        let window: Vec<&Record> = match query.paging {
            Some(paging) => matched
                .into_iter()
                .skip(paging.offset)
                .take(paging.limit)
                .collect(),
            None => matched,
        };

        let rows = window
            .into_iter()
            .map(|row| self.load_includes(descriptor, row, &query.include))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryPage { rows, total })
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    async fn begin(&self) -> Result<Transaction> {
        let snapshot = self
            .committed
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
            .clone();
        let tx = Transaction::new();
        self.transactions
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .insert(
                tx.id(),
                OpenTransaction {
                    tables: snapshot,
                    changes: Vec::new(),
                },
            );
        tracing::debug!(transaction = %tx.id(), "transaction started");
        Ok(tx)
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let open = self
            .transactions
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .remove(&tx.id())
            .ok_or_else(|| anyhow!("Transaction {} is not open", tx.id()))?;

        let mut committed = self
            .committed
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        let mut next = committed.clone();
        let changes = open.changes.len();
        for change in open.changes {
            change.apply(&self.registry, &mut next)?;
        }
        *committed = next;
        tracing::debug!(transaction = %tx.id(), changes, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: Transaction) -> Result<()> {
        self.transactions
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .remove(&tx.id())
            .ok_or_else(|| anyhow!("Transaction {} is not open", tx.id()))?;
        tracing::debug!(transaction = %tx.id(), "transaction rolled back");
        Ok(())
    }

    async fn query(&self, entity: &str, query: &StoreQuery, tx: Option<&Transaction>) -> Result<QueryPage> {
        self.read(tx, |tables| {
            Engine {
                tables,
                registry: &self.registry,
            }
            .run(entity, query)
        })
    }

    async fn find_by_key(
        &self,
        entity: &str,
        key: &Value,
        query: &StoreQuery,
        tx: Option<&Transaction>,
    ) -> Result<Option<Record>> {
        let descriptor = self.descriptor(entity)?;
        let key_type = Engine::key_type(descriptor, descriptor.primary_key());
        let key = FieldValue::coerce(key_type, key)
            .ok_or_else(|| anyhow!("Invalid primary key {} for {}", key, entity))?;

        let mut keyed = query.clone();
        keyed.paging = None;
        keyed.filters.push(FilterClause::equals(descriptor.primary_key(), key));
        let page = self.query(entity, &keyed, tx).await?;
        Ok(page.rows.into_iter().next())
    }

    async fn create(&self, entity: &str, values: Record, tx: Option<&Transaction>) -> Result<Record> {
        let descriptor = self.descriptor(entity)?;
        let mut record = materialize(descriptor, values);
        self.assign_key(descriptor, &mut record)?;

        let change = Change::Create {
            entity: entity.to_string(),
            record: record.clone(),
        };
        self.write(tx, change, |tables| insert_row(tables, descriptor, record))
    }

    async fn update(
        &self,
        entity: &str,
        key: &Value,
        values: Record,
        tx: Option<&Transaction>,
    ) -> Result<Option<Record>> {
        let descriptor = self.descriptor(entity)?;
        let change = Change::Update {
            entity: entity.to_string(),
            key: key.clone(),
            values: values.clone(),
        };
        self.write(tx, change, |tables| update_row(tables, descriptor, key, values))
    }

    async fn delete(&self, entity: &str, key: &Value, tx: Option<&Transaction>) -> Result<bool> {
        let descriptor = self.descriptor(entity)?;
        let change = Change::Delete {
            entity: entity.to_string(),
            key: key.clone(),
        };
        self.write(tx, change, |tables| Ok(delete_row(tables, descriptor, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraint::{FilterOperator, FilterValue};
    use crate::core::entity::{Attribute, Through};
    use crate::core::store::Paging;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        EntityRegistry::new()
            .with(
                EntityDescriptor::new("artist")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("name", AttributeType::String))
                    .attribute(Attribute::new("code", AttributeType::String).unique()),
            )
            .with(
                EntityDescriptor::new("tag")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("label", AttributeType::String)),
            )
            .with(
                EntityDescriptor::new("song_tag")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("song_id", AttributeType::Integer))
                    .attribute(Attribute::new("tag_id", AttributeType::Integer))
                    .attribute(Attribute::new("weight", AttributeType::Integer)),
            )
            .with(
                EntityDescriptor::new("song")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("title", AttributeType::String))
                    .attribute(Attribute::new("artist_id", AttributeType::Integer))
                    .association(Association::belongs_to("artist", "artist", "artist_id"))
                    .association(Association::belongs_to_many(
                        "tags",
                        "tag",
                        Through {
                            entity: "song_tag".to_string(),
                            source_key: "song_id".to_string(),
                            target_key: "tag_id".to_string(),
                        },
                    )),
            )
    }

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new(registry());
        store
            .seed(
                "artist",
                vec![
                    json!({"id": 1, "name": "Nina", "code": "nina"}),
                    json!({"id": 2, "name": "Bob", "code": "bob"}),
                ],
            )
            .unwrap();
        store
            .seed(
                "song",
                vec![
                    json!({"id": 1, "title": "Sinnerman", "artist_id": 1}),
                    json!({"id": 2, "title": "Feeling Good", "artist_id": 1}),
                    json!({"id": 3, "title": "Jammin", "artist_id": 2}),
                    json!({"id": 4, "title": "Untitled", "artist_id": null}),
                ],
            )
            .unwrap();
        store
            .seed("tag", vec![json!({"id": 1, "label": "jazz"}), json!({"id": 2, "label": "live"})])
            .unwrap();
        store
            .seed(
                "song_tag",
                vec![
                    json!({"id": 1, "song_id": 1, "tag_id": 1, "weight": 1}),
                    json!({"id": 2, "song_id": 1, "tag_id": 2, "weight": 2}),
                ],
            )
            .unwrap();
        store
    }

    fn filter(path: &str, operator: FilterOperator, value: FieldValue) -> FilterClause {
        FilterClause {
            field: path.to_string(),
            path: FieldPath::parse(path),
            operator,
            value: FilterValue::Single(value),
        }
    }

    fn titles(page: &QueryPage) -> Vec<&str> {
        page.rows
            .iter()
            .filter_map(|r| r.get("title").and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn test_filter_through_association_path() {
        let store = store();
        let query = StoreQuery::new().filter(filter(
            "artist.name",
            FilterOperator::Ieq,
            FieldValue::String("nina".to_string()),
        ));
        let page = store.query("song", &query, None).await.unwrap();
        assert_eq!(titles(&page), vec!["Sinnerman", "Feeling Good"]);
    }

    #[tokio::test]
    async fn test_order_and_paging_report_total() {
        let store = store();
        let query = StoreQuery {
            order: vec![OrderClause {
                field: "title".to_string(),
                path: FieldPath::attribute("title"),
                direction: SortDirection::Desc,
            }],
            paging: Some(Paging { offset: 1, limit: 2 }),
            ..StoreQuery::default()
        };
        let page = store.query("song", &query, None).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(titles(&page), vec!["Sinnerman", "Jammin"]);
    }

    #[tokio::test]
    async fn test_required_include_drops_unmatched_rows() {
        let store = store();
        let query = StoreQuery {
            include: vec![IncludeSpec::new("artist").required(true)],
            ..StoreQuery::default()
        };
        let page = store.query("song", &query, None).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows[0]["artist"]["name"], json!("Nina"));

        let optional = StoreQuery {
            include: vec![IncludeSpec::new("artist")],
            ..StoreQuery::default()
        };
        let page = store.query("song", &optional, None).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.rows[3]["artist"], Value::Null);
    }

    #[tokio::test]
    async fn test_many_to_many_include_nests_join_row() {
        let store = store();
        let mut include = IncludeSpec::new("tags");
        include.through = Some(ThroughInclude {
            attributes: Some(vec!["weight".to_string()]),
            filter: json!({"weight": 2}).as_object().cloned().unwrap(),
        });
        let query = StoreQuery {
            include: vec![include],
            ..StoreQuery::default()
        };
        let page = store.query("song", &query, None).await.unwrap();
        assert_eq!(
            page.rows[0]["tags"],
            json!([{"id": 2, "label": "live", "song_tag": {"weight": 2}}])
        );
        assert_eq!(page.rows[1]["tags"], json!([]));
    }

    #[tokio::test]
    async fn test_create_generates_keys_and_enforces_unique() {
        let store = store();
        let created = store
            .create("artist", json!({"name": "Ella", "code": "ella"}).as_object().cloned().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(created["id"], json!(3));

        let err = store
            .create("artist", json!({"name": "Copy", "code": "ella"}).as_object().cloned().unwrap(), None)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_transaction_writes() {
        let store = store();
        let tx = store.begin().await.unwrap();
        store
            .delete("song", &json!(1), Some(&tx))
            .await
            .unwrap();
        assert_eq!(store.count("song").unwrap(), 4);
        store.rollback(tx).await.unwrap();
        assert_eq!(store.count("song").unwrap(), 4);

        let tx = store.begin().await.unwrap();
        store.delete("song", &json!(1), Some(&tx)).await.unwrap();
        store.commit(tx).await.unwrap();
        assert_eq!(store.count("song").unwrap(), 3);
    }

    fn tag(label: &str) -> Record {
        json!({"label": label}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_overlapping_transactions_keep_both_writes() {
        let store = store();
        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();

        let a = store.create("tag", tag("a"), Some(&first)).await.unwrap();
        let b = store.create("tag", tag("b"), Some(&second)).await.unwrap();
        let c = store.create("tag", tag("c"), None).await.unwrap();
        assert_eq!((a["id"].clone(), b["id"].clone(), c["id"].clone()), (json!(3), json!(4), json!(5)));

        store.commit(first).await.unwrap();
        store.commit(second).await.unwrap();

        let page = store.query("tag", &StoreQuery::new(), None).await.unwrap();
        let labels: Vec<&str> = page
            .rows
            .iter()
            .filter_map(|r| r.get("label").and_then(Value::as_str))
            .collect();
        assert_eq!(labels, vec!["jazz", "live", "c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_commit_rechecks_unique_against_latest_rows() {
        let store = store();
        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        let ella = || json!({"name": "Ella", "code": "ella"}).as_object().cloned().unwrap();

        store.create("artist", ella(), Some(&first)).await.unwrap();
        store.create("artist", ella(), Some(&second)).await.unwrap();
        store.delete("artist", &json!(1), Some(&second)).await.unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();
        assert!(err.downcast_ref::<ValidationError>().is_some());

        assert_eq!(store.count("artist").unwrap(), 3);
        assert!(
            store
                .find_by_key("artist", &json!(1), &StoreQuery::new(), None)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_commit_replays_onto_rows_written_meanwhile() {
        let store = store();
        let tx = store.begin().await.unwrap();
        let values = json!({"title": "Sinnerman (live)"}).as_object().cloned().unwrap();
        store.update("song", &json!(1), values, Some(&tx)).await.unwrap();

        store.delete("song", &json!(3), None).await.unwrap();
        store.commit(tx).await.unwrap();

        assert_eq!(store.count("song").unwrap(), 3);
        let found = store
            .find_by_key("song", &json!(1), &StoreQuery::new(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["title"], json!("Sinnerman (live)"));
    }

    #[tokio::test]
    async fn test_update_and_find_by_key() {
        let store = store();
        let values = json!({"title": "Sinnerman (live)"}).as_object().cloned().unwrap();
        let updated = store.update("song", &json!(1), values, None).await.unwrap().unwrap();
        assert_eq!(updated["artist_id"], json!(1));

        let found = store
            .find_by_key("song", &json!("1"), &StoreQuery::new(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["title"], json!("Sinnerman (live)"));
        assert!(store.update("song", &json!(99), Record::new(), None).await.unwrap().is_none());
    }
}
