//! External identifier mapping
//!
//! Direct mapping exposes the attribute named by `id_mapping` as the record's
//! `id` and resolves inbound external ids back to primary keys. Relation
//! mapping does the same for foreign keys: outbound values become the related
//! entity's external id, inbound external ids are resolved to the related
//! primary key.
//!
//! Relation mappings come from three sources, later ones winning per foreign
//! key:
//!
//! 1. declared belongs-to associations ([`discover_from_associations`])
//! 2. the `<entity>_id` naming convention ([`discover_from_naming`])
//! 3. explicit `relation_id_mapping` entries
//!
//! The first two only run with `auto_relation_id_mapping` (the default) and
//! only pick up related entities that declare their own `id_mapping`.

use crate::config::OperationConfig;
use crate::core::constraint::{FieldPath, FilterClause, FilterOperator, FilterValue};
use crate::core::entity::{Cardinality, EntityDescriptor};
use crate::core::error::{ConfigError, NotFoundError, ResourceResult};
use crate::core::field::{AttributeType, FieldValue};
use crate::core::registry::EntityRegistry;
use crate::core::store::{EntityStore, IncludeSpec, Record, StoreQuery, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One `relation_id_mapping` entry as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMappingConfig {
    /// Foreign-key attribute or the name of its belongs-to association
    #[serde(alias = "foreignKey", alias = "association", alias = "fk")]
    pub foreign_key: String,
    #[serde(default, alias = "relatedEntity", alias = "model")]
    pub related_entity: Option<String>,
    /// Defaults to the related entity's own `id_mapping`
    #[serde(default, alias = "externalField")]
    pub external_field: Option<String>,
}

/// A resolved foreign-key mapping
#[derive(Debug, Clone, PartialEq)]
pub struct RelationMapping {
    pub foreign_key: String,
    pub related_entity: String,
    pub external_field: String,
    pub external_type: AttributeType,
    /// Primary key of the related entity
    pub related_key: String,
}

impl RelationMapping {
    fn for_target(foreign_key: &str, target: &EntityDescriptor, external_field: String) -> Option<Self> {
        let external_type = target.find_attribute(&external_field)?.attr_type;
        Some(Self {
            foreign_key: foreign_key.to_string(),
            related_entity: target.name.clone(),
            external_field,
            external_type,
            related_key: target.primary_key().to_string(),
        })
    }

    /// Auto-discovered mapping onto a target that declares its own `id_mapping`
    fn discovered(foreign_key: &str, target: &EntityDescriptor) -> Option<Self> {
        let external_field = target.default_id_mapping();
        if external_field == target.primary_key() {
            return None;
        }
        Self::for_target(foreign_key, target, external_field)
    }
}

/// Mappings for every belongs-to association whose target declares an external id
pub fn discover_from_associations(entity: &EntityDescriptor, registry: &EntityRegistry) -> Vec<RelationMapping> {
    entity
        .associations
        .iter()
        .filter(|a| a.cardinality == Cardinality::BelongsTo && entity.has_attribute(&a.foreign_key))
        .filter_map(|a| {
            let target = registry.get(&a.target)?;
            RelationMapping::discovered(&a.foreign_key, target)
        })
        .collect()
}

/// Mappings for `<entity>_id` attributes naming a registered entity
pub fn discover_from_naming(entity: &EntityDescriptor, registry: &EntityRegistry) -> Vec<RelationMapping> {
    entity
        .attributes
        .iter()
        .filter(|a| !a.primary_key)
        .filter_map(|a| {
            let target_name = a.name.strip_suffix("_id")?;
            let target = registry.get(target_name)?;
            RelationMapping::discovered(&a.name, target)
        })
        .collect()
}

/// Resolve the effective relation mappings of one operation
///
/// Unknown related entities are skipped; an external field missing from the
/// related entity fails the request.
pub fn resolve_relation_mappings(
    entity: &EntityDescriptor,
    registry: &EntityRegistry,
    config: &OperationConfig,
) -> ResourceResult<Vec<RelationMapping>> {
    let mut mappings: Vec<RelationMapping> = Vec::new();
    let mut upsert = |mapping: RelationMapping, replace: bool| {
        match mappings.iter_mut().find(|m| m.foreign_key == mapping.foreign_key) {
            Some(existing) if replace => *existing = mapping,
            Some(_) => {}
            None => mappings.push(mapping),
        }
    };

    if config.auto_relation_id_mapping {
        for mapping in discover_from_associations(entity, registry) {
            upsert(mapping, false);
        }
        for mapping in discover_from_naming(entity, registry) {
            upsert(mapping, false);
        }
    }

    for entry in &config.relation_id_mapping {
        let foreign_key = entity
            .find_association(&entry.foreign_key)
            .map(|a| a.foreign_key.clone())
            .unwrap_or_else(|| entry.foreign_key.clone());

        let target = match entry.related_entity.as_deref().and_then(|name| registry.get(name)) {
            Some(target) => target,
            None => {
                tracing::warn!(
                    entity = %entity.name,
                    foreign_key = %foreign_key,
                    related_entity = ?entry.related_entity,
                    "skipping relation mapping with unknown related entity"
                );
                continue;
            }
        };

        let external_field = entry
            .external_field
            .clone()
            .unwrap_or_else(|| target.default_id_mapping());
        let mapping = RelationMapping::for_target(&foreign_key, target, external_field.clone())
            .ok_or_else(|| ConfigError::MissingAttribute {
                entity: target.name.clone(),
                attribute: external_field,
                context: format!("relation_id_mapping of {}.{}", entity.name, foreign_key),
            })?;
        upsert(mapping, true);
    }

    Ok(mappings)
}

/// Stable lookup key for a JSON scalar
fn value_key(value: &Value) -> String {
    value.to_string()
}

/// Translates identifiers for one entity within one operation
pub struct IdentifierMapper<'a> {
    entity: &'a EntityDescriptor,
    registry: &'a EntityRegistry,
    id_attribute: String,
    relations: Vec<RelationMapping>,
}

impl<'a> IdentifierMapper<'a> {
    pub fn new(
        entity: &'a EntityDescriptor,
        registry: &'a EntityRegistry,
        config: &OperationConfig,
    ) -> ResourceResult<Self> {
        let relations = resolve_relation_mappings(entity, registry, config)?;
        Ok(Self {
            entity,
            registry,
            id_attribute: config.id_attribute(entity).to_string(),
            relations,
        })
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn relations(&self) -> &[RelationMapping] {
        &self.relations
    }

    pub fn relation_for(&self, foreign_key: &str) -> Option<&RelationMapping> {
        self.relations.iter().find(|m| m.foreign_key == foreign_key)
    }

    /// Equality constraint selecting the record with an external id
    ///
    /// An id that cannot be coerced to the mapped attribute's type cannot
    /// exist, so it reports not-found.
    pub fn key_filter(&self, external: &str) -> ResourceResult<FilterClause> {
        let attr_type = self
            .entity
            .find_attribute(&self.id_attribute)
            .map(|a| a.attr_type)
            .ok_or_else(|| ConfigError::MissingAttribute {
                entity: self.entity.name.clone(),
                attribute: self.id_attribute.clone(),
                context: "id_mapping".to_string(),
            })?;
        let value = FieldValue::coerce(attr_type, &Value::String(external.to_string()))
            .filter(|v| !v.is_null())
            .ok_or_else(|| NotFoundError::Record {
                entity: self.entity.name.clone(),
                id: external.to_string(),
            })?;
        Ok(FilterClause::equals(&self.id_attribute, value))
    }

    /// Set `id` from the mapped attribute, stripping the raw key when it differs
    pub fn outbound_id(&self, record: &mut Record) {
        map_record_id(record, &self.id_attribute);
    }

    /// Replace mapped foreign keys with related external ids, in batch
    ///
    /// Foreign keys whose related record no longer exists become null.
    pub async fn outbound_relations(
        &self,
        store: &dyn EntityStore,
        records: &mut [Record],
        tx: Option<&Transaction>,
    ) -> ResourceResult<()> {
        for mapping in &self.relations {
            let keys: Vec<Value> = records
                .iter()
                .filter_map(|r| r.get(&mapping.foreign_key))
                .filter(|v| !v.is_null())
                .cloned()
                .collect();
            if keys.is_empty() {
                continue;
            }

            let related = self
                .lookup(store, mapping, &mapping.related_key, &keys, tx)
                .await?;
            let external_by_key: HashMap<String, Value> = related
                .iter()
                .filter_map(|row| {
                    let key = row.get(&mapping.related_key)?;
                    let external = row.get(&mapping.external_field)?;
                    Some((value_key(key), external.clone()))
                })
                .collect();

            for record in records.iter_mut() {
                if let Some(value) = record.get_mut(&mapping.foreign_key) {
                    if value.is_null() {
                        continue;
                    }
                    *value = external_by_key
                        .get(&value_key(value))
                        .cloned()
                        .unwrap_or(Value::Null);
                }
            }
        }
        Ok(())
    }

    /// Map `id` of included records, recursively per include level
    pub fn outbound_includes(&self, record: &mut Record, includes: &[IncludeSpec]) {
        map_included_ids(self.entity, self.registry, record, includes);
    }

    /// Resolve external ids supplied for mapped foreign keys in a write payload
    pub async fn inbound_payload(
        &self,
        store: &dyn EntityStore,
        payload: &mut Record,
        tx: Option<&Transaction>,
    ) -> ResourceResult<()> {
        for mapping in &self.relations {
            let Some(external) = payload.get(&mapping.foreign_key).filter(|v| !v.is_null()) else {
                continue;
            };
            let external = external.clone();

            let related = self
                .lookup(store, mapping, &mapping.external_field, std::slice::from_ref(&external), tx)
                .await?;
            let key = related
                .first()
                .and_then(|row| row.get(&mapping.related_key))
                .cloned()
                .ok_or_else(|| NotFoundError::Related {
                    entity: mapping.related_entity.clone(),
                    field: mapping.foreign_key.clone(),
                    value: external.as_str().map(str::to_string).unwrap_or_else(|| external.to_string()),
                })?;
            payload.insert(mapping.foreign_key.clone(), key);
        }
        Ok(())
    }

    /// Translate filter values on mapped foreign keys to internal keys
    ///
    /// Returns `false` when a positive filter (`eq`, `in`) matches no related
    /// record, meaning the query can only produce an empty result. Negative
    /// filters drop unresolvable values instead.
    pub async fn inbound_filters(
        &self,
        store: &dyn EntityStore,
        filters: &mut Vec<FilterClause>,
        tx: Option<&Transaction>,
    ) -> ResourceResult<bool> {
        let mut translated = Vec::with_capacity(filters.len());
        for mut clause in std::mem::take(filters) {
            let mapping = clause
                .path
                .is_root()
                .then(|| self.relation_for(&clause.path.attribute))
                .flatten();
            let Some(mapping) = mapping else {
                translated.push(clause);
                continue;
            };

            let externals: Vec<Value> = match &clause.value {
                FilterValue::Single(v) => vec![v.to_json()],
                FilterValue::List(values) => values.iter().map(FieldValue::to_json).collect(),
            };
            let related = self
                .lookup(store, mapping, &mapping.external_field, &externals, tx)
                .await?;
            let key_type = self
                .entity
                .find_attribute(&mapping.foreign_key)
                .map(|a| a.attr_type)
                .unwrap_or(AttributeType::Integer);
            let keys: Vec<FieldValue> = related
                .iter()
                .filter_map(|row| row.get(&mapping.related_key))
                .filter_map(|key| FieldValue::coerce(key_type, key))
                .collect();

            let positive = matches!(clause.operator, FilterOperator::Eq | FilterOperator::In);
            if keys.is_empty() {
                if positive {
                    *filters = Vec::new();
                    return Ok(false);
                }
                continue;
            }

            clause.value = match clause.operator {
                FilterOperator::Eq | FilterOperator::Neq if keys.len() == 1 => {
                    FilterValue::Single(keys.into_iter().next().unwrap_or(FieldValue::Null))
                }
                FilterOperator::Eq => {
                    clause.operator = FilterOperator::In;
                    FilterValue::List(keys)
                }
                FilterOperator::Neq => {
                    clause.operator = FilterOperator::NotIn;
                    FilterValue::List(keys)
                }
                _ => FilterValue::List(keys),
            };
            translated.push(clause);
        }
        *filters = translated;
        Ok(true)
    }

    async fn lookup(
        &self,
        store: &dyn EntityStore,
        mapping: &RelationMapping,
        attribute: &str,
        values: &[Value],
        tx: Option<&Transaction>,
    ) -> ResourceResult<Vec<Record>> {
        let attr_type = self
            .registry
            .get(&mapping.related_entity)
            .and_then(|e| e.find_attribute(attribute))
            .map(|a| a.attr_type)
            .unwrap_or(mapping.external_type);
        let values: Vec<FieldValue> = values
            .iter()
            .filter_map(|v| FieldValue::coerce(attr_type, v))
            .filter(|v| !v.is_null())
            .collect();
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let query = StoreQuery::new().filter(FilterClause {
            field: attribute.to_string(),
            path: FieldPath::attribute(attribute),
            operator: FilterOperator::In,
            value: FilterValue::List(values),
        });
        let page = store.query(&mapping.related_entity, &query, tx).await?;
        Ok(page.rows)
    }
}

fn map_record_id(record: &mut Record, id_attribute: &str) {
    if id_attribute == "id" {
        return;
    }
    if let Some(value) = record.shift_remove(id_attribute) {
        record.insert("id".to_string(), value);
    }
}

fn map_included_ids(
    entity: &EntityDescriptor,
    registry: &EntityRegistry,
    record: &mut Record,
    includes: &[IncludeSpec],
) {
    for include in includes {
        let Some(association) = entity.find_association(&include.association) else {
            continue;
        };
        let Some(target) = registry.get(&association.target) else {
            continue;
        };
        let id_attribute = target.default_id_mapping();

        let apply = |nested: &mut Record| {
            map_included_ids(target, registry, nested, &include.include);
            map_record_id(nested, &id_attribute);
        };
        match record.get_mut(&include.association) {
            Some(Value::Object(nested)) => apply(nested),
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(nested) = item {
                        apply(nested);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use crate::core::entity::{Association, Attribute};
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let external = || ConfigLayer::new().set("id_mapping", "external_id");
        EntityRegistry::new()
            .with(
                EntityDescriptor::new("artist")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("external_id", AttributeType::String).unique())
                    .defaults(external()),
            )
            .with(
                EntityDescriptor::new("album")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("external_id", AttributeType::String).unique())
                    .defaults(external()),
            )
            .with(
                EntityDescriptor::new("label")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer)),
            )
            .with(
                EntityDescriptor::new("song")
                    .attribute(Attribute::primary_key("id", AttributeType::Integer))
                    .attribute(Attribute::new("artist_id", AttributeType::Integer))
                    .attribute(Attribute::new("album_id", AttributeType::Integer))
                    .attribute(Attribute::new("label_id", AttributeType::Integer))
                    .association(Association::belongs_to("performer", "artist", "artist_id")),
            )
    }

    fn config(layer: ConfigLayer) -> OperationConfig {
        OperationConfig::from_layer(&layer).unwrap()
    }

    #[test]
    fn test_association_strategy_uses_declared_metadata() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let found = discover_from_associations(song, &registry);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].foreign_key, "artist_id");
        assert_eq!(found[0].related_entity, "artist");
        assert_eq!(found[0].external_field, "external_id");
    }

    #[test]
    fn test_naming_strategy_needs_target_id_mapping() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let found: Vec<_> = discover_from_naming(song, &registry)
            .into_iter()
            .map(|m| m.foreign_key)
            .collect();
        // label declares no id_mapping
        assert_eq!(found, vec!["artist_id", "album_id"]);
    }

    #[test]
    fn test_auto_discovery_can_be_disabled() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let config = config(ConfigLayer::new().set("autoRelationIdMapping", false));
        assert!(resolve_relation_mappings(song, &registry, &config).unwrap().is_empty());
    }

    #[test]
    fn test_explicit_entry_overrides_discovery() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let config = config(ConfigLayer::new().set(
            "relation_id_mapping",
            json!([{"association": "performer", "relatedEntity": "artist", "externalField": "id"}]),
        ));
        let mappings = resolve_relation_mappings(song, &registry, &config).unwrap();
        let artist = mappings.iter().find(|m| m.foreign_key == "artist_id").unwrap();
        assert_eq!(artist.external_field, "id");
        assert!(mappings.iter().any(|m| m.foreign_key == "album_id"));
    }

    #[test]
    fn test_unknown_related_entity_is_skipped() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let config = config(
            ConfigLayer::new()
                .set("auto_relation_id_mapping", false)
                .set(
                    "relation_id_mapping",
                    json!([{"foreign_key": "label_id", "related_entity": "publisher", "external_field": "code"}]),
                ),
        );
        assert!(resolve_relation_mappings(song, &registry, &config).unwrap().is_empty());
    }

    #[test]
    fn test_missing_external_field_fails() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let config = config(ConfigLayer::new().set(
            "relation_id_mapping",
            json!([{"foreign_key": "label_id", "related_entity": "label", "external_field": "code"}]),
        ));
        let err = resolve_relation_mappings(song, &registry, &config).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_outbound_id_strips_raw_key() {
        let registry = registry();
        let artist = registry.get("artist").unwrap();
        let config = config(artist.defaults.clone());
        let mapper = IdentifierMapper::new(artist, &registry, &config).unwrap();

        let mut record: Record = json!({"id": 7, "external_id": "art-1", "name": "X"})
            .as_object()
            .cloned()
            .unwrap();
        mapper.outbound_id(&mut record);
        assert_eq!(record.get("id"), Some(&json!("art-1")));
        assert!(!record.contains_key("external_id"));
    }

    #[test]
    fn test_key_filter_for_uncoercible_id_is_not_found() {
        let registry = registry();
        let label = registry.get("label").unwrap();
        let mapper = IdentifierMapper::new(label, &registry, &OperationConfig::default()).unwrap();
        let err = mapper.key_filter("abc").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
        assert!(mapper.key_filter("12").is_ok());
    }

    #[test]
    fn test_included_ids_are_mapped_recursively() {
        let registry = registry();
        let song = registry.get("song").unwrap();
        let mut record: Record = json!({
            "id": 1,
            "performer": {"id": 7, "external_id": "art-1"},
        })
        .as_object()
        .cloned()
        .unwrap();
        let mapper = IdentifierMapper::new(song, &registry, &OperationConfig::default()).unwrap();
        mapper.outbound_includes(&mut record, &[IncludeSpec::new("performer")]);
        assert_eq!(record["performer"], json!({"id": "art-1"}));
    }
}
