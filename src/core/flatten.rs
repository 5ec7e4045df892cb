//! Flattening of associated attributes onto the root record
//!
//! ```yaml
//! flattening:
//!   - model: artist
//!     as: performer
//!     attributes: [name, [country, artist_country]]
//! ```
//!
//! turns `{id, title, performer: {name, country}}` into
//! `{id, title, name, artist_country}`. The planner also makes sure the store
//! loads the association: an explicit include for it is reused, otherwise one
//! is synthesized. Flattened names become addressable by filters and order
//! fields through [`FlatteningPlan::paths`].
//!
//! Collection associations fan out: a record with three tags flattened from a
//! many-to-many association is emitted as three rows.

use crate::core::constraint::FieldPath;
use crate::core::entity::{Association, Cardinality, EntityDescriptor};
use crate::core::error::{BadRequestError, ResourceResult};
use crate::core::registry::EntityRegistry;
use crate::core::store::{IncludeSpec, Record, ThroughInclude};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `name` or `[source, alias]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlattenedAttribute {
    Plain(String),
    Renamed(String, String),
}

impl FlattenedAttribute {
    pub fn source(&self) -> &str {
        match self {
            FlattenedAttribute::Plain(name) | FlattenedAttribute::Renamed(name, _) => name,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            FlattenedAttribute::Plain(name) | FlattenedAttribute::Renamed(_, name) => name,
        }
    }
}

/// Join-row options of a many-to-many flattening
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenThrough {
    /// Join attributes projected onto the root record
    #[serde(default)]
    pub attributes: Vec<FlattenedAttribute>,
    /// Equality constraints on join rows
    #[serde(default, rename = "where", alias = "filter")]
    pub filter: Map<String, Value>,
}

/// One configured flattening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatteningSpec {
    #[serde(alias = "model", alias = "relatedEntity")]
    pub related_entity: String,
    /// Association name; defaults to the association targeting `related_entity`
    #[serde(default, rename = "as", alias = "alias", alias = "association")]
    pub association: Option<String>,
    pub attributes: Vec<FlattenedAttribute>,
    #[serde(default)]
    pub through: Option<FlattenThrough>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone)]
struct PlannedFlattening {
    association: String,
    collection: bool,
    /// Attribute of the related entity exposed as its `id`
    ///
    /// Included records are id-mapped before projection, so this attribute is
    /// read back from `id`.
    id_attribute: String,
    /// Key the join row is nested under in each related item
    through_entity: Option<String>,
    attributes: Vec<FlattenedAttribute>,
    join_attributes: Vec<FlattenedAttribute>,
}

/// Validated flattening for one operation
#[derive(Debug, Clone, Default)]
pub struct FlatteningPlan {
    entries: Vec<PlannedFlattening>,
}

fn invalid(message: String) -> BadRequestError {
    BadRequestError::InvalidConfig { message }
}

fn find_association<'e>(
    entity: &'e EntityDescriptor,
    spec: &FlatteningSpec,
) -> Result<&'e Association, BadRequestError> {
    let association = match &spec.association {
        Some(name) => entity.find_association(name),
        None => entity
            .associations
            .iter()
            .find(|a| a.target == spec.related_entity),
    };
    let association = association.ok_or_else(|| {
        invalid(format!(
            "flattening: {} has no association to {}{}",
            entity.name,
            spec.related_entity,
            spec.association
                .as_deref()
                .map(|a| format!(" named '{a}'"))
                .unwrap_or_default()
        ))
    })?;
    if association.target != spec.related_entity {
        return Err(invalid(format!(
            "flattening: association '{}' targets {}, not {}",
            association.name, association.target, spec.related_entity
        )));
    }
    Ok(association)
}

fn through_include(through: &FlattenThrough) -> ThroughInclude {
    ThroughInclude {
        attributes: Some(through.attributes.iter().map(|a| a.source().to_string()).collect()),
        filter: through.filter.clone(),
    }
}

/// Fold a flattening's join options into an explicit include
///
/// Join constraints accumulate; the same join attribute constrained to two
/// different values is a configuration error.
fn merge_through(
    association: &str,
    include: &mut IncludeSpec,
    through: &FlattenThrough,
) -> Result<(), BadRequestError> {
    let Some(existing) = include.through.as_mut() else {
        include.through = Some(through_include(through));
        return Ok(());
    };

    for (field, expected) in &through.filter {
        match existing.filter.get(field) {
            Some(current) if current != expected => {
                return Err(invalid(format!(
                    "flattening: join constraint '{field}' on '{association}' conflicts with its include"
                )));
            }
            Some(_) => {}
            None => {
                existing.filter.insert(field.clone(), expected.clone());
            }
        }
    }
    if let Some(loaded) = existing.attributes.as_mut() {
        for attribute in &through.attributes {
            if !loaded.iter().any(|a| a == attribute.source()) {
                loaded.push(attribute.source().to_string());
            }
        }
    }
    Ok(())
}

impl FlatteningPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate specs against entity metadata and merge their includes
    ///
    /// An explicit include for a flattened association must target the
    /// declared entity; it is reused rather than duplicated.
    pub fn build(
        entity: &EntityDescriptor,
        registry: &EntityRegistry,
        specs: &[FlatteningSpec],
        includes: &mut Vec<IncludeSpec>,
    ) -> ResourceResult<Self> {
        let mut entries = Vec::with_capacity(specs.len());

        for spec in specs {
            let association = find_association(entity, spec)?;
            let target = registry.get(&spec.related_entity).ok_or_else(|| {
                invalid(format!("flattening: unknown entity {}", spec.related_entity))
            })?;

            for attribute in &spec.attributes {
                if !target.has_attribute(attribute.source()) {
                    return Err(invalid(format!(
                        "flattening: {} has no attribute '{}'",
                        target.name,
                        attribute.source()
                    ))
                    .into());
                }
            }

            let through_entity = association.through.as_ref().map(|t| t.entity.clone());
            let join_attributes = spec
                .through
                .as_ref()
                .map(|t| t.attributes.clone())
                .unwrap_or_default();
            if spec.through.is_some() {
                let join = through_entity
                    .as_deref()
                    .and_then(|name| registry.get(name))
                    .ok_or_else(|| {
                        invalid(format!(
                            "flattening: 'through' needs a many-to-many association, '{}' is not one",
                            association.name
                        ))
                    })?;
                if let Some(missing) = join_attributes
                    .iter()
                    .find(|a| !join.has_attribute(a.source()))
                {
                    return Err(invalid(format!(
                        "flattening: {} has no attribute '{}'",
                        join.name,
                        missing.source()
                    ))
                    .into());
                }
            }

            match includes.iter_mut().find(|i| i.association == association.name) {
                Some(existing) => {
                    if let Some(found) = existing
                        .entity
                        .as_deref()
                        .filter(|found| *found != spec.related_entity)
                    {
                        return Err(BadRequestError::IncludeMismatch {
                            association: association.name.clone(),
                            expected: spec.related_entity.clone(),
                            found: found.to_string(),
                        }
                        .into());
                    }
                    if let Some(loaded) = existing.attributes.as_mut() {
                        for attribute in &spec.attributes {
                            if !loaded.iter().any(|a| a == attribute.source()) {
                                loaded.push(attribute.source().to_string());
                            }
                        }
                    }
                    existing.required |= spec.required;
                    if let Some(through) = &spec.through {
                        merge_through(&association.name, existing, through)?;
                    }
                }
                None => {
                    tracing::debug!(
                        entity = %entity.name,
                        association = %association.name,
                        "synthesizing include for flattening"
                    );
                    let mut include = IncludeSpec::new(&association.name)
                        .entity(&spec.related_entity)
                        .required(spec.required);
                    include.through = spec.through.as_ref().map(through_include);
                    includes.push(include);
                }
            }

            entries.push(PlannedFlattening {
                association: association.name.clone(),
                collection: association.cardinality.is_collection(),
                id_attribute: target.default_id_mapping(),
                through_entity: through_entity.filter(|_| association.cardinality == Cardinality::BelongsToMany),
                attributes: spec.attributes.clone(),
                join_attributes,
            });
        }

        Ok(Self { entries })
    }

    /// Flattened name to the dotted path it stands for
    ///
    /// Join attributes map through the join entity: `tag_weight` stands for
    /// `tags.song_tag.weight`.
    pub fn paths(&self) -> IndexMap<String, FieldPath> {
        let mut paths = IndexMap::new();
        for entry in &self.entries {
            for attribute in &entry.attributes {
                paths.insert(
                    attribute.alias().to_string(),
                    FieldPath {
                        associations: vec![entry.association.clone()],
                        attribute: attribute.source().to_string(),
                    },
                );
            }
            let Some(through_entity) = &entry.through_entity else {
                continue;
            };
            for attribute in &entry.join_attributes {
                paths.insert(
                    attribute.alias().to_string(),
                    FieldPath {
                        associations: vec![entry.association.clone(), through_entity.clone()],
                        attribute: attribute.source().to_string(),
                    },
                );
            }
        }
        paths
    }

    /// Project every planned association onto its root records
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        self.entries.iter().fold(records, |records, entry| {
            records
                .into_iter()
                .flat_map(|record| entry.apply(record))
                .collect()
        })
    }
}

impl PlannedFlattening {
    fn project(&self, record: &mut Record, related: Option<&Record>) {
        for attribute in &self.attributes {
            let source = if attribute.source() == self.id_attribute {
                "id"
            } else {
                attribute.source()
            };
            let value = related
                .and_then(|r| r.get(source))
                .cloned()
                .unwrap_or(Value::Null);
            record.insert(attribute.alias().to_string(), value);
        }

        let join = related.and_then(|r| {
            self.through_entity
                .as_deref()
                .and_then(|name| r.get(name))
                .and_then(Value::as_object)
        });
        for attribute in &self.join_attributes {
            let value = join
                .and_then(|j| j.get(attribute.source()))
                .cloned()
                .unwrap_or(Value::Null);
            record.insert(attribute.alias().to_string(), value);
        }
    }

    fn apply(&self, mut record: Record) -> Vec<Record> {
        let nested = record.shift_remove(&self.association);

        if !self.collection {
            let related = nested.as_ref().and_then(Value::as_object);
            self.project(&mut record, related);
            return vec![record];
        }

        let items: Vec<&Record> = nested
            .as_ref()
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();
        if items.is_empty() {
            self.project(&mut record, None);
            return vec![record];
        }

        items
            .into_iter()
            .map(|item| {
                let mut row = record.clone();
                self.project(&mut row, Some(item));
                row
            })
            .collect()
    }
}
