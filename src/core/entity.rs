//! Entity metadata: attribute schema, associations and per-entity defaults
//!
//! An [`EntityDescriptor`] is everything the pipeline knows about a stored
//! entity. Descriptors are built once when resources are mounted and are
//! shared read-only afterwards.

use crate::config::ConfigLayer;
use crate::core::field::{AttributeType, FieldFormat};

/// A single attribute of an entity
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttributeType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub format: Option<FieldFormat>,
}

impl Attribute {
    /// A nullable, non-unique attribute
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            nullable: true,
            unique: false,
            primary_key: false,
            format: None,
        }
    }

    /// The primary key attribute (unique, never null)
    pub fn primary_key(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            primary_key: true,
            unique: true,
            nullable: false,
            ..Self::new(name, attr_type)
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Cardinality of an association, seen from the declaring entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Foreign key lives on the declaring entity
    BelongsTo,
    /// Foreign key lives on the target entity, at most one match
    HasOne,
    /// Foreign key lives on the target entity
    HasMany,
    /// Join rows in a through entity connect both sides
    BelongsToMany,
}

impl Cardinality {
    pub fn is_collection(&self) -> bool {
        matches!(self, Cardinality::HasMany | Cardinality::BelongsToMany)
    }
}

/// Join entity of a many-to-many association
#[derive(Debug, Clone)]
pub struct Through {
    /// Join entity name
    pub entity: String,
    /// Join attribute referencing the declaring entity's primary key
    pub source_key: String,
    /// Join attribute referencing the target entity's primary key
    pub target_key: String,
}

/// A declared association to another entity
#[derive(Debug, Clone)]
pub struct Association {
    /// Name under which included data is nested (e.g. "artist")
    pub name: String,
    /// Target entity name
    pub target: String,
    /// Foreign-key attribute; unused for many-to-many
    pub foreign_key: String,
    pub cardinality: Cardinality,
    pub through: Option<Through>,
}

impl Association {
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            cardinality: Cardinality::BelongsTo,
            through: None,
        }
    }

    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::HasOne,
            ..Self::belongs_to(name, target, foreign_key)
        }
    }

    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::HasMany,
            ..Self::belongs_to(name, target, foreign_key)
        }
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: Through,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            foreign_key: String::new(),
            cardinality: Cardinality::BelongsToMany,
            through: Some(through),
        }
    }
}

/// Schema and defaults of one entity
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub associations: Vec<Association>,
    /// Entity-level configuration defaults (e.g. its `id_mapping`)
    pub defaults: ConfigLayer,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            associations: Vec::new(),
            defaults: ConfigLayer::default(),
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn defaults(mut self, defaults: ConfigLayer) -> Self {
        self.defaults = defaults;
        self
    }

    /// Name of the primary key attribute
    ///
    /// Entities without an explicit primary key fall back to `id`.
    pub fn primary_key(&self) -> &str {
        self.attributes
            .iter()
            .find(|a| a.primary_key)
            .map(|a| a.name.as_str())
            .unwrap_or("id")
    }

    pub fn primary_key_attribute(&self) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.primary_key)
    }

    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.find_attribute(name).is_some()
    }

    pub fn find_association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// The belongs-to association that owns a foreign-key attribute
    pub fn association_for_foreign_key(&self, foreign_key: &str) -> Option<&Association> {
        self.associations
            .iter()
            .find(|a| a.cardinality == Cardinality::BelongsTo && a.foreign_key == foreign_key)
    }

    /// The external id attribute this entity declares in its own defaults
    pub fn default_id_mapping(&self) -> String {
        self.defaults
            .get_str("id_mapping")
            .map(str::to_string)
            .unwrap_or_else(|| self.primary_key().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn song() -> EntityDescriptor {
        EntityDescriptor::new("song")
            .attribute(Attribute::primary_key("id", AttributeType::Integer))
            .attribute(Attribute::new("title", AttributeType::String).required())
            .attribute(Attribute::new("artist_id", AttributeType::Integer))
            .association(Association::belongs_to("artist", "artist", "artist_id"))
    }

    #[test]
    fn test_primary_key_lookup() {
        let entity = song();
        assert_eq!(entity.primary_key(), "id");
        assert!(entity.find_attribute("title").is_some_and(|a| !a.nullable));
        assert!(!entity.has_attribute("missing"));
    }

    #[test]
    fn test_association_for_foreign_key() {
        let entity = song();
        let assoc = entity.association_for_foreign_key("artist_id").unwrap();
        assert_eq!(assoc.target, "artist");
        assert!(entity.association_for_foreign_key("title").is_none());
        assert!(!assoc.cardinality.is_collection());
    }

    #[test]
    fn test_default_id_mapping_reads_entity_defaults() {
        assert_eq!(song().default_id_mapping(), "id");

        let mapped = EntityDescriptor::new("artist")
            .attribute(Attribute::primary_key("id", AttributeType::Integer))
            .defaults(ConfigLayer::from_json(json!({"idMapping": "external_id"})).unwrap());
        assert_eq!(mapped.default_id_mapping(), "external_id");
    }
}
