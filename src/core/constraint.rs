//! Filter and order constraint parsing
//!
//! Raw filter keys look like `field` or `field:operator`; order input is a
//! comma-separated field list where a leading `-` means descending. Fields may
//! be dotted paths through declared associations (`artist.name`,
//! `album.label.country`), or names introduced by flattening, which are
//! rewritten to the equivalent dotted path.
//!
//! Every field goes through the same steps, and the first failure aborts the
//! whole request:
//!
//! 1. resolve the external name (flattened name, `id`, field alias)
//! 2. reject if block-listed
//! 3. reject if an allow-list is configured and the field is not on it
//! 4. resolve the complete path against entity metadata
//! 5. coerce the value to the attribute's declared type

use crate::config::OperationConfig;
use crate::core::alias::FieldAliases;
use crate::core::entity::{Association, Attribute, EntityDescriptor};
use crate::core::error::{BadRequestError, FieldUsage, ResourceResult};
use crate::core::field::{AttributeType, FieldValue};
use crate::core::registry::EntityRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Supported filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ieq,
    Icontains,
    NotIcontains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Neq,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => FilterOperator::Eq,
            "ieq" => FilterOperator::Ieq,
            "icontains" => FilterOperator::Icontains,
            "not_icontains" => FilterOperator::NotIcontains,
            "starts_with" => FilterOperator::StartsWith,
            "ends_with" => FilterOperator::EndsWith,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "neq" => FilterOperator::Neq,
            "in" => FilterOperator::In,
            "not_in" => FilterOperator::NotIn,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ieq => "ieq",
            FilterOperator::Icontains => "icontains",
            FilterOperator::NotIcontains => "not_icontains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Neq => "neq",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
        }
    }

    /// Operators that only make sense on string attributes
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            FilterOperator::Ieq
                | FilterOperator::Icontains
                | FilterOperator::NotIcontains
                | FilterOperator::StartsWith
                | FilterOperator::EndsWith
        )
    }

    /// Operators taking a comma-separated value list
    pub fn is_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }

    /// Operators usable on identifier fields that need key translation
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            FilterOperator::Eq | FilterOperator::Neq | FilterOperator::In | FilterOperator::NotIn
        )
    }

    /// Evaluate the operator against one candidate value
    ///
    /// Mirrors SQL semantics: a null candidate only matches `eq null`.
    pub fn matches(&self, candidate: &FieldValue, value: &FilterValue) -> bool {
        if candidate.is_null() {
            return matches!((self, value), (FilterOperator::Eq, FilterValue::Single(v)) if v.is_null());
        }

        let equal = |a: &FieldValue, b: &FieldValue| a.compare(b) == Some(Ordering::Equal);
        let lower = |v: &FieldValue| v.as_string().map(str::to_lowercase);

        match (self, value) {
            (FilterOperator::In, FilterValue::List(values)) => values.iter().any(|v| equal(candidate, v)),
            (FilterOperator::NotIn, FilterValue::List(values)) => {
                !values.iter().any(|v| equal(candidate, v))
            }
            (_, FilterValue::List(_)) | (FilterOperator::In | FilterOperator::NotIn, _) => false,
            (op, FilterValue::Single(v)) => match op {
                FilterOperator::Eq => equal(candidate, v),
                FilterOperator::Neq => !equal(candidate, v),
                FilterOperator::Ieq => lower(candidate).is_some() && lower(candidate) == lower(v),
                FilterOperator::Icontains | FilterOperator::NotIcontains => {
                    let contains = match (lower(candidate), lower(v)) {
                        (Some(c), Some(v)) => c.contains(&v),
                        _ => false,
                    };
                    contains == (*op == FilterOperator::Icontains)
                }
                FilterOperator::StartsWith => match (candidate.as_string(), v.as_string()) {
                    (Some(c), Some(v)) => c.starts_with(v),
                    _ => false,
                },
                FilterOperator::EndsWith => match (candidate.as_string(), v.as_string()) {
                    (Some(c), Some(v)) => c.ends_with(v),
                    _ => false,
                },
                FilterOperator::Gt => candidate.compare(v) == Some(Ordering::Greater),
                FilterOperator::Gte => matches!(
                    candidate.compare(v),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                FilterOperator::Lt => candidate.compare(v) == Some(Ordering::Less),
                FilterOperator::Lte => {
                    matches!(candidate.compare(v), Some(Ordering::Less | Ordering::Equal))
                }
                FilterOperator::In | FilterOperator::NotIn => false,
            },
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC", alias = "asc", alias = "Asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc", alias = "Desc")]
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Attribute address, possibly through associations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub associations: Vec<String>,
    pub attribute: String,
}

impl FieldPath {
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            associations: Vec::new(),
            attribute: name.into(),
        }
    }

    pub fn parse(dotted: &str) -> Self {
        let mut segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        let attribute = segments.pop().unwrap_or_default();
        Self {
            associations: segments,
            attribute,
        }
    }

    pub fn is_root(&self) -> bool {
        self.associations.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for association in &self.associations {
            write!(f, "{association}.")?;
        }
        f.write_str(&self.attribute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(FieldValue),
    List(Vec<FieldValue>),
}

impl FilterValue {
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Single(v) => v.to_json(),
            FilterValue::List(values) => Value::Array(values.iter().map(FieldValue::to_json).collect()),
        }
    }
}

/// A validated filter instruction
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Field as the client spelled it
    pub field: String,
    pub path: FieldPath,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterClause {
    /// Equality on a root attribute, used for injected constraints
    pub fn equals(attribute: &str, value: FieldValue) -> Self {
        Self {
            field: attribute.to_string(),
            path: FieldPath::attribute(attribute),
            operator: FilterOperator::Eq,
            value: FilterValue::Single(value),
        }
    }

    pub fn to_meta(&self) -> Value {
        json!({
            "field": self.field,
            "operator": self.operator.as_str(),
            "value": self.value.to_json(),
        })
    }
}

/// A validated order instruction
#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    pub field: String,
    pub path: FieldPath,
    pub direction: SortDirection,
}

impl OrderClause {
    pub fn to_meta(&self) -> Value {
        json!({ "order_by": self.field, "direction": self.direction.as_str() })
    }
}

/// Walk `path` from `entity` through declared associations
///
/// Right after a many-to-many step, a segment naming its join entity moves
/// onto the join row (`tags.song_tag.weight`). On failure returns the name of
/// the entity where resolution stopped.
pub fn resolve_attribute<'r>(
    entity: &'r EntityDescriptor,
    registry: &'r EntityRegistry,
    path: &FieldPath,
) -> Result<&'r Attribute, String> {
    let mut current = entity;
    let mut via: Option<&'r Association> = None;
    for segment in &path.associations {
        let next = match current.find_association(segment) {
            Some(association) => {
                via = Some(association);
                &association.target
            }
            None => {
                let through = via
                    .and_then(|a| a.through.as_ref())
                    .filter(|t| t.entity == *segment)
                    .ok_or_else(|| current.name.clone())?;
                via = None;
                &through.entity
            }
        };
        current = registry
            .get(next)
            .map(|target| target.as_ref())
            .ok_or_else(|| current.name.clone())?;
    }
    current
        .find_attribute(&path.attribute)
        .ok_or_else(|| current.name.clone())
}

/// Resolves and validates filter/order input for one operation
pub struct ConstraintParser<'a> {
    entity: &'a EntityDescriptor,
    registry: &'a EntityRegistry,
    config: &'a OperationConfig,
    aliases: &'a FieldAliases,
    flattened: &'a IndexMap<String, FieldPath>,
    /// Root attributes whose filter values are external ids of another entity
    external_types: HashMap<String, AttributeType>,
}

impl<'a> ConstraintParser<'a> {
    pub fn new(
        entity: &'a EntityDescriptor,
        registry: &'a EntityRegistry,
        config: &'a OperationConfig,
        aliases: &'a FieldAliases,
        flattened: &'a IndexMap<String, FieldPath>,
    ) -> Self {
        Self {
            entity,
            registry,
            config,
            aliases,
            flattened,
            external_types: HashMap::new(),
        }
    }

    /// Coerce values of `attribute` to `attr_type` instead of its own type
    ///
    /// Used for foreign keys whose filter values are the related entity's
    /// external ids and get translated after parsing.
    pub fn with_external_type(mut self, attribute: &str, attr_type: AttributeType) -> Self {
        self.external_types.insert(attribute.to_string(), attr_type);
        self
    }

    /// External field name to internal dotted path
    pub fn resolve_name(&self, external: &str) -> String {
        if let Some(path) = self.flattened.get(external) {
            return path.to_string();
        }
        if external == "id" {
            return self.config.id_attribute(self.entity).to_string();
        }
        self.aliases.internal(external).to_string()
    }

    /// Block-list first, then allow-list
    ///
    /// Lists may name the field by its external spelling or its internal path.
    fn check_lists(&self, external: &str, internal: &str, usage: FieldUsage) -> ResourceResult<()> {
        let (allow, block) = match usage {
            FieldUsage::Filtering => (&self.config.allow_filtering_on, &self.config.block_filtering_on),
            FieldUsage::Ordering => (&self.config.allow_ordering_on, &self.config.block_ordering_on),
            FieldUsage::Writing => (&self.config.allowed_fields, &self.config.blocked_fields),
        };
        let listed = |list: &Vec<String>| list.iter().any(|f| f == external || f == internal);

        let disallowed = block.as_ref().is_some_and(listed)
            || allow.as_ref().is_some_and(|list| !listed(list));
        if disallowed {
            return Err(BadRequestError::DisallowedField {
                field: external.to_string(),
                usage,
            }
            .into());
        }
        Ok(())
    }

    /// Walk a dotted path through associations to its attribute
    pub fn resolve_path(&self, external: &str, internal: &str) -> ResourceResult<(FieldPath, &'a Attribute)> {
        let path = FieldPath::parse(internal);

        // shadowed internal names are only reachable through their alias
        if path.is_root() && internal == external && self.aliases.is_shadowed(external) {
            return Err(BadRequestError::UnknownField {
                entity: self.entity.name.clone(),
                field: external.to_string(),
            }
            .into());
        }

        let attribute = resolve_attribute(self.entity, self.registry, &path).map_err(|entity| {
            BadRequestError::UnknownField {
                entity,
                field: external.to_string(),
            }
        })?;
        Ok((path, attribute))
    }

    fn coerce(&self, field: &str, attr_type: AttributeType, raw: &Value) -> ResourceResult<FieldValue> {
        FieldValue::coerce(attr_type, raw).ok_or_else(|| {
            BadRequestError::InvalidValue {
                field: field.to_string(),
                expected: attr_type.label(),
                value: raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string()),
            }
            .into()
        })
    }

    /// Parse one `field[:operator]` key with its raw value
    pub fn parse_filter(&self, key: &str, raw: &Value) -> ResourceResult<FilterClause> {
        let (field, operator) = match key.split_once(':') {
            Some((field, op)) => {
                let operator = FilterOperator::parse(op).ok_or_else(|| BadRequestError::UnknownOperator {
                    field: field.to_string(),
                    operator: op.to_string(),
                })?;
                (field, operator)
            }
            None => (key, FilterOperator::Eq),
        };

        let internal = self.resolve_name(field);
        self.check_lists(field, &internal, FieldUsage::Filtering)?;
        let (path, attribute) = self.resolve_path(field, &internal)?;

        let external_type = path
            .is_root()
            .then(|| self.external_types.get(&path.attribute).copied())
            .flatten();
        let attr_type = external_type.unwrap_or(attribute.attr_type);

        if operator.is_textual() && !attr_type.is_textual() {
            return Err(BadRequestError::UnsupportedOperator {
                field: field.to_string(),
                operator: operator.to_string(),
            }
            .into());
        }
        if external_type.is_some() && !operator.is_identity() {
            return Err(BadRequestError::UnsupportedOperator {
                field: field.to_string(),
                operator: operator.to_string(),
            }
            .into());
        }

        let value = if operator.is_list() {
            let items: Vec<Value> = match raw {
                Value::Array(items) => items.clone(),
                Value::String(s) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
                other => vec![other.clone()],
            };
            let values = items
                .iter()
                .map(|item| self.coerce(field, attr_type, item))
                .collect::<ResourceResult<Vec<_>>>()?;
            FilterValue::List(values)
        } else {
            FilterValue::Single(self.coerce(field, attr_type, raw)?)
        };

        // plain equality on strings is case-insensitive
        let operator = if operator == FilterOperator::Eq
            && attr_type.is_textual()
            && external_type.is_none()
        {
            FilterOperator::Ieq
        } else {
            operator
        };

        Ok(FilterClause {
            field: field.to_string(),
            path,
            operator,
            value,
        })
    }

    pub fn parse_filters<'k, I>(&self, filters: I) -> ResourceResult<Vec<FilterClause>>
    where
        I: IntoIterator<Item = (&'k str, &'k Value)>,
    {
        filters
            .into_iter()
            .map(|(key, value)| self.parse_filter(key, value))
            .collect()
    }

    /// Validate one order field with an explicit direction
    pub fn parse_order_field(&self, field: &str, direction: SortDirection) -> ResourceResult<OrderClause> {
        let internal = self.resolve_name(field);
        self.check_lists(field, &internal, FieldUsage::Ordering)?;
        let (path, _) = self.resolve_path(field, &internal)?;
        Ok(OrderClause {
            field: field.to_string(),
            path,
            direction,
        })
    }

    /// Parse `a,-b,+c`; unprefixed fields take `default_direction`
    ///
    /// Validation is atomic: one bad field fails the whole list.
    pub fn parse_order(&self, order_by: &str, default_direction: SortDirection) -> ResourceResult<Vec<OrderClause>> {
        order_by
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| match entry.strip_prefix('-') {
                Some(field) => self.parse_order_field(field, SortDirection::Desc),
                None => {
                    let field = entry.strip_prefix('+').unwrap_or(entry);
                    self.parse_order_field(field, default_direction)
                }
            })
            .collect()
    }

    /// Configured fallback ordering, exempt from the ordering lists
    ///
    /// Yields nothing when the field does not resolve on this entity.
    pub fn default_order(&self, field: &str, direction: SortDirection) -> Option<OrderClause> {
        let internal = self.resolve_name(field);
        let path = FieldPath::parse(&internal);
        resolve_attribute(self.entity, self.registry, &path).ok()?;
        Some(OrderClause {
            field: field.to_string(),
            path,
            direction,
        })
    }

    /// Check a payload field against the write allow/block lists
    pub fn check_write_field(&self, field: &str) -> ResourceResult<()> {
        if self.aliases.is_shadowed(field) {
            return Err(BadRequestError::UnknownField {
                entity: self.entity.name.clone(),
                field: field.to_string(),
            }
            .into());
        }
        self.check_lists(field, self.aliases.internal(field), FieldUsage::Writing)
    }
}
