//! Layered operation configuration
//!
//! Configuration for one mounted operation is assembled from ordered partial
//! layers, later layers winning per key:
//!
//! 1. global defaults
//! 2. operation-type defaults (`list`, `create`, ...)
//! 3. the entity's own defaults ([`EntityDescriptor::defaults`])
//! 4. a named context
//! 5. the per-mount override
//!
//! Hook lists (`pre`/`post`) are replaced wholesale by the most specific layer
//! that defines them. Every key may be spelled in snake_case or camelCase; keys
//! are canonicalized to snake_case when a layer is built, and when both
//! spellings appear in one layer the snake_case one wins.

use crate::core::constraint::SortDirection;
use crate::core::entity::EntityDescriptor;
use crate::core::error::ConfigError;
use crate::core::flatten::FlatteningSpec;
use crate::core::identifier::RelationMappingConfig;
use crate::core::store::IncludeSpec;
use crate::operation::hooks::HookList;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// The resource operations a mount exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    Search,
    Single,
    Create,
    Update,
    Patch,
    Destroy,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::List,
        OperationKind::Search,
        OperationKind::Single,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Patch,
        OperationKind::Destroy,
    ];

    /// Write operations run inside a transaction
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Update
                | OperationKind::Patch
                | OperationKind::Destroy
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::Search => "search",
            OperationKind::Single => "single",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Patch => "patch",
            OperationKind::Destroy => "destroy",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a configuration key to its canonical snake_case spelling
///
/// `idMapping` and `id_mapping` both become `id_mapping`.
pub fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// One partial configuration layer
#[derive(Clone, Default)]
pub struct ConfigLayer {
    values: Map<String, Value>,
    /// Canonical keys that were set through their snake_case spelling
    snake_spelled: HashSet<String>,
    pre: Option<HookList>,
    post: Option<HookList>,
}

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layer from a JSON object, canonicalizing its keys
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::InvalidValue {
                field: "layer".to_string(),
                message: format!("expected an object, got {other}"),
            }),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut layer = Self::default();
        for (key, value) in map {
            layer.insert(&key, value);
        }
        layer
    }

    fn insert(&mut self, key: &str, value: Value) {
        let canonical = canonical_key(key);
        if canonical == key {
            self.snake_spelled.insert(canonical.clone());
            self.values.insert(canonical, value);
        } else if !self.snake_spelled.contains(&canonical) {
            self.values.insert(canonical, value);
        }
    }

    /// Set a key (either spelling)
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Hooks run before the store call
    pub fn pre(mut self, hooks: impl Into<HookList>) -> Self {
        self.pre = Some(hooks.into());
        self
    }

    /// Hooks run after the store call
    pub fn post(mut self, hooks: impl Into<HookList>) -> Self {
        self.post = Some(hooks.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&canonical_key(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.pre.is_none() && self.post.is_none()
    }

    /// Overlay a more specific layer on top of this one
    pub fn merge(&mut self, other: &ConfigLayer) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        if other.pre.is_some() {
            self.pre = other.pre.clone();
        }
        if other.post.is_some() {
            self.post = other.post.clone();
        }
    }
}

impl fmt::Debug for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLayer")
            .field("values", &self.values)
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish()
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
    })
}

fn default_page_size() -> usize {
    100
}

fn default_order_by() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

/// Fully resolved configuration of one mounted operation
#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    #[serde(default)]
    pub allow_filtering_on: Option<Vec<String>>,
    #[serde(default)]
    pub block_filtering_on: Option<Vec<String>>,
    #[serde(default)]
    pub allow_ordering_on: Option<Vec<String>>,
    #[serde(default)]
    pub block_ordering_on: Option<Vec<String>>,

    /// Payload fields accepted by create/update/patch
    #[serde(default)]
    pub allowed_fields: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_fields: Option<Vec<String>>,

    /// Attribute exposed as `id`; `None` means the primary key
    #[serde(default)]
    pub id_mapping: Option<String>,

    /// External name -> internal attribute
    #[serde(default)]
    pub field_aliases: IndexMap<String, String>,

    #[serde(default)]
    pub relation_id_mapping: Vec<RelationMappingConfig>,
    #[serde(default = "default_true")]
    pub auto_relation_id_mapping: bool,

    #[serde(default, deserialize_with = "one_or_many")]
    pub flattening: Vec<FlatteningSpec>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub include: Vec<IncludeSpec>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_order_by")]
    pub default_order_by: String,
    #[serde(default)]
    pub default_order_dir: SortDirection,

    #[serde(default)]
    pub meta_show_filtering: bool,
    #[serde(default)]
    pub meta_show_ordering: bool,

    #[serde(skip)]
    pub pre: HookList,
    #[serde(skip)]
    pub post: HookList,

    /// Every canonical key of the merged layers, including ones only hooks read
    #[serde(skip)]
    raw: Map<String, Value>,
}

impl OperationConfig {
    /// Resolve a merged layer into typed configuration
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self, ConfigError> {
        // null means "unset" for every key
        let values: Map<String, Value> = layer
            .values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut config: OperationConfig = serde_json::from_value(Value::Object(values.clone()))
            .map_err(|e| ConfigError::InvalidValue {
                field: "operation config".to_string(),
                message: e.to_string(),
            })?;
        config.pre = layer.pre.clone().unwrap_or_default();
        config.post = layer.post.clone().unwrap_or_default();
        config.raw = values;
        Ok(config)
    }

    /// Read any configuration key by either spelling
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.raw.get(&canonical_key(key))
    }

    /// The attribute serving as external `id` for this entity
    pub fn id_attribute<'a>(&'a self, entity: &'a EntityDescriptor) -> &'a str {
        self.id_mapping.as_deref().unwrap_or(entity.primary_key())
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            allow_filtering_on: None,
            block_filtering_on: None,
            allow_ordering_on: None,
            block_ordering_on: None,
            allowed_fields: None,
            blocked_fields: None,
            id_mapping: None,
            field_aliases: IndexMap::new(),
            relation_id_mapping: Vec::new(),
            auto_relation_id_mapping: true,
            flattening: Vec::new(),
            include: Vec::new(),
            page_size: default_page_size(),
            default_order_by: default_order_by(),
            default_order_dir: SortDirection::Asc,
            meta_show_filtering: false,
            meta_show_ordering: false,
            pre: HookList::new(),
            post: HookList::new(),
            raw: Map::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StackFile {
    #[serde(default)]
    defaults: Map<String, Value>,
    #[serde(default)]
    operations: HashMap<OperationKind, Map<String, Value>>,
    #[serde(default)]
    contexts: HashMap<String, Map<String, Value>>,
}

/// The configuration hierarchy shared by every mounted resource
#[derive(Debug, Clone, Default)]
pub struct ConfigStack {
    pub global: ConfigLayer,
    pub operations: HashMap<OperationKind, ConfigLayer>,
    pub contexts: HashMap<String, ConfigLayer>,
}

impl ConfigStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError {
                file: Some(path.display().to_string()),
                message,
            },
            other => other,
        })
    }

    /// Load configuration from a YAML string
    ///
    /// ```yaml
    /// defaults:
    ///   pageSize: 25
    /// operations:
    ///   list:
    ///     meta_show_ordering: true
    /// contexts:
    ///   public:
    ///     block_filtering_on: [secret]
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: StackFile = serde_yaml::from_str(yaml)?;
        Ok(Self {
            global: ConfigLayer::from_map(file.defaults),
            operations: file
                .operations
                .into_iter()
                .map(|(kind, map)| (kind, ConfigLayer::from_map(map)))
                .collect(),
            contexts: file
                .contexts
                .into_iter()
                .map(|(name, map)| (name, ConfigLayer::from_map(map)))
                .collect(),
        })
    }

    pub fn with_defaults(mut self, layer: ConfigLayer) -> Self {
        self.global.merge(&layer);
        self
    }

    pub fn with_operation(mut self, kind: OperationKind, layer: ConfigLayer) -> Self {
        self.operations.entry(kind).or_default().merge(&layer);
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, layer: ConfigLayer) -> Self {
        self.contexts.entry(name.into()).or_default().merge(&layer);
        self
    }

    /// Merge multiple stacks (e.g. one per module); later stacks win per key
    pub fn merge(stacks: Vec<ConfigStack>) -> Self {
        stacks.into_iter().fold(ConfigStack::default(), |mut acc, stack| {
            acc.global.merge(&stack.global);
            for (kind, layer) in stack.operations {
                acc.operations.entry(kind).or_default().merge(&layer);
            }
            for (name, layer) in stack.contexts {
                acc.contexts.entry(name).or_default().merge(&layer);
            }
            acc
        })
    }

    /// Resolve the effective configuration of one operation on one entity
    pub fn resolve(
        &self,
        kind: OperationKind,
        entity: &EntityDescriptor,
        context: Option<&str>,
        overrides: Option<&ConfigLayer>,
    ) -> Result<OperationConfig, ConfigError> {
        let mut merged = self.global.clone();
        if let Some(layer) = self.operations.get(&kind) {
            merged.merge(layer);
        }
        merged.merge(&entity.defaults);
        if let Some(name) = context {
            let layer = self
                .contexts
                .get(name)
                .ok_or_else(|| ConfigError::UnknownContext {
                    name: name.to_string(),
                })?;
            merged.merge(layer);
        }
        if let Some(layer) = overrides {
            merged.merge(layer);
        }
        OperationConfig::from_layer(&merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::hooks::hook;
    use serde_json::json;

    fn entity() -> EntityDescriptor {
        EntityDescriptor::new("item")
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("idMapping"), "id_mapping");
        assert_eq!(canonical_key("id_mapping"), "id_mapping");
        assert_eq!(canonical_key("allowFilteringOn"), "allow_filtering_on");
        assert_eq!(canonical_key("pre"), "pre");
    }

    #[test]
    fn test_snake_case_wins_within_layer() {
        let layer = ConfigLayer::from_json(json!({
            "idMapping": "camel",
            "id_mapping": "snake",
        }))
        .unwrap();
        assert_eq!(layer.get_str("idMapping"), Some("snake"));

        let layer = ConfigLayer::new()
            .set("id_mapping", "snake")
            .set("idMapping", "camel");
        assert_eq!(layer.get_str("id_mapping"), Some("snake"));
    }

    #[test]
    fn test_later_layers_win_per_key() {
        let stack = ConfigStack::new()
            .with_defaults(ConfigLayer::new().set("page_size", 10).set("meta_show_ordering", true))
            .with_operation(OperationKind::List, ConfigLayer::new().set("pageSize", 20))
            .with_context("narrow", ConfigLayer::new().set("allow_ordering_on", json!(["name"])));

        let config = stack
            .resolve(OperationKind::List, &entity(), Some("narrow"), None)
            .unwrap();
        assert_eq!(config.page_size, 20);
        assert!(config.meta_show_ordering);
        assert_eq!(config.allow_ordering_on, Some(vec!["name".to_string()]));

        let overrides = ConfigLayer::new().set("allowOrderingOn", Value::Null);
        let config = stack
            .resolve(OperationKind::List, &entity(), Some("narrow"), Some(&overrides))
            .unwrap();
        assert_eq!(config.allow_ordering_on, None);
    }

    #[test]
    fn test_hooks_replaced_not_concatenated() {
        let stack = ConfigStack::new().with_defaults(
            ConfigLayer::new().pre(vec![hook(|_| Ok(None)), hook(|_| Ok(None))]),
        );
        let overrides = ConfigLayer::new().pre(hook(|_| Ok(None)));

        let config = stack
            .resolve(OperationKind::Create, &entity(), None, Some(&overrides))
            .unwrap();
        assert_eq!(config.pre.len(), 1);
        assert!(config.post.is_empty());
    }

    #[test]
    fn test_unknown_context_is_an_error() {
        let err = ConfigStack::new()
            .resolve(OperationKind::List, &entity(), Some("missing"), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownContext { .. }));
    }

    #[test]
    fn test_option_reads_both_spellings() {
        let config = OperationConfig::from_layer(
            &ConfigLayer::new().set("custom_flag", true).set("idMapping", "external_id"),
        )
        .unwrap();
        assert_eq!(config.option("customFlag"), Some(&json!(true)));
        assert_eq!(config.option("id_mapping"), Some(&json!("external_id")));
        assert_eq!(config.id_mapping.as_deref(), Some("external_id"));
    }

    #[test]
    fn test_defaults() {
        let config = OperationConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.default_order_by, "id");
        assert_eq!(config.default_order_dir, SortDirection::Asc);
        assert!(config.auto_relation_id_mapping);
        assert!(config.allow_filtering_on.is_none());
    }

    #[test]
    fn test_yaml_loading() {
        let yaml = r#"
defaults:
  pageSize: 25
operations:
  list:
    meta_show_filtering: true
contexts:
  public:
    block_filtering_on: [secret]
"#;
        let stack = ConfigStack::from_yaml_str(yaml).unwrap();
        let config = stack
            .resolve(OperationKind::List, &entity(), Some("public"), None)
            .unwrap();
        assert_eq!(config.page_size, 25);
        assert!(config.meta_show_filtering);
        assert_eq!(config.block_filtering_on, Some(vec!["secret".to_string()]));
    }

    #[test]
    fn test_merge_stacks_last_wins() {
        let a = ConfigStack::new().with_defaults(ConfigLayer::new().set("page_size", 5));
        let b = ConfigStack::new().with_defaults(ConfigLayer::new().set("page_size", 7));
        let merged = ConfigStack::merge(vec![a, b]);
        assert_eq!(merged.global.get("page_size"), Some(&json!(7)));
    }
}
