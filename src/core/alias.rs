//! Bidirectional field aliasing
//!
//! Operations may expose an internal attribute under a different external name
//! (`field_aliases: {title: name}` exposes `name` as `title`). The same
//! dictionary renames inbound filter/order fields and payload keys, and
//! renames outbound record keys back, so an aliased attribute never shows up
//! under its raw name.

use crate::core::store::Record;
use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct FieldAliases {
    to_internal: IndexMap<String, String>,
    to_external: IndexMap<String, String>,
}

impl FieldAliases {
    /// Build from an `external -> internal` dictionary
    pub fn new(external_to_internal: &IndexMap<String, String>) -> Self {
        let to_internal = external_to_internal.clone();
        let to_external = external_to_internal
            .iter()
            .map(|(external, internal)| (internal.clone(), external.clone()))
            .collect();
        Self {
            to_internal,
            to_external,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_internal.is_empty()
    }

    /// Internal attribute for an external field name (identity when unaliased)
    pub fn internal<'a>(&'a self, external: &'a str) -> &'a str {
        self.to_internal
            .get(external)
            .map(String::as_str)
            .unwrap_or(external)
    }

    /// External name for an internal attribute (identity when unaliased)
    pub fn external<'a>(&'a self, internal: &'a str) -> &'a str {
        self.to_external
            .get(internal)
            .map(String::as_str)
            .unwrap_or(internal)
    }

    /// Whether the name is an internal attribute hidden behind an alias
    pub fn is_shadowed(&self, name: &str) -> bool {
        self.to_external.contains_key(name) && !self.to_internal.contains_key(name)
    }

    /// Rename payload keys from external to internal names
    pub fn inbound(&self, payload: Record) -> Record {
        if self.is_empty() {
            return payload;
        }
        payload
            .into_iter()
            .map(|(key, value)| (self.internal(&key).to_string(), value))
            .collect()
    }

    /// Rename record keys from internal to external names, dropping raw keys
    pub fn outbound(&self, record: &mut Record) {
        for (internal, external) in &self.to_external {
            if let Some(value) = record.shift_remove(internal) {
                record.insert(external.clone(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aliases() -> FieldAliases {
        let mut map = IndexMap::new();
        map.insert("title".to_string(), "name".to_string());
        FieldAliases::new(&map)
    }

    #[test]
    fn test_resolves_both_directions() {
        let aliases = aliases();
        assert_eq!(aliases.internal("title"), "name");
        assert_eq!(aliases.internal("price"), "price");
        assert_eq!(aliases.external("name"), "title");
        assert!(aliases.is_shadowed("name"));
        assert!(!aliases.is_shadowed("title"));
    }

    #[test]
    fn test_outbound_removes_internal_key() {
        let mut record: Record = json!({"id": 1, "name": "Widget"})
            .as_object()
            .cloned()
            .unwrap();
        aliases().outbound(&mut record);
        assert_eq!(record.get("title"), Some(&json!("Widget")));
        assert!(!record.contains_key("name"));
    }

    #[test]
    fn test_inbound_renames_payload() {
        let payload: Record = json!({"title": "Widget", "price": 3})
            .as_object()
            .cloned()
            .unwrap();
        let payload = aliases().inbound(payload);
        assert_eq!(payload.get("name"), Some(&json!("Widget")));
        assert!(!payload.contains_key("title"));
    }
}
