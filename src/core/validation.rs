//! Payload validation for write operations
//!
//! Checks a write payload against the entity schema and normalizes every
//! value to its attribute's canonical JSON form. All problems are collected
//! and reported together as [`ValidationError::FieldErrors`].

use crate::core::entity::EntityDescriptor;
use crate::core::error::{FieldValidationError, ValidationError};
use crate::core::field::FieldValue;
use crate::core::store::Record;
use serde_json::Value;

/// How a payload will be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// New record; non-nullable attributes must be present
    Create,
    /// Full replacement; absent attributes are written as null
    Replace,
    /// Partial update; only supplied attributes are checked
    Patch,
}

/// Validate and normalize a payload keyed by internal attribute names
///
/// For [`WriteMode::Replace`] the returned record contains every non-key
/// attribute, with absent ones set to null.
pub fn validate_payload(
    entity: &EntityDescriptor,
    payload: Record,
    mode: WriteMode,
) -> Result<Record, ValidationError> {
    let mut errors = Vec::new();
    let mut normalized = Record::new();

    for (field, value) in payload {
        let Some(attribute) = entity.find_attribute(&field) else {
            errors.push(FieldValidationError::new(&field, "is not a known attribute"));
            continue;
        };

        let Some(typed) = FieldValue::coerce(attribute.attr_type, &value) else {
            errors.push(FieldValidationError::new(
                &field,
                format!("must be a {}", attribute.attr_type.label()),
            ));
            continue;
        };

        let bad_format = attribute
            .format
            .as_ref()
            .filter(|format| !typed.is_null() && !format.validate(&typed));
        if let Some(format) = bad_format {
            errors.push(FieldValidationError::new(&field, format.describe()));
            continue;
        }

        normalized.insert(field, typed.to_json());
    }

    for attribute in &entity.attributes {
        if attribute.primary_key {
            continue;
        }
        if mode == WriteMode::Replace && !normalized.contains_key(&attribute.name) {
            normalized.insert(attribute.name.clone(), Value::Null);
        }

        let missing = match normalized.get(&attribute.name) {
            Some(value) => value.is_null(),
            None => mode == WriteMode::Create,
        };
        let already_reported = errors.iter().any(|e| e.field == attribute.name);
        if !attribute.nullable && missing && !already_reported {
            errors.push(FieldValidationError::new(&attribute.name, "is required"));
        }
    }

    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(ValidationError::FieldErrors(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::Attribute;
    use crate::core::field::{AttributeType, FieldFormat};
    use serde_json::json;

    fn contact() -> EntityDescriptor {
        EntityDescriptor::new("contact")
            .attribute(Attribute::primary_key("id", AttributeType::Integer))
            .attribute(Attribute::new("name", AttributeType::String).required())
            .attribute(Attribute::new("email", AttributeType::String).format(FieldFormat::Email))
            .attribute(Attribute::new("age", AttributeType::Integer))
    }

    fn payload(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn fields(err: ValidationError) -> Vec<String> {
        let ValidationError::FieldErrors(errors) = err;
        errors.into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn test_create_requires_non_nullable() {
        let err = validate_payload(&contact(), payload(json!({"age": 3})), WriteMode::Create).unwrap_err();
        assert_eq!(fields(err), vec!["name"]);
    }

    #[test]
    fn test_patch_only_checks_supplied() {
        let record = validate_payload(&contact(), payload(json!({"age": "41"})), WriteMode::Patch).unwrap();
        assert_eq!(record, payload(json!({"age": 41})));

        let err = validate_payload(&contact(), payload(json!({"name": null})), WriteMode::Patch).unwrap_err();
        assert_eq!(fields(err), vec!["name"]);
    }

    #[test]
    fn test_replace_nulls_absent_attributes() {
        let record = validate_payload(&contact(), payload(json!({"name": "Ann"})), WriteMode::Replace).unwrap();
        assert_eq!(record, payload(json!({"name": "Ann", "email": null, "age": null})));
    }

    #[test]
    fn test_collects_every_error() {
        let err = validate_payload(
            &contact(),
            payload(json!({"email": "nope", "age": "old", "nickname": "x"})),
            WriteMode::Create,
        )
        .unwrap_err();
        assert_eq!(fields(err), vec!["email", "age", "nickname", "name"]);
    }
}
