//! Attribute types, typed field values and format validation

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;
use uuid::Uuid;

/// Declared storage type of an entity attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Uuid,
    DateTime,
}

impl AttributeType {
    /// String-like types get case-insensitive equality and the text operators
    pub fn is_textual(&self) -> bool {
        matches!(self, AttributeType::String | AttributeType::Text)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Text => "text",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Boolean => "boolean",
            AttributeType::Uuid => "uuid",
            AttributeType::DateTime => "datetime",
        }
    }
}

/// A polymorphic field value that can hold different types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Null,
}

/// Whole floats inside the i64 range
fn integral(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

impl FieldValue {
    /// Coerce raw request or storage input into the attribute's declared type
    ///
    /// Query strings deliver everything as text, so numeric, boolean, uuid and
    /// datetime attributes accept their string spellings as well. Returns `None`
    /// when the input cannot represent the type.
    pub fn coerce(attr_type: AttributeType, raw: &Value) -> Option<FieldValue> {
        if raw.is_null() {
            return Some(FieldValue::Null);
        }

        match attr_type {
            AttributeType::String | AttributeType::Text => match raw {
                Value::String(s) => Some(FieldValue::String(s.clone())),
                Value::Number(n) => Some(FieldValue::String(n.to_string())),
                Value::Bool(b) => Some(FieldValue::String(b.to_string())),
                _ => None,
            },
            AttributeType::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(integral))
                    .map(FieldValue::Integer),
                Value::String(s) => s.trim().parse().ok().map(FieldValue::Integer),
                _ => None,
            },
            AttributeType::Float => match raw {
                Value::Number(n) => n.as_f64().map(FieldValue::Float),
                Value::String(s) => s.trim().parse().ok().map(FieldValue::Float),
                _ => None,
            },
            AttributeType::Boolean => match raw {
                Value::Bool(b) => Some(FieldValue::Boolean(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(FieldValue::Boolean(false)),
                    Some(1) => Some(FieldValue::Boolean(true)),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(FieldValue::Boolean(true)),
                    "false" | "0" => Some(FieldValue::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            AttributeType::Uuid => raw
                .as_str()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .map(FieldValue::Uuid),
            AttributeType::DateTime => raw.as_str().and_then(parse_datetime).map(FieldValue::DateTime),
        }
    }

    /// Canonical JSON form, the shape stored records and responses carry
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::Null => Value::Null,
        }
    }

    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Total-ish ordering used for sorting and range operators
    ///
    /// Integers and floats compare numerically with each other. Null sorts
    /// before everything. Mismatched kinds are incomparable.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Field format validators for automatic validation
#[derive(Debug, Clone)]
pub enum FieldFormat {
    Email,
    Uuid,
    Url,
    Custom(Regex),
}

impl FieldFormat {
    /// Validate a field value against this format
    pub fn validate(&self, value: &FieldValue) -> bool {
        let string_value = match value {
            FieldValue::String(s) => s.as_str(),
            FieldValue::Uuid(_) => return matches!(self, FieldFormat::Uuid),
            _ => return false,
        };

        match self {
            FieldFormat::Email => Self::is_valid_email(string_value),
            FieldFormat::Uuid => Uuid::parse_str(string_value).is_ok(),
            FieldFormat::Url => Self::is_valid_url(string_value),
            FieldFormat::Custom(regex) => regex.is_match(string_value),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FieldFormat::Email => "must be a valid email address".to_string(),
            FieldFormat::Uuid => "must be a valid UUID".to_string(),
            FieldFormat::Url => "must be a valid URL".to_string(),
            FieldFormat::Custom(regex) => format!("must match pattern {}", regex.as_str()),
        }
    }

    fn is_valid_email(email: &str) -> bool {
        static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = EMAIL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
        });
        regex.is_match(email)
    }

    fn is_valid_url(url: &str) -> bool {
        static URL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = URL_REGEX.get_or_init(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());
        regex.is_match(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_integer_from_query_string() {
        assert_eq!(
            FieldValue::coerce(AttributeType::Integer, &json!(" 42 ")),
            Some(FieldValue::Integer(42))
        );
        assert_eq!(FieldValue::coerce(AttributeType::Integer, &json!("4.2")), None);
        assert_eq!(
            FieldValue::coerce(AttributeType::Integer, &json!(7.0)),
            Some(FieldValue::Integer(7))
        );
    }

    #[test]
    fn test_coerce_integer_rejects_out_of_range_floats() {
        assert_eq!(FieldValue::coerce(AttributeType::Integer, &json!(1e30)), None);
        assert_eq!(FieldValue::coerce(AttributeType::Integer, &json!(-1e30)), None);
        assert_eq!(FieldValue::coerce(AttributeType::Integer, &json!(u64::MAX)), None);
        assert_eq!(
            FieldValue::coerce(AttributeType::Integer, &json!(-9.0e15)),
            Some(FieldValue::Integer(-9_000_000_000_000_000))
        );
    }

    #[test]
    fn test_coerce_boolean_spellings() {
        assert_eq!(
            FieldValue::coerce(AttributeType::Boolean, &json!("TRUE")),
            Some(FieldValue::Boolean(true))
        );
        assert_eq!(
            FieldValue::coerce(AttributeType::Boolean, &json!(0)),
            Some(FieldValue::Boolean(false))
        );
        assert_eq!(FieldValue::coerce(AttributeType::Boolean, &json!("yes")), None);
    }

    #[test]
    fn test_coerce_datetime_accepts_plain_dates() {
        let value = FieldValue::coerce(AttributeType::DateTime, &json!("2024-03-01")).unwrap();
        assert_eq!(value.to_json(), json!("2024-03-01T00:00:00+00:00"));
        assert!(FieldValue::coerce(AttributeType::DateTime, &json!("yesterday")).is_none());
    }

    #[test]
    fn test_coerce_null_for_any_type() {
        for ty in [AttributeType::String, AttributeType::Integer, AttributeType::Uuid] {
            assert_eq!(FieldValue::coerce(ty, &Value::Null), Some(FieldValue::Null));
        }
    }

    #[test]
    fn test_compare_mixed_numbers() {
        let a = FieldValue::Integer(2);
        let b = FieldValue::Float(2.5);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(FieldValue::Null.compare(&a), Some(Ordering::Less));
        assert_eq!(FieldValue::Boolean(true).compare(&a), None);
    }

    #[test]
    fn test_email_validation() {
        let format = FieldFormat::Email;

        assert!(format.validate(&FieldValue::String("test@example.com".to_string())));
        assert!(!format.validate(&FieldValue::String("invalid-email".to_string())));
        assert!(!format.validate(&FieldValue::Integer(42)));
    }

    #[test]
    fn test_custom_regex_validation() {
        let format = FieldFormat::Custom(Regex::new(r"^[A-Z]{3}\d{3}$").unwrap());

        assert!(format.validate(&FieldValue::String("ABC123".to_string())));
        assert!(!format.validate(&FieldValue::String("abc123".to_string())));
        assert!(format.describe().contains("pattern"));
    }
}
