//! Request decoding for list and search operations, plus paging metadata
//!
//! List requests carry everything in the query string:
//!
//! ```text
//! GET /items?api:page=2&api:page_size=10&api:order_by=name,-price&name:icontains=wid
//! ```
//!
//! Keys prefixed with `api:` are reserved; every other key is a filter.
//! Search requests carry the same information in a JSON body:
//!
//! ```json
//! {
//!   "filtering": {"name": "widget", "price": {"gte": 2, "lt": 10}, "tags:in": "a,b"},
//!   "ordering": [{"order_by": "name", "direction": "DESC"}],
//!   "paging": {"page": 1, "size": 25}
//! }
//! ```
//!
//! Both decode to a [`ResourceQuery`], which is still unvalidated: field
//! names, operators and values are checked by the constraint parser.

use crate::core::constraint::SortDirection;
use crate::core::error::BadRequestError;
use crate::core::store::Paging;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const PAGE_PARAM: &str = "api:page";
pub const PAGE_SIZE_PARAM: &str = "api:page_size";
pub const ORDER_BY_PARAM: &str = "api:order_by";
pub const ORDER_DIR_PARAM: &str = "api:order_dir";

const RESERVED_PREFIX: &str = "api:";

/// Decoded, not yet validated list/search input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Order expression (`a,-b,+c`)
    pub order_by: Option<String>,
    /// Direction for unprefixed order fields
    pub order_dir: Option<SortDirection>,
    /// Raw `field[:operator]` keys with their values, in a stable order
    pub filters: Vec<(String, Value)>,
}

fn parse_count(name: &str, raw: &str) -> Result<usize, BadRequestError> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| BadRequestError::InvalidParameter {
            name: name.to_string(),
            message: format!("expected a positive integer, got '{raw}'"),
        })
}

fn parse_direction(name: &str, raw: &str) -> Result<SortDirection, BadRequestError> {
    SortDirection::parse(raw).ok_or_else(|| BadRequestError::InvalidParameter {
        name: name.to_string(),
        message: format!("expected ASC or DESC, got '{raw}'"),
    })
}

fn invalid_body(message: impl Into<String>) -> BadRequestError {
    BadRequestError::InvalidBody {
        message: message.into(),
    }
}

impl ResourceQuery {
    /// Decode a list request's query string
    pub fn from_query_params(params: &HashMap<String, String>) -> Result<Self, BadRequestError> {
        let mut query = ResourceQuery::default();

        // sorted so the first reported error is deterministic
        let sorted: BTreeMap<&String, &String> = params.iter().collect();
        for (key, value) in sorted {
            match key.as_str() {
                PAGE_PARAM => query.page = Some(parse_count(key, value)?),
                PAGE_SIZE_PARAM => query.page_size = Some(parse_count(key, value)?),
                ORDER_BY_PARAM => query.order_by = Some(value.clone()),
                ORDER_DIR_PARAM => query.order_dir = Some(parse_direction(key, value)?),
                reserved if reserved.starts_with(RESERVED_PREFIX) => {
                    return Err(BadRequestError::InvalidParameter {
                        name: reserved.to_string(),
                        message: "unknown reserved parameter".to_string(),
                    });
                }
                _ => query
                    .filters
                    .push((key.clone(), Value::String(value.clone()))),
            }
        }

        Ok(query)
    }

    /// Decode a search request's JSON body
    pub fn from_search_body(body: &Value) -> Result<Self, BadRequestError> {
        let object = match body {
            Value::Object(object) => object,
            Value::Null => return Ok(ResourceQuery::default()),
            _ => return Err(invalid_body("search body must be an object")),
        };

        let mut query = ResourceQuery::default();
        for (key, value) in object {
            match key.as_str() {
                "filtering" => query.filters = Self::decode_filtering(value)?,
                "ordering" => query.order_by = Self::decode_ordering(value)?,
                "paging" => {
                    let (page, size) = Self::decode_paging(value)?;
                    query.page = page;
                    query.page_size = size;
                }
                other => return Err(invalid_body(format!("unknown search key '{other}'"))),
            }
        }
        Ok(query)
    }

    fn decode_filtering(value: &Value) -> Result<Vec<(String, Value)>, BadRequestError> {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => return Ok(Vec::new()),
            _ => return Err(invalid_body("'filtering' must be an object")),
        };

        let mut filters = Vec::new();
        for (field, value) in object {
            match value {
                // {"price": {"gte": 2, "lt": 10}}
                Value::Object(operators) if !field.contains(':') => {
                    for (operator, value) in operators {
                        filters.push((format!("{field}:{operator}"), value.clone()));
                    }
                }
                Value::Object(_) => {
                    return Err(invalid_body(format!(
                        "filter '{field}' already names an operator"
                    )));
                }
                other => filters.push((field.clone(), other.clone())),
            }
        }
        Ok(filters)
    }

    /// Normalize either ordering form to an expression with explicit prefixes
    fn decode_ordering(value: &Value) -> Result<Option<String>, BadRequestError> {
        match value {
            Value::Null => Ok(None),
            Value::String(expression) => Ok(Some(expression.clone())),
            Value::Array(entries) => {
                let mut parts = Vec::with_capacity(entries.len());
                for entry in entries {
                    let field = entry
                        .get("order_by")
                        .or_else(|| entry.get("orderBy"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid_body("ordering entries need 'order_by'"))?;
                    let direction = match entry.get("direction").and_then(Value::as_str) {
                        Some(raw) => parse_direction("direction", raw)?,
                        None => SortDirection::Asc,
                    };
                    let prefix = match direction {
                        SortDirection::Asc => '+',
                        SortDirection::Desc => '-',
                    };
                    parts.push(format!("{prefix}{field}"));
                }
                Ok(Some(parts.join(",")))
            }
            _ => Err(invalid_body("'ordering' must be a string or an array")),
        }
    }

    fn decode_paging(value: &Value) -> Result<(Option<usize>, Option<usize>), BadRequestError> {
        let count = |name: &str| -> Result<Option<usize>, BadRequestError> {
            match value.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => parse_count(name, &n.to_string()).map(Some),
                Some(Value::String(s)) => parse_count(name, s).map(Some),
                Some(other) => parse_count(name, &other.to_string()).map(Some),
            }
        };
        match value {
            Value::Null => Ok((None, None)),
            Value::Object(_) => Ok((count("page")?, count("size")?)),
            _ => Err(invalid_body("'paging' must be an object")),
        }
    }

    /// Page number, starting at 1
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self, default: usize) -> usize {
        self.page_size.unwrap_or(default).max(1)
    }

    pub fn paging(&self, default_size: usize) -> Paging {
        let size = self.page_size(default_size);
        Paging {
            offset: (self.page() - 1) * size,
            limit: size,
        }
    }
}

/// `meta.paging` of list and search responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagingMeta {
    /// Total matching records across all pages
    pub count: usize,
    pub page: usize,
    pub size: usize,
    pub total_pages: usize,
}

impl PagingMeta {
    pub fn new(page: usize, size: usize, count: usize) -> Self {
        let size = size.max(1);
        Self {
            count,
            page,
            size,
            total_pages: count.div_ceil(size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_query_params_split_reserved_and_filters() {
        let query = ResourceQuery::from_query_params(&params(&[
            ("api:page", "2"),
            ("api:page_size", "10"),
            ("api:order_by", "name,-price"),
            ("api:order_dir", "desc"),
            ("name:icontains", "wid"),
        ]))
        .unwrap();

        assert_eq!(query.page(), 2);
        assert_eq!(query.page_size(100), 10);
        assert_eq!(query.order_by.as_deref(), Some("name,-price"));
        assert_eq!(query.order_dir, Some(SortDirection::Desc));
        assert_eq!(query.filters, vec![("name:icontains".to_string(), json!("wid"))]);
        assert_eq!(query.paging(100), Paging { offset: 10, limit: 10 });
    }

    #[test]
    fn test_unknown_reserved_parameter_rejected() {
        let err = ResourceQuery::from_query_params(&params(&[("api:limit", "5")])).unwrap_err();
        assert!(matches!(err, BadRequestError::InvalidParameter { .. }));

        let err = ResourceQuery::from_query_params(&params(&[("api:page", "zero")])).unwrap_err();
        assert!(matches!(err, BadRequestError::InvalidParameter { .. }));
    }

    #[test]
    fn test_search_body_decoding() {
        let query = ResourceQuery::from_search_body(&json!({
            "filtering": {"name": "widget", "price": {"gte": 2, "lt": 10}, "tags:in": "a,b"},
            "ordering": [{"order_by": "name", "direction": "DESC"}, {"orderBy": "price"}],
            "paging": {"page": 3, "size": "5"},
        }))
        .unwrap();

        assert_eq!(
            query.filters,
            vec![
                ("name".to_string(), json!("widget")),
                ("price:gte".to_string(), json!(2)),
                ("price:lt".to_string(), json!(10)),
                ("tags:in".to_string(), json!("a,b")),
            ]
        );
        assert_eq!(query.order_by.as_deref(), Some("-name,+price"));
        assert_eq!(query.page(), 3);
        assert_eq!(query.page_size(100), 5);
    }

    #[test]
    fn test_search_body_rejects_unknown_keys() {
        assert!(ResourceQuery::from_search_body(&json!({"where": {}})).is_err());
        assert!(ResourceQuery::from_search_body(&json!([1])).is_err());
        assert_eq!(
            ResourceQuery::from_search_body(&Value::Null).unwrap(),
            ResourceQuery::default()
        );
    }

    #[test]
    fn test_paging_meta() {
        let meta = PagingMeta::new(1, 20, 145);
        assert_eq!(meta.count, 145);
        assert_eq!(meta.total_pages, 8);
        assert_eq!(PagingMeta::new(1, 20, 0).total_pages, 0);
    }
}
