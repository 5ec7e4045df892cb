//! Typed error handling for resource operations
//!
//! Every failure the pipeline can produce falls into one of four client-facing
//! categories:
//!
//! - [`BadRequestError`]: disallowed/unknown fields, coercion failures, malformed
//!   flattening or relation-mapping configuration (400)
//! - [`NotFoundError`]: primary lookup misses, ownership-scoped misses, related
//!   id resolution misses on write (404)
//! - [`ValidationError`]: per-field payload validation, reported as `details` (400)
//! - Internal: everything else, including [`ConfigError`] raised at request time (500)
//!
//! Hooks and stores return `anyhow::Result`. Converting an `anyhow::Error` into a
//! [`ResourceError`] recovers any of the typed errors above that were wrapped in
//! it; anything unrecognised becomes `Internal`.
//!
//! # Example
//!
//! ```rust,ignore
//! fn owner_hook(ctx: &mut OperationContext) -> anyhow::Result<Option<Value>> {
//!     if ctx.param("user").is_none() {
//!         return Err(NotFoundError::Record {
//!             entity: "item".to_string(),
//!             id: "?".to_string(),
//!         }
//!         .into());
//!     }
//!     Ok(None)
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// The main error type for resource operations
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    BadRequest(#[from] BadRequestError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unexpected failure; the message is logged, never sent to the client
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResourceError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ResourceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ResourceError::NotFound(_) => StatusCode::NOT_FOUND,
            ResourceError::Validation(_) => StatusCode::BAD_REQUEST,
            ResourceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ResourceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error is one of the recognized client-facing conditions
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Client-facing error envelope `{success: false, error, details?}`
    pub fn to_body(&self) -> Value {
        let message = if self.is_client_error() {
            self.to_string()
        } else {
            "Internal Error".to_string()
        };

        let mut body = json!({ "success": false, "error": message });
        if let ResourceError::Validation(ValidationError::FieldErrors(errors)) = self {
            body["details"] = json!(errors);
        }
        body
    }
}

impl IntoResponse for ResourceError {
    fn into_response(self) -> Response {
        if !self.is_client_error() {
            tracing::error!(error = %self, "resource operation failed");
        }
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

// =============================================================================
// Bad Request Errors
// =============================================================================

/// What a field was used for when it got rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUsage {
    Filtering,
    Ordering,
    Writing,
}

impl fmt::Display for FieldUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldUsage::Filtering => write!(f, "Filtering"),
            FieldUsage::Ordering => write!(f, "Ordering"),
            FieldUsage::Writing => write!(f, "Writing"),
        }
    }
}

/// Errors caused by request input or by a request-time configuration mismatch
#[derive(Debug, Error)]
pub enum BadRequestError {
    #[error("{usage} on field '{field}' is not allowed")]
    DisallowedField { field: String, usage: FieldUsage },

    #[error("Unknown field '{field}' on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Unknown operator '{operator}' for field '{field}'")]
    UnknownOperator { field: String, operator: String },

    #[error("Operator '{operator}' is not supported on field '{field}'")]
    UnsupportedOperator { field: String, operator: String },

    #[error("Invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(
        "Include for association '{association}' targets {found}, but flattening declares {expected}"
    )]
    IncludeMismatch {
        association: String,
        expected: String,
        found: String,
    },
}

// =============================================================================
// Not Found Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Not Found")]
    Record { entity: String, id: String },

    #[error("Related record not found")]
    Related {
        entity: String,
        field: String,
        value: String,
    },
}

// =============================================================================
// Validation Errors
// =============================================================================

/// A single field validation error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Validation failed")]
    FieldErrors(Vec<FieldValidationError>),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration loading and resolution
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config {}: {message}", .file.as_deref().unwrap_or("<inline>"))]
    ParseError {
        file: Option<String>,
        message: String,
    },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown configuration context '{name}'")]
    UnknownContext { name: String },

    #[error("Unknown entity '{name}'")]
    UnknownEntity { name: String },

    #[error("Attribute '{attribute}' does not exist on {entity} ({context})")]
    MissingAttribute {
        entity: String,
        attribute: String,
        context: String,
    },

    #[error("IO error: {message}")]
    IoError { message: String },
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::BadRequest(BadRequestError::InvalidBody {
            message: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError {
            message: err.to_string(),
        }
    }
}

/// Recover typed errors that travelled through `anyhow`
impl From<anyhow::Error> for ResourceError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ResourceError>() {
            Ok(e) => return e,
            Err(err) => err,
        };
        let err = match err.downcast::<BadRequestError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<NotFoundError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<ValidationError>() {
            Ok(e) => return e.into(),
            Err(err) => err,
        };
        ResourceError::Internal(format!("{err:#}"))
    }
}

/// A specialized Result type for resource operations
pub type ResourceResult<T> = Result<T, ResourceError>;
