//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`ApiError`]: request-time failures. Each variant maps to one HTTP status,
//!   carries a sanitized user message and, where the client can act on it, a
//!   structured `details` object (invalid tokens, missing/unknown fields).
//!   Storage errors are logged through `tracing` and never sent to clients.
//! - [`ConfigError`]: startup-time failures while reflecting the schema or
//!   assembling the [`Registry`](crate::model::Registry).
//!
//! ## Response shape
//!
//! ```json
//! { "error": "Invalid query arguments", "details": { "invalid": ["pippo", "_page"] } }
//! ```

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::fmt;

/// API error type with automatic logging and sanitized responses
#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found - unknown resource, relation or primary key
    NotFound {
        /// Resource name (e.g., "Artist")
        resource: String,
        /// Optional ID that wasn't found
        id: Option<String>,
    },

    /// 400 Bad Request - malformed body or unknown query tokens
    BadRequest {
        /// User-facing error message
        message: String,
        /// Every token the query compiler rejected
        invalid: Vec<String>,
    },

    /// 405 Method Not Allowed - verb outside the resource's method set
    MethodNotAllowed {
        /// Rejected method
        method: String,
        /// Methods the resource accepts, for the `Allow` header
        allowed: Vec<String>,
    },

    /// 409 Conflict - duplicate row or unique constraint violation
    Conflict {
        /// User-facing error message
        message: String,
        /// URI of the row the request collided with, when known
        location: Option<String>,
    },

    /// 412 Precondition Failed - `If-Match` does not match the current ETag
    PreconditionFailed,

    /// 428 Precondition Required - conditional write without `If-Match`
    PreconditionRequired,

    /// 422 Unprocessable Entity - payload does not fit the resource
    ValidationFailed {
        /// Required fields absent from the payload
        missing: Vec<String>,
        /// Payload keys that are not writable fields
        unknown: Vec<String>,
        /// Fields whose values cannot be stored in the column type
        invalid: Vec<String>,
    },

    /// 500 Internal Server Error - Database error (details logged, not exposed)
    Database {
        /// User-facing generic message
        message: String,
        /// Internal error (logged, not sent to user)
        internal: DbErr,
    },

    /// 500 Internal Server Error - Generic internal error
    Internal {
        /// User-facing generic message
        message: String,
        /// Internal error details (logged, not sent to user)
        internal: Option<String>,
    },
}

impl ApiError {
    // ============================================================================
    // Constructors
    // ============================================================================

    /// Create a 404 Not Found error
    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    /// Create a 400 Bad Request error without token details
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            invalid: Vec::new(),
        }
    }

    /// Create a 400 Bad Request error listing every rejected query token
    ///
    /// # Example
    /// ```rust,ignore
    /// if !plan.invalid.is_empty() {
    ///     return Err(ApiError::invalid_tokens(plan.invalid));
    /// }
    /// ```
    #[must_use]
    pub fn invalid_tokens(invalid: Vec<String>) -> Self {
        Self::BadRequest {
            message: "Invalid query arguments".to_string(),
            invalid,
        }
    }

    pub fn method_not_allowed(method: impl Into<String>, allowed: Vec<String>) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
            allowed,
        }
    }

    /// Create a 409 Conflict error
    pub fn conflict(message: impl Into<String>, location: Option<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            location,
        }
    }

    /// Create a 422 error from a payload validation outcome
    #[must_use]
    pub fn validation_failed(
        missing: Vec<String>,
        unknown: Vec<String>,
        invalid: Vec<String>,
    ) -> Self {
        Self::ValidationFailed {
            missing,
            unknown,
            invalid,
        }
    }

    /// Create a 500 Internal Server Error from a database error
    ///
    /// The database error details are logged but NOT sent to the user.
    #[must_use]
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    /// Create a 500 Internal Server Error with optional details
    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    // ============================================================================
    // Internal methods
    // ============================================================================

    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::PreconditionRequired => StatusCode::PRECONDITION_REQUIRED,
            Self::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the user-facing error message (sanitized)
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, id } => {
                if let Some(id) = id {
                    format!("{resource} with ID '{id}' not found")
                } else {
                    format!("{resource} not found")
                }
            }
            Self::MethodNotAllowed { method, .. } => {
                format!("Method {method} is not allowed on this resource")
            }
            Self::PreconditionFailed => "Resource has been modified (ETag mismatch)".to_string(),
            Self::PreconditionRequired => "This request must be conditional (If-Match)".to_string(),
            Self::ValidationFailed { .. } => "Validation failed".to_string(),
            Self::BadRequest { message, .. }
            | Self::Conflict { message, .. }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message.clone(),
        }
    }

    /// Structured details the client can act on
    fn details(&self) -> Option<JsonValue> {
        match self {
            Self::BadRequest { invalid, .. } if !invalid.is_empty() => {
                Some(json!({ "invalid": invalid }))
            }
            Self::ValidationFailed {
                missing,
                unknown,
                invalid,
            } => {
                let mut details = serde_json::Map::new();
                if !missing.is_empty() {
                    details.insert("missing".into(), json!(missing));
                }
                if !unknown.is_empty() {
                    details.insert("unknown".into(), json!(unknown));
                }
                if !invalid.is_empty() {
                    details.insert("invalid".into(), json!(invalid));
                }
                Some(JsonValue::Object(details))
            }
            _ => None,
        }
    }

    /// Log internal error details (not sent to user)
    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

/// Error response sent to users (sanitized)
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<JsonValue>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.user_message(),
            details: self.details(),
        };
        let mut response = (status, Json(body)).into_response();

        match &self {
            Self::MethodNotAllowed { allowed, .. } => {
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
            }
            Self::Conflict {
                location: Some(location),
                ..
            } => {
                if let Ok(value) = HeaderValue::from_str(location) {
                    response.headers_mut().insert(header::LOCATION, value);
                }
            }
            _ => {}
        }

        response
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// Conversions
// ============================================================================

/// Convert a storage error, translating integrity violations
///
/// - unique constraint → 409 Conflict
/// - foreign key constraint → 422 with the message in `invalid`
/// - `RecordNotFound` → 404
/// - everything else → 500 (logged, sanitized)
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                tracing::debug!(detail = %detail, "Unique constraint violation");
                return Self::conflict("Resource already exists", None);
            }
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => {
                return Self::validation_failed(Vec::new(), Vec::new(), vec![detail]);
            }
            _ => {}
        }
        match err {
            DbErr::RecordNotFound(resource) => Self::not_found(resource, None),
            other => Self::database(other),
        }
    }
}

/// Failures while building the resource registry at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("model '{0}' declares no primary key")]
    MissingPrimaryKey(String),

    #[error("model '{model}' declares field '{field}' more than once")]
    DuplicateField { model: String, field: String },

    #[error("model '{0}' is registered more than once")]
    DuplicateModel(String),

    #[error("url '{url}' is used by both '{first}' and '{second}'")]
    DuplicateUrl {
        url: String,
        first: String,
        second: String,
    },

    #[error("relation '{relation}' on '{model}' targets unknown model '{target}'")]
    UnknownModel {
        model: String,
        relation: String,
        target: String,
    },

    #[error("relation '{relation}' on '{model}' uses unknown key column '{column}'")]
    UnknownKey {
        model: String,
        relation: String,
        column: String,
    },

    #[error("schema reflection is not supported for {0}")]
    UnsupportedBackend(String),

    #[error("database error during reflection: {0}")]
    Database(#[from] DbErr),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> JsonValue {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ============================================================================
    // Status codes
    // ============================================================================

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::not_found("Artist", None).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::invalid_tokens(vec!["x".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::conflict("dup", None).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::PreconditionFailed.status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError::PreconditionRequired.status_code(),
            StatusCode::PRECONDITION_REQUIRED
        );
        assert_eq!(
            ApiError::method_not_allowed("POST", vec![]).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn not_found_message_includes_id() {
        let err = ApiError::not_found("Artist", Some("7".into()));
        assert_eq!(err.to_string(), "Artist with ID '7' not found");
    }

    #[test]
    fn record_not_found_maps_to_404() {
        let err: ApiError = DbErr::RecordNotFound("Artist".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn other_db_errors_are_sanitized() {
        let err: ApiError = DbErr::Custom("secret table layout".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("secret"));
    }

    // ============================================================================
    // Response bodies
    // ============================================================================

    #[tokio::test]
    async fn invalid_tokens_are_listed_in_details() {
        let response =
            ApiError::invalid_tokens(vec!["pippo".into(), "_page".into()]).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["details"]["invalid"], json!(["pippo", "_page"]));
    }

    #[tokio::test]
    async fn validation_details_omit_empty_lists() {
        let response =
            ApiError::validation_failed(vec![], vec!["pippo".into()], vec![]).into_response();
        let body = body_json(response).await;
        assert_eq!(body["details"], json!({ "unknown": ["pippo"] }));
    }

    #[tokio::test]
    async fn conflict_carries_location_header() {
        let response = ApiError::conflict("exists", Some("/artist/1".into())).into_response();
        assert_eq!(response.headers()[header::LOCATION], "/artist/1");
    }

    #[tokio::test]
    async fn method_not_allowed_carries_allow_header() {
        let response =
            ApiError::method_not_allowed("DELETE", vec!["GET".into(), "FETCH".into()])
                .into_response();
        assert_eq!(response.headers()[header::ALLOW], "GET, FETCH");
    }
}
