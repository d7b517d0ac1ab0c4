// HTTP API Error Types
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::database::DatabaseError;
use crate::filter::error::FilterError;
use crate::policy::ledger::LedgerError;
use crate::policy::lifecycle::LifecycleError;

/// One field-level validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    ValidationFailed {
        message: String,
        details: Vec<FieldError>,
    },
    /// Business-rule conflicts (duplicate keys, processed tickets, quantities)
    Conflict {
        code: &'static str,
        message: String,
    },

    // 401 Unauthorized
    Unauthenticated(String),

    // 403 Forbidden
    AccountDeactivated,
    Forbidden(String),

    // 404 Not Found
    NotFound {
        code: &'static str,
        message: String,
    },

    // 500 Internal Server Error
    Internal(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::AccountDeactivated => StatusCode::FORBIDDEN,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::ValidationFailed { .. } => "ValidationFailed",
            ApiError::Conflict { code, .. } => code,
            ApiError::Unauthenticated(_) => "Unauthenticated",
            ApiError::AccountDeactivated => "AccountDeactivated",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound { code, .. } => code,
            ApiError::Internal(_) => "Internal",
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::ValidationFailed { message, .. } => message,
            ApiError::Conflict { message, .. } => message,
            ApiError::Unauthenticated(msg) => msg,
            ApiError::AccountDeactivated => "Account has been deactivated",
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound { message, .. } => message,
            ApiError::Internal(msg) => {
                if crate::config::config().security.expose_internal_errors {
                    msg
                } else {
                    "An unexpected error occurred"
                }
            }
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": self.error_code(),
            "message": self.message(),
        });
        if let ApiError::ValidationFailed { details, .. } = self {
            if !details.is_empty() {
                body["details"] = json!(details);
            }
        }
        body
    }
}

// Static constructor methods
impl ApiError {
    pub fn validation(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        ApiError::ValidationFailed {
            message: message.into(),
            details,
        }
    }

    /// Validation failure on a single field
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::ValidationFailed {
            message: format!("Invalid value for '{}'", field),
            details: vec![FieldError::new(field, message)],
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ApiError::Unauthenticated(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            code: "NotFound",
            message: message.into(),
        }
    }

    pub fn not_found_with(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

/// Collects field errors and turns them into one `ValidationFailed`
#[derive(Debug, Default)]
pub struct Validator {
    details: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.details.push(FieldError::new(field, message));
        }
        self
    }

    pub fn required(&mut self, value: Option<&str>, field: &str) -> &mut Self {
        let present = value.map(|v| !v.trim().is_empty()).unwrap_or(false);
        self.check(present, field, "This field is required")
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.details.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(
                "Validation failed",
                std::mem::take(&mut self.details),
            ))
        }
    }
}

// Convert other error types to ApiError
impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::Sqlx(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
                Some("23505") => ApiError::conflict("Duplicate", "A record with the same unique value already exists"),
                Some("23503") => ApiError::conflict("ReferencedRecord", "The record references, or is referenced by, another record"),
                Some("23514") => ApiError::conflict("ConstraintViolation", "The change violates a data constraint"),
                _ => {
                    tracing::error!("Database error: {}", db_err);
                    ApiError::internal(format!("Database error: {}", db_err))
                }
            },
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => {
                tracing::error!("Database pool timed out");
                ApiError::internal("Database temporarily unavailable")
            }
            other => {
                // Log the real error but return generic message
                tracing::error!("Database error: {}", other);
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::validation(err.to_string(), vec![])
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => {
                ApiError::unauthenticated(err.to_string())
            }
            AuthError::InvalidCredentials => ApiError::unauthenticated("Invalid email or password"),
            other => {
                tracing::error!("Authentication subsystem error: {}", other);
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::AlreadyProcessed => ApiError::conflict("AlreadyProcessed", err.to_string()),
            LifecycleError::InvalidTransition { .. } => {
                ApiError::conflict("InvalidStatusTransition", err.to_string())
            }
            LifecycleError::DeletionBlocked(_) => {
                ApiError::conflict("TicketDeletionBlocked", err.to_string())
            }
            LifecycleError::RejectionReasonRequired => {
                ApiError::invalid_field("rejectionReason", err.to_string())
            }
            LifecycleError::NotPermitted(msg) => ApiError::forbidden(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidQuantity => ApiError::invalid_field("quantity", err.to_string()),
            LedgerError::InsufficientAvailableQuantity { .. } => {
                ApiError::conflict("InsufficientAvailableQuantity", err.to_string())
            }
            LedgerError::OverDeallocation { .. } => ApiError::conflict("OverDeallocation", err.to_string()),
            LedgerError::AllocationNotFound { .. } => {
                ApiError::not_found_with("AllocationNotFound", err.to_string())
            }
            LedgerError::BelowAllocated { .. } => ApiError::conflict("QuantityBelowAllocated", err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(format!("Invalid request body: {}", rejection.body_text()), vec![])
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(format!("Invalid query string: {}", rejection.body_text()), vec![])
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(format!("Invalid path parameter: {}", rejection.body_text()), vec![])
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!("Request failed with internal error: {}", msg);
        }
        (self.status_code(), Json(self.to_json())).into_response()
    }
}
