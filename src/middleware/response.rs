use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::types::Pagination;

/// Success envelope keyed by entity name, e.g.
/// `{ "ticket": {...}, "message": "Ticket created" }` or
/// `{ "tickets": [...], "pagination": {...} }`
#[derive(Debug)]
pub struct ApiResponse {
    body: Map<String, Value>,
    status_code: StatusCode,
    serialize_error: Option<String>,
}

impl ApiResponse {
    /// Create a successful API response with default 200 status
    pub fn success() -> Self {
        Self::with_status(StatusCode::OK)
    }

    /// Create a 201 Created response
    pub fn created() -> Self {
        Self::with_status(StatusCode::CREATED)
    }

    pub fn with_status(status_code: StatusCode) -> Self {
        Self {
            body: Map::new(),
            status_code,
            serialize_error: None,
        }
    }

    /// Add a keyed value to the envelope
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.body.insert(key.to_string(), v);
            }
            Err(e) => self.serialize_error = Some(e.to_string()),
        }
        self
    }

    pub fn message(self, message: impl Into<String>) -> Self {
        self.with("message", message.into())
    }

    pub fn pagination(self, pagination: Pagination) -> Self {
        self.with("pagination", pagination)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        if let Some(e) = self.serialize_error {
            tracing::error!("Failed to serialize response data: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal",
                    "message": "Failed to serialize response data"
                })),
            )
                .into_response();
        }

        (self.status_code, Json(Value::Object(self.body))).into_response()
    }
}

pub type ApiResult = Result<ApiResponse, crate::error::ApiError>;
