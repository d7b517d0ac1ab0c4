// handlers/mod.rs - Two-tier handler layout
//
// Public (no token) → Protected (bearer token resolved by auth_middleware)
pub mod protected; // Tier 2: `Principal` required
pub mod public; // Tier 1: anonymous access

use axum::extract::{rejection::PathRejection, Path};

use crate::error::ApiError;

/// Unwrap a numeric `:id` path segment, reporting bad input as a validation error
pub(crate) fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    let Path(id) = path?;
    Ok(id)
}
