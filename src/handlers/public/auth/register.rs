// handlers/public/auth/register.rs - POST /auth/register/:kind handler

use axum::extract::{rejection::JsonRejection, Path, State};
use axum::Json;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::accounts::RegisterInput;
use crate::services::AccountService;
use crate::types::Role;
use crate::AppState;

/**
 * POST /auth/register/{super-admin|admin|team|user} - Create an account
 *
 * Input:
 * ```json
 * { "name": "Dana", "email": "dana@example.com", "password": "secret-pass", "teamId": 3 }
 * ```
 *
 * `team` registrations take either `teamId` or `teamName` (creates the team).
 * `super-admin` only succeeds while no super admin exists; the other kinds
 * need public registration to be enabled.
 */
pub async fn register_post(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    payload: Result<Json<RegisterInput>, JsonRejection>,
) -> ApiResult {
    let role = Role::from_registration_path(&kind)
        .ok_or_else(|| ApiError::not_found(format!("Unknown registration type: {}", kind)))?;
    let Json(input) = payload?;

    let session = AccountService::new(state.pool).register(role, input).await?;

    Ok(ApiResponse::created()
        .with("token", session.token)
        .with("user", session.user)
        .message("Registration successful"))
}
