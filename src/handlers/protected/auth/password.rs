// handlers/protected/auth/password.rs - PUT /auth/password handler

use axum::extract::{rejection::JsonRejection, State};
use axum::Json;

use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::accounts::ChangePassword;
use crate::services::AccountService;
use crate::AppState;

/**
 * PUT /auth/password - Change the caller's password
 *
 * Input:
 * ```json
 * { "currentPassword": "old-secret", "newPassword": "new-secret" }
 * ```
 */
pub async fn password_put(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<ChangePassword>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    AccountService::new(state.pool).change_password(&principal, input).await?;
    Ok(ApiResponse::success().message("Password updated"))
}
