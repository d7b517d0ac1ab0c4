// handlers/public/auth/login.rs - POST /auth/login handler

use axum::extract::{rejection::JsonRejection, State};
use axum::Json;

use crate::middleware::{ApiResponse, ApiResult};
use crate::services::accounts::LoginInput;
use crate::services::AccountService;
use crate::AppState;

/**
 * POST /auth/login - Authenticate and receive a JWT
 *
 * Input:
 * ```json
 * { "email": "dana@example.com", "password": "secret-pass" }
 * ```
 *
 * Output:
 * ```json
 * { "token": "eyJhbGciOiJIUzI1NiI...", "user": { "id": 1, "role": "user", ... }, "message": "Login successful" }
 * ```
 *
 * Unknown email and wrong password both answer 401; a deactivated account 403.
 */
pub async fn login_post(
    State(state): State<AppState>,
    payload: Result<Json<LoginInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let session = AccountService::new(state.pool).login(input).await?;

    Ok(ApiResponse::success()
        .with("token", session.token)
        .with("user", session.user)
        .message("Login successful"))
}
