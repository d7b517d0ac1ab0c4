// handlers/protected/auth/me.rs - GET /auth/me handler

use axum::extract::State;

use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::AccountService;
use crate::AppState;

/// GET /auth/me - The caller's account and resolved principal
pub async fn me_get(State(state): State<AppState>, principal: Principal) -> ApiResult {
    let account = AccountService::new(state.pool).me(&principal).await?;
    Ok(ApiResponse::success().with("user", account).with("principal", principal))
}
