// handlers/protected/users.rs - /users handlers

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::accounts::{CreateUser, UpdateUser, UserListQuery};
use crate::services::AccountService;
use crate::AppState;

/// GET /users - Everyone for admins, own team otherwise
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (users, pagination) = AccountService::new(state.pool).list(&principal, &query).await?;
    Ok(ApiResponse::success().with("users", users).pagination(pagination))
}

/// GET /users/:id
pub async fn get(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let user = AccountService::new(state.pool).get(&principal, id).await?;
    Ok(ApiResponse::success().with("user", user))
}

/// POST /users
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let user = AccountService::new(state.pool).create(&principal, input).await?;
    Ok(ApiResponse::created().with("user", user).message("User created"))
}

/// PUT /users/:id
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUser>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let user = AccountService::new(state.pool).update(&principal, id, input).await?;
    Ok(ApiResponse::success().with("user", user).message("User updated"))
}

/// DELETE /users/:id
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    AccountService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("User deleted"))
}
