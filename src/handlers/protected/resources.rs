// handlers/protected/resources.rs - /resources handlers

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::resources::{
    AllocationInput, CreateRequest, CreateResource, DecideRequest, ResourceListQuery, UpdateResource,
};
use crate::services::ResourceService;
use crate::AppState;

/// GET /resources
pub async fn list(
    State(state): State<AppState>,
    _principal: Principal,
    query: Result<Query<ResourceListQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (resources, pagination) = ResourceService::new(state.pool).list(&query).await?;
    Ok(ApiResponse::success().with("resources", resources).pagination(pagination))
}

/// GET /resources/:id
pub async fn get(
    State(state): State<AppState>,
    _principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let resource = ResourceService::new(state.pool).get(id).await?;
    Ok(ApiResponse::success().with("resource", resource))
}

/// POST /resources - Admins; starts fully available
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateResource>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let resource = ResourceService::new(state.pool).create(&principal, input).await?;
    Ok(ApiResponse::created().with("resource", resource).message("Resource created"))
}

/// PUT /resources/:id - Admins; a new `quantity` keeps current allocations
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateResource>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let resource = ResourceService::new(state.pool).update(&principal, id, input).await?;
    Ok(ApiResponse::success().with("resource", resource).message("Resource updated"))
}

/// DELETE /resources/:id - Refused while anything is allocated
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    ResourceService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("Resource deleted"))
}

/**
 * POST /resources/:id/allocate - Move quantity to a project
 *
 * ```json
 * { "quantity": 3, "projectId": 7, "note": "Sprint 4 laptops" }
 * ```
 */
pub async fn allocate(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AllocationInput>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let outcome = ResourceService::new(state.pool).allocate(&principal, id, input).await?;
    Ok(ApiResponse::success()
        .with("resource", outcome.resource)
        .with("allocation", outcome.allocation)
        .message("Resource allocated"))
}

/// POST /resources/:id/deallocate - Return quantity from a project
pub async fn deallocate(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<AllocationInput>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let outcome = ResourceService::new(state.pool).deallocate(&principal, id, input).await?;
    Ok(ApiResponse::success()
        .with("resource", outcome.resource)
        .with("allocation", outcome.allocation)
        .message("Resource deallocated"))
}

/// GET /resources/:id/allocations
pub async fn allocations(
    State(state): State<AppState>,
    _principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let allocations = ResourceService::new(state.pool).allocations(id).await?;
    Ok(ApiResponse::success().with("allocations", allocations))
}

/// GET /resources/:id/history
pub async fn history(
    State(state): State<AppState>,
    _principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let history = ResourceService::new(state.pool).history(id).await?;
    Ok(ApiResponse::success().with("history", history))
}

/// GET /resources/:id/requests - In index order
pub async fn requests(
    State(state): State<AppState>,
    _principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let requests = ResourceService::new(state.pool).requests(id).await?;
    Ok(ApiResponse::success().with("requests", requests))
}

/// POST /resources/:id/requests
pub async fn create_request(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let request = ResourceService::new(state.pool).create_request(&principal, id, input).await?;
    Ok(ApiResponse::created().with("request", request).message("Request submitted"))
}

/**
 * PUT /resources/:id/requests/:index - Approve or deny a request (admins)
 *
 * ```json
 * { "action": "approve", "note": "Granted for Q3" }
 * ```
 */
pub async fn decide_request(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<(i64, i64)>, PathRejection>,
    payload: Result<Json<DecideRequest>, JsonRejection>,
) -> ApiResult {
    let Path((id, index)) = path?;
    let Json(input) = payload?;
    let (request, resource) = ResourceService::new(state.pool)
        .decide_request(&principal, id, index, input)
        .await?;
    let message = format!("Request {}", request.status.as_str().to_lowercase());
    Ok(ApiResponse::success()
        .with("request", request)
        .with("resource", resource)
        .message(message))
}
