// handlers/protected/projects.rs - /projects handlers

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::projects::{CreateProject, ProjectListQuery, UpdateProject};
use crate::services::ProjectService;
use crate::AppState;

/// GET /projects
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<ProjectListQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (projects, pagination) = ProjectService::new(state.pool).list(&principal, &query).await?;
    Ok(ApiResponse::success().with("projects", projects).pagination(pagination))
}

/// GET /projects/:id
pub async fn get(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let project = ProjectService::new(state.pool).get(&principal, id).await?;
    Ok(ApiResponse::success().with("project", project))
}

/// POST /projects - Managers and admins; code is stored upper-case
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateProject>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let project = ProjectService::new(state.pool).create(&principal, input).await?;
    Ok(ApiResponse::created().with("project", project).message("Project created"))
}

/// PUT /projects/:id
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateProject>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let project = ProjectService::new(state.pool).update(&principal, id, input).await?;
    Ok(ApiResponse::success().with("project", project).message("Project updated"))
}

/// DELETE /projects/:id - Admins, once no open tickets or allocations remain
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    ProjectService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("Project deleted"))
}
