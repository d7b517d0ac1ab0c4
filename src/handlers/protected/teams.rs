// handlers/protected/teams.rs - /teams handlers

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::teams::{CreateTeam, TeamListQuery, UpdateTeam};
use crate::services::TeamService;
use crate::AppState;

/// GET /teams - Includes `activeMembers` per team
pub async fn list(
    State(state): State<AppState>,
    _principal: Principal,
    query: Result<Query<TeamListQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (teams, pagination) = TeamService::new(state.pool).list(&query).await?;
    Ok(ApiResponse::success().with("teams", teams).pagination(pagination))
}

/// GET /teams/:id
pub async fn get(
    State(state): State<AppState>,
    _principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let team = TeamService::new(state.pool).get(id).await?;
    Ok(ApiResponse::success().with("team", team))
}

/// POST /teams
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateTeam>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let team = TeamService::new(state.pool).create(&principal, input).await?;
    Ok(ApiResponse::created().with("team", team).message("Team created"))
}

/// PUT /teams/:id - Admins, or the team's own manager
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateTeam>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let team = TeamService::new(state.pool).update(&principal, id, input).await?;
    Ok(ApiResponse::success().with("team", team).message("Team updated"))
}

/// DELETE /teams/:id - Refused while the team has active members
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    TeamService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("Team deleted"))
}

/// GET /teams/:id/members
pub async fn members(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let members = TeamService::new(state.pool).members(&principal, id).await?;
    Ok(ApiResponse::success().with("members", members))
}
