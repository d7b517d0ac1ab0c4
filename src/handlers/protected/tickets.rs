// handlers/protected/tickets.rs - /tickets handlers

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::tickets::{
    ApproveTicket, CreateTicket, NewComment, NewTicketResource, TicketListQuery, UpdateTicket,
};
use crate::services::TicketService;
use crate::AppState;

/// GET /tickets - Tickets in the caller's scope
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<TicketListQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (tickets, pagination) = TicketService::new(state.pool).list(&principal, &query).await?;
    Ok(ApiResponse::success().with("tickets", tickets).pagination(pagination))
}

/// GET /tickets/:id - One ticket with comments, attachments and resource needs
pub async fn get(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let ticket = TicketService::new(state.pool).get(&principal, id).await?;
    Ok(ApiResponse::success().with("ticket", ticket))
}

/**
 * POST /tickets - Submit a ticket (starts PENDING_APPROVAL)
 *
 * ```json
 * { "title": "VPN down", "description": "...", "ticketType": "INCIDENT", "category": "NETWORK",
 *   "priority": "HIGH", "teamId": 2, "attachments": [{ "fileName": "log.txt", "url": "https://..." }] }
 * ```
 */
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateTicket>, JsonRejection>,
) -> ApiResult {
    let Json(input) = payload?;
    let ticket = TicketService::new(state.pool).create(&principal, input).await?;
    Ok(ApiResponse::created().with("ticket", ticket).message("Ticket created"))
}

/// PUT /tickets/:id - Edit fields and move the ticket through its lifecycle
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateTicket>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let ticket = TicketService::new(state.pool).update(&principal, id, input).await?;
    Ok(ApiResponse::success().with("ticket", ticket).message("Ticket updated"))
}

/**
 * PUT /tickets/:id/approve - Approve or reject a pending ticket (admins)
 *
 * ```json
 * { "action": "reject", "rejectionReason": "Duplicate of #12" }
 * ```
 */
pub async fn approve(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ApproveTicket>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let ticket = TicketService::new(state.pool).approve(&principal, id, input).await?;
    let message = format!("Ticket {}", ticket.status.as_str().to_lowercase());
    Ok(ApiResponse::success().with("ticket", ticket).message(message))
}

/// POST /tickets/:id/comments - Add a comment
pub async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewComment>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let comment = TicketService::new(state.pool).add_comment(&principal, id, input).await?;
    Ok(ApiResponse::created().with("comment", comment).message("Comment added"))
}

/// POST /tickets/:id/resources - Record a resource the ticket needs
pub async fn add_resource(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewTicketResource>, JsonRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let Json(input) = payload?;
    let resource = TicketService::new(state.pool).add_resource(&principal, id, input).await?;
    Ok(ApiResponse::created().with("resource", resource).message("Resource added to ticket"))
}

/// DELETE /tickets/:id - Creator or admin, before work starts
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    TicketService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("Ticket deleted"))
}
