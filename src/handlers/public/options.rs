// handlers/public/options.rs - GET /public/teams and GET /public/options handlers

use axum::extract::State;
use serde_json::json;

use crate::database::models::project::{ProjectPriority, ProjectStatus};
use crate::database::models::resource::{ResourceCategory, ResourceType, ResourceUnit};
use crate::database::models::ticket::{Department, TicketCategory, TicketType};
use crate::middleware::{ApiResponse, ApiResult};
use crate::policy::lifecycle::{TicketPriority, TicketStatus};
use crate::services::TeamService;
use crate::types::Role;
use crate::AppState;

/// GET /public/teams - Active teams (id and name) for registration forms
pub async fn teams_get(State(state): State<AppState>) -> ApiResult {
    let teams = TeamService::new(state.pool).options().await?;
    Ok(ApiResponse::success().with("teams", teams))
}

/// GET /public/options - Accepted values of every enumerated field
pub async fn options_get() -> ApiResult {
    Ok(ApiResponse::success().with(
        "options",
        json!({
            "roles": Role::values(),
            "ticketTypes": TicketType::values(),
            "ticketCategories": TicketCategory::values(),
            "ticketPriorities": TicketPriority::values(),
            "ticketStatuses": TicketStatus::values(),
            "departments": Department::values(),
            "projectStatuses": ProjectStatus::values(),
            "projectPriorities": ProjectPriority::values(),
            "resourceTypes": ResourceType::values(),
            "resourceCategories": ResourceCategory::values(),
            "resourceUnits": ResourceUnit::values(),
        }),
    ))
}
