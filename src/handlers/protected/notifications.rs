// handlers/protected/notifications.rs - /notifications handlers

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::handlers::path_id;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::NotificationService;
use crate::types::PageQuery;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub unread: Option<bool>,
}

/// GET /notifications - The caller's own notifications, newest first
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<NotificationQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let page = PageQuery { page: query.page, limit: query.limit };
    let (notifications, pagination, unread) = NotificationService::new(state.pool)
        .list(&principal, query.unread.unwrap_or(false), &page)
        .await?;
    Ok(ApiResponse::success()
        .with("notifications", notifications)
        .with("unreadCount", unread)
        .pagination(pagination))
}

/// PUT /notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let notification = NotificationService::new(state.pool).mark_read(&principal, id).await?;
    Ok(ApiResponse::success().with("notification", notification))
}

/// PUT /notifications/read-all
pub async fn mark_all_read(State(state): State<AppState>, principal: Principal) -> ApiResult {
    let updated = NotificationService::new(state.pool).mark_all_read(&principal).await?;
    Ok(ApiResponse::success()
        .with("updated", updated)
        .message("All notifications marked as read"))
}

/// DELETE /notifications/:id
pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    NotificationService::new(state.pool).delete(&principal, id).await?;
    Ok(ApiResponse::success().message("Notification deleted"))
}
