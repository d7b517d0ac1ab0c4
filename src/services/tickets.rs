use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::models::ticket::{Department, TicketCategory, TicketDetail, TicketType};
use crate::database::models::{Ticket, TicketAttachment, TicketComment, TicketResource};
use crate::database::Repository;
use crate::error::{ApiError, Validator};
use crate::middleware::{Principal, PrincipalKind};
use crate::policy::access::{can_manage_ticket, ensure, is_manager_or_above};
use crate::policy::lifecycle::{self, ChangePlan, TicketChange, TicketEvent, TicketPriority, TicketStatus};
use crate::services::notifications::notify_ticket_event;
use crate::services::{all_of, clean, ensure_row, search_clause};
use crate::types::{
    deserialize_optional_date, double_option, double_option_date, PageQuery, Pagination,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub search: Option<String>,
    pub team_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub project_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttachment {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "type")]
    pub ticket_type: Option<TicketType>,
    pub category: Option<TicketCategory>,
    pub department: Option<Department>,
    pub priority: Option<TicketPriority>,
    pub team_id: Option<i64>,
    pub project_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

/// Editable ticket fields; absent fields are left alone, explicit `null`
/// clears the nullable ones.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "type")]
    pub ticket_type: Option<TicketType>,
    pub category: Option<TicketCategory>,
    pub department: Option<Department>,
    pub priority: Option<TicketPriority>,
    pub status: Option<TicketStatus>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub expected_closure: Option<NaiveDate>,
    pub rejection_reason: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_team_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option_date")]
    pub due_date: Option<Option<NaiveDate>>,
    pub tags: Option<Vec<String>>,
}

impl UpdateTicket {
    fn lifecycle_change(&self) -> TicketChange {
        TicketChange {
            status: self.status,
            priority: self.priority,
            expected_closure: self.expected_closure,
            rejection_reason: self.rejection_reason.clone(),
        }
    }

    fn touches_assignment(&self) -> bool {
        self.assigned_to.is_some() || self.assigned_team_id.is_some()
    }

    fn touches_details(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.ticket_type.is_some()
            || self.category.is_some()
            || self.department.is_some()
            || self.project_id.is_some()
            || self.due_date.is_some()
            || self.tags.is_some()
            || self.touches_assignment()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveTicket {
    pub action: ApprovalAction,
    pub priority: Option<TicketPriority>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub expected_closure: Option<NaiveDate>,
    pub rejection_reason: Option<String>,
}

impl ApproveTicket {
    fn lifecycle_change(&self) -> TicketChange {
        match self.action {
            ApprovalAction::Approve => TicketChange {
                status: Some(TicketStatus::Approved),
                priority: self.priority,
                expected_closure: self.expected_closure,
                rejection_reason: None,
            },
            ApprovalAction::Reject => TicketChange {
                status: Some(TicketStatus::Rejected),
                rejection_reason: self.rejection_reason.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(alias = "comment", alias = "text")]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicketResource {
    pub resource_id: Option<i64>,
    pub quantity: Option<i64>,
    pub notes: Option<String>,
}

/// Rows a caller may see in ticket lists
pub fn scope_filter(principal: &Principal) -> Value {
    match principal.kind {
        PrincipalKind::SuperAdmin => json!({}),
        PrincipalKind::Admin { managed_team: Some(team_id) } => json!({ "team_id": team_id }),
        PrincipalKind::Admin { managed_team: None } => json!({ "id": { "$in": [] } }),
        PrincipalKind::Team { team_id } => json!({
            "$or": [{ "team_id": team_id }, { "assigned_team_id": team_id }]
        }),
        PrincipalKind::Member { .. } => json!({
            "$or": [{ "created_by": principal.id }, { "assigned_to": principal.id }]
        }),
    }
}

/// Scope plus the optional query filters
pub fn list_filter(principal: &Principal, query: &TicketListQuery) -> Value {
    let mut fields = serde_json::Map::new();
    if let Some(status) = query.status {
        fields.insert("status".to_string(), json!(status));
    }
    if let Some(priority) = query.priority {
        fields.insert("priority".to_string(), json!(priority));
    }
    if let Some(team_id) = query.team_id {
        fields.insert("team_id".to_string(), json!(team_id));
    }
    if let Some(assigned_to) = query.assigned_to {
        fields.insert("assigned_to".to_string(), json!(assigned_to));
    }
    if let Some(created_by) = query.created_by {
        fields.insert("created_by".to_string(), json!(created_by));
    }
    if let Some(project_id) = query.project_id {
        fields.insert("project_id".to_string(), json!(project_id));
    }

    let mut clauses = vec![scope_filter(principal), Value::Object(fields)];
    clauses.extend(search_clause(&["title", "description"], query.search.as_deref()));
    all_of(clauses)
}

pub struct TicketService {
    pool: PgPool,
}

impl TicketService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> Repository<Ticket> {
        Repository::new("tickets", self.pool.clone())
    }

    pub async fn list(&self, principal: &Principal, query: &TicketListQuery) -> Result<(Vec<Ticket>, Pagination), ApiError> {
        let page = PageQuery { page: query.page, limit: query.limit };
        let (page, limit, offset) = page.resolve();
        let (tickets, total) = self
            .repo()
            .select_page(list_filter(principal, query), "created_at desc, id desc", limit, offset)
            .await?;
        Ok((tickets, Pagination::new(page, limit, total)))
    }

    /// Load a ticket the caller may work with: 404 first, then 403
    async fn accessible(&self, principal: &Principal, id: i64) -> Result<Ticket, ApiError> {
        let ticket = self.repo().select_404(id, "Ticket not found").await?;
        ensure(
            can_manage_ticket(principal, &ticket),
            "You do not have access to this ticket",
        )?;
        Ok(ticket)
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<TicketDetail, ApiError> {
        let ticket = self.accessible(principal, id).await?;

        let comments = sqlx::query_as::<_, TicketComment>(
            "SELECT * FROM ticket_comments WHERE ticket_id = $1 ORDER BY created_at, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let attachments = sqlx::query_as::<_, TicketAttachment>(
            "SELECT * FROM ticket_attachments WHERE ticket_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let resources = sqlx::query_as::<_, TicketResource>(
            "SELECT * FROM ticket_resources WHERE ticket_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(TicketDetail { ticket, comments, attachments, resources })
    }

    pub async fn create(&self, principal: &Principal, input: CreateTicket) -> Result<Ticket, ApiError> {
        let mut validator = Validator::new();
        validator
            .required(input.title.as_deref(), "title")
            .required(input.description.as_deref(), "description");
        for (i, attachment) in input.attachments.iter().enumerate() {
            validator.check(
                !attachment.file_name.trim().is_empty() && !attachment.url.trim().is_empty(),
                &format!("attachments[{}]", i),
                "Attachments need a file name and a url",
            );
        }
        validator.finish()?;

        let team_id = input
            .team_id
            .or_else(|| principal.team_id())
            .ok_or_else(|| ApiError::invalid_field("teamId", "A team is required"))?;

        let team_department: Option<Option<Department>> =
            sqlx::query_scalar("SELECT department FROM teams WHERE id = $1 AND is_active")
                .bind(team_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(team_department) = team_department else {
            return Err(ApiError::invalid_field("teamId", "Team not found or inactive"));
        };
        if let Some(project_id) = input.project_id {
            ensure_row(&self.pool, "projects", project_id, "projectId").await?;
        }

        let department = input.department.or(team_department).unwrap_or(Department::Other);
        let mut tx = self.pool.begin().await?;

        let ticket = sqlx::query_as::<_, Ticket>(
            "INSERT INTO tickets (title, description, ticket_type, category, department, priority, \
             created_by, team_id, project_id, due_date, tags) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(clean(input.title.as_deref()))
        .bind(clean(input.description.as_deref()))
        .bind(input.ticket_type.unwrap_or(TicketType::Incident))
        .bind(input.category.unwrap_or(TicketCategory::Other))
        .bind(department)
        .bind(input.priority.unwrap_or(TicketPriority::Medium))
        .bind(principal.id)
        .bind(team_id)
        .bind(input.project_id)
        .bind(input.due_date)
        .bind(&input.tags)
        .fetch_one(&mut *tx)
        .await?;

        for attachment in &input.attachments {
            sqlx::query(
                "INSERT INTO ticket_attachments (ticket_id, file_name, url, uploaded_by) VALUES ($1, $2, $3, $4)",
            )
            .bind(ticket.id)
            .bind(attachment.file_name.trim())
            .bind(attachment.url.trim())
            .bind(principal.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!("Ticket {} created by account {} for team {}", ticket.id, principal.id, team_id);

        notify_ticket_event(&self.pool, TicketEvent::Created, &ticket).await;
        Ok(ticket)
    }

    pub async fn update(&self, principal: &Principal, id: i64, input: UpdateTicket) -> Result<Ticket, ApiError> {
        let mut validator = Validator::new();
        if let Some(title) = &input.title {
            validator.required(Some(title), "title");
        }
        if let Some(description) = &input.description {
            validator.required(Some(description), "description");
        }
        validator.finish()?;

        self.apply(principal, id, &input.lifecycle_change(), &input).await
    }

    pub async fn approve(&self, principal: &Principal, id: i64, input: ApproveTicket) -> Result<Ticket, ApiError> {
        self.apply(principal, id, &input.lifecycle_change(), &UpdateTicket::default())
            .await
    }

    /// Lock the ticket, plan the lifecycle change, write it, then announce it
    async fn apply(
        &self,
        principal: &Principal,
        id: i64,
        change: &TicketChange,
        edits: &UpdateTicket,
    ) -> Result<Ticket, ApiError> {
        let mut tx = self.pool.begin().await?;

        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::not_found("Ticket not found"))?;

        let plan = lifecycle::plan_change(principal, &ticket, change, Utc::now())?;

        if edits.touches_details() && ticket.status.is_terminal() {
            return Err(ApiError::conflict(
                "AlreadyProcessed",
                format!("Ticket is {} and can no longer be edited", ticket.status),
            ));
        }
        if edits.touches_assignment() {
            ensure(is_manager_or_above(principal), "Only managers can assign tickets")?;
        }
        if let Some(Some(account_id)) = edits.assigned_to {
            ensure_row(&mut *tx, "accounts", account_id, "assignedTo").await?;
        }
        if let Some(Some(team_id)) = edits.assigned_team_id {
            ensure_row(&mut *tx, "teams", team_id, "assignedTeamId").await?;
        }
        if let Some(Some(project_id)) = edits.project_id {
            ensure_row(&mut *tx, "projects", project_id, "projectId").await?;
        }

        if plan.is_empty() && !edits.touches_details() {
            tx.rollback().await?;
            return Ok(ticket);
        }

        let updated = update_query(id, &plan, edits)
            .build_query_as::<Ticket>()
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut events: Vec<TicketEvent> = plan.event.into_iter().collect();
        let reassigned = updated.assigned_to.is_some() && updated.assigned_to != ticket.assigned_to;
        let delegated =
            updated.assigned_team_id.is_some() && updated.assigned_team_id != ticket.assigned_team_id;
        if reassigned || delegated {
            events.push(TicketEvent::Assigned);
        }

        if let Some(status) = plan.status {
            tracing::info!("Ticket {} moved {} -> {} by account {}", id, ticket.status, status, principal.id);
        }
        for event in events {
            notify_ticket_event(&self.pool, event, &updated).await;
        }
        Ok(updated)
    }

    pub async fn add_comment(&self, principal: &Principal, id: i64, input: NewComment) -> Result<TicketComment, ApiError> {
        let body = clean(input.body.as_deref()).ok_or_else(|| ApiError::invalid_field("body", "Comment text is required"))?;
        let ticket = self.accessible(principal, id).await?;

        let comment = sqlx::query_as::<_, TicketComment>(
            "INSERT INTO ticket_comments (ticket_id, author_id, body) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(id)
        .bind(principal.id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        notify_ticket_event(&self.pool, TicketEvent::Commented, &ticket).await;
        Ok(comment)
    }

    pub async fn add_resource(
        &self,
        principal: &Principal,
        id: i64,
        input: NewTicketResource,
    ) -> Result<TicketResource, ApiError> {
        Validator::new()
            .check(input.resource_id.is_some(), "resourceId", "This field is required")
            .check(input.quantity.map_or(false, |q| q > 0), "quantity", "Quantity must be a positive number")
            .finish()?;
        let ticket = self.accessible(principal, id).await?;
        if ticket.status.is_terminal() {
            return Err(ApiError::conflict(
                "AlreadyProcessed",
                format!("Ticket is {} and can no longer be edited", ticket.status),
            ));
        }

        let resource_id = input.resource_id.unwrap_or_default();
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM resources WHERE id = $1")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;
        if active != Some(true) {
            return Err(ApiError::invalid_field("resourceId", "Resource not found or inactive"));
        }

        let need = sqlx::query_as::<_, TicketResource>(
            "INSERT INTO ticket_resources (ticket_id, resource_id, quantity, notes, added_by) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(id)
        .bind(resource_id)
        .bind(input.quantity)
        .bind(clean(input.notes.as_deref()))
        .bind(principal.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(need)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        let ticket = self.repo().select_404(id, "Ticket not found").await?;
        lifecycle::check_deletable(principal, &ticket)?;

        sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Ticket {} deleted by account {}", id, principal.id);
        Ok(())
    }
}

/// `UPDATE tickets SET ...` for the planned lifecycle fields and plain edits
fn update_query<'a>(id: i64, plan: &'a ChangePlan, edits: &'a UpdateTicket) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE tickets SET updated_at = now()");

    if let Some(status) = plan.status {
        qb.push(", status = ").push_bind(status);
    }
    if let Some(priority) = plan.priority {
        qb.push(", priority = ").push_bind(priority);
    }
    if let Some(expected_closure) = plan.expected_closure {
        qb.push(", expected_closure = ").push_bind(expected_closure);
    }
    if let Some(approved_by) = plan.approved_by {
        qb.push(", approved_by = ").push_bind(approved_by);
    }
    if let Some(approved_at) = plan.approved_at {
        qb.push(", approved_at = ").push_bind(approved_at);
    }
    if let Some(reason) = &plan.rejection_reason {
        qb.push(", rejection_reason = ").push_bind(reason);
    }
    if let Some(closed_at) = plan.actual_closure {
        qb.push(", actual_closure = ").push_bind(closed_at);
    }

    if let Some(title) = &edits.title {
        qb.push(", title = ").push_bind(title.trim());
    }
    if let Some(description) = &edits.description {
        qb.push(", description = ").push_bind(description.trim());
    }
    if let Some(ticket_type) = edits.ticket_type {
        qb.push(", ticket_type = ").push_bind(ticket_type);
    }
    if let Some(category) = edits.category {
        qb.push(", category = ").push_bind(category);
    }
    if let Some(department) = edits.department {
        qb.push(", department = ").push_bind(department);
    }
    if let Some(assigned_to) = edits.assigned_to {
        qb.push(", assigned_to = ").push_bind(assigned_to);
    }
    if let Some(assigned_team_id) = edits.assigned_team_id {
        qb.push(", assigned_team_id = ").push_bind(assigned_team_id);
    }
    if let Some(project_id) = edits.project_id {
        qb.push(", project_id = ").push_bind(project_id);
    }
    if let Some(due_date) = edits.due_date {
        qb.push(", due_date = ").push_bind(due_date);
    }
    if let Some(tags) = &edits.tags {
        qb.push(", tags = ").push_bind(tags);
    }

    qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");
    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::access::fixtures;

    #[test]
    fn scope_per_role() {
        assert_eq!(scope_filter(&fixtures::super_admin(1)), json!({}));
        assert_eq!(
            scope_filter(&fixtures::member(5, 2)),
            json!({ "$or": [{ "created_by": 5 }, { "assigned_to": 5 }] })
        );
        assert_eq!(
            scope_filter(&fixtures::manager(6, 2)),
            json!({ "$or": [{ "team_id": 2 }, { "assigned_team_id": 2 }] })
        );
        assert_eq!(scope_filter(&fixtures::admin(7)), json!({ "id": { "$in": [] } }));

        let managing = fixtures::principal(8, PrincipalKind::Admin { managed_team: Some(3) });
        assert_eq!(scope_filter(&managing), json!({ "team_id": 3 }));
    }

    #[test]
    fn list_filter_combines_scope_fields_and_search() {
        let query = TicketListQuery {
            status: Some(TicketStatus::Approved),
            search: Some("vpn".to_string()),
            ..Default::default()
        };
        let filter = list_filter(&fixtures::member(5, 2), &query);
        assert_eq!(
            filter,
            json!({ "$and": [
                { "$or": [{ "created_by": 5 }, { "assigned_to": 5 }] },
                { "status": "APPROVED" },
                { "$or": [{ "title": { "$ilike": "%vpn%" } }, { "description": { "$ilike": "%vpn%" } }] }
            ] })
        );
    }

    #[test]
    fn super_admin_without_filters_sees_everything() {
        let filter = list_filter(&fixtures::super_admin(1), &TicketListQuery::default());
        assert_eq!(filter, json!({}));
    }

    #[test]
    fn create_body_needs_only_title_and_description() {
        let body: CreateTicket = serde_json::from_value(json!({
            "title": "Fix login bug",
            "description": "Users cannot log in after reset",
            "teamId": 1,
            "priority": "HIGH",
            "dueDate": "2025-12-31"
        }))
        .unwrap();
        assert_eq!(body.ticket_type, None);
        assert_eq!(body.category, None);
        assert_eq!(body.team_id, Some(1));
        assert_eq!(body.priority, Some(TicketPriority::High));
        assert_eq!(body.due_date, NaiveDate::from_ymd_opt(2025, 12, 31));
    }

    #[test]
    fn approve_body_maps_to_lifecycle_change() {
        let body: ApproveTicket = serde_json::from_value(json!({
            "action": "approve",
            "expectedClosure": "2025-03-01",
            "priority": "HIGH"
        }))
        .unwrap();
        let change = body.lifecycle_change();
        assert_eq!(change.status, Some(TicketStatus::Approved));
        assert_eq!(change.priority, Some(TicketPriority::High));
        assert_eq!(change.expected_closure, NaiveDate::from_ymd_opt(2025, 3, 1));

        let body: ApproveTicket = serde_json::from_value(json!({
            "action": "reject",
            "priority": "HIGH",
            "rejectionReason": "Duplicate"
        }))
        .unwrap();
        let change = body.lifecycle_change();
        assert_eq!(change.status, Some(TicketStatus::Rejected));
        assert_eq!(change.priority, None);
        assert_eq!(change.rejection_reason.as_deref(), Some("Duplicate"));
    }

    #[test]
    fn update_body_distinguishes_null_from_absent() {
        let body: UpdateTicket = serde_json::from_value(json!({ "assignedTo": null, "title": "New" })).unwrap();
        assert_eq!(body.assigned_to, Some(None));
        assert_eq!(body.assigned_team_id, None);
        assert!(body.touches_assignment());
        assert!(body.touches_details());

        let body: UpdateTicket = serde_json::from_value(json!({ "status": "IN_PROGRESS" })).unwrap();
        assert!(!body.touches_details());
        assert_eq!(body.lifecycle_change().status, Some(TicketStatus::InProgress));
    }

    #[test]
    fn server_managed_fields_are_ignored() {
        let body: UpdateTicket = serde_json::from_value(json!({
            "approvedBy": 1,
            "createdBy": 2,
            "actualClosure": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(!body.touches_details());
        assert_eq!(body.lifecycle_change(), TicketChange::default());
    }
}
