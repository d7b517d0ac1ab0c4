use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::database::models::resource::{
    HistoryAction, RequestStatus, ResourceCategory, ResourceType, ResourceUnit,
};
use crate::database::models::{NotificationKind, Resource, ResourceAllocation, ResourceHistoryEntry, ResourceRequest};
use crate::database::Repository;
use crate::error::{ApiError, Validator};
use crate::middleware::Principal;
use crate::policy::access::{ensure, is_admin_or_above, is_manager_or_above};
use crate::policy::ledger::{self, AllocationChange, Stock};
use crate::services::notifications::{fan_out, Notice, PgNotificationDirectory, RecipientSelection};
use crate::services::{all_of, clean, ensure_row, search_clause};
use crate::types::{double_option, PageQuery, Pagination};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(alias = "type")]
    pub resource_type: Option<ResourceType>,
    pub category: Option<ResourceCategory>,
    pub search: Option<String>,
    pub team_id: Option<i64>,
    pub is_active: Option<bool>,
    /// Only resources with something left to allocate
    pub available: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResource {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "type")]
    pub resource_type: Option<ResourceType>,
    pub category: Option<ResourceCategory>,
    pub unit: Option<ResourceUnit>,
    pub quantity: Option<i64>,
    pub location: Option<String>,
    pub team_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResource {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(alias = "type")]
    pub resource_type: Option<ResourceType>,
    pub category: Option<ResourceCategory>,
    pub unit: Option<ResourceUnit>,
    /// New total; allocations are kept and availability follows
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub team_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationInput {
    pub quantity: Option<i64>,
    pub project_id: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub quantity: Option<i64>,
    pub project_id: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDecision {
    Approve,
    Deny,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequest {
    pub action: RequestDecision,
    pub note: Option<String>,
}

pub fn list_filter(query: &ResourceListQuery) -> Value {
    let mut fields = serde_json::Map::new();
    if let Some(resource_type) = query.resource_type {
        fields.insert("resource_type".to_string(), json!(resource_type));
    }
    if let Some(category) = query.category {
        fields.insert("category".to_string(), json!(category));
    }
    if let Some(team_id) = query.team_id {
        fields.insert("team_id".to_string(), json!(team_id));
    }
    if let Some(is_active) = query.is_active {
        fields.insert("is_active".to_string(), json!(is_active));
    }
    if query.available == Some(true) {
        fields.insert("available_quantity".to_string(), json!({ "$gt": 0 }));
    }

    let mut clauses = vec![Value::Object(fields)];
    clauses.extend(search_clause(&["name", "description", "location"], query.search.as_deref()));
    all_of(clauses)
}

fn positive_quantity(quantity: Option<i64>) -> Result<i64, ApiError> {
    match quantity {
        Some(q) if q > 0 => Ok(q),
        Some(_) => Err(ledger::LedgerError::InvalidQuantity.into()),
        None => Err(ApiError::invalid_field("quantity", "This field is required")),
    }
}

async fn lock_resource(conn: &mut PgConnection, id: i64) -> Result<Resource, ApiError> {
    sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource not found"))
}

async fn write_stock(conn: &mut PgConnection, id: i64, stock: Stock) -> Result<Resource, ApiError> {
    let resource = sqlx::query_as::<_, Resource>(
        "UPDATE resources SET quantity = $2, available_quantity = $3, allocated_quantity = $4, updated_at = now() \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(stock.quantity)
    .bind(stock.available)
    .bind(stock.allocated)
    .fetch_one(conn)
    .await?;
    Ok(resource)
}

async fn record_history(
    conn: &mut PgConnection,
    resource_id: i64,
    action: HistoryAction,
    quantity: i64,
    project_id: Option<i64>,
    actor_id: i64,
    note: Option<String>,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO resource_history (resource_id, action, quantity, project_id, actor_id, note) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(resource_id)
    .bind(action)
    .bind(quantity)
    .bind(project_id)
    .bind(actor_id)
    .bind(note)
    .execute(conn)
    .await?;
    Ok(())
}

/// Move `quantity` from available to the project's allocation on a locked row
async fn allocate_locked(
    conn: &mut PgConnection,
    resource: &Resource,
    project_id: i64,
    quantity: i64,
    actor_id: i64,
) -> Result<(Resource, ResourceAllocation), ApiError> {
    if !resource.is_active {
        return Err(ApiError::conflict("ResourceInactive", "Inactive resources cannot be allocated"));
    }
    let stock = ledger::allocate(resource.stock(), quantity)?;
    let updated = write_stock(&mut *conn, resource.id, stock).await?;

    let allocation = sqlx::query_as::<_, ResourceAllocation>(
        "INSERT INTO resource_allocations (resource_id, project_id, quantity, allocated_by) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (resource_id, project_id) DO UPDATE \
         SET quantity = resource_allocations.quantity + EXCLUDED.quantity, \
             allocated_by = EXCLUDED.allocated_by, updated_at = now() \
         RETURNING *",
    )
    .bind(resource.id)
    .bind(project_id)
    .bind(quantity)
    .bind(actor_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((updated, allocation))
}

/// Outcome of a ledger mutation
#[derive(Debug)]
pub struct LedgerOutcome {
    pub resource: Resource,
    pub allocation: Option<ResourceAllocation>,
}

pub struct ResourceService {
    pool: PgPool,
}

impl ResourceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> Repository<Resource> {
        Repository::new("resources", self.pool.clone())
    }

    pub async fn list(&self, query: &ResourceListQuery) -> Result<(Vec<Resource>, Pagination), ApiError> {
        let (page, limit, offset) = PageQuery { page: query.page, limit: query.limit }.resolve();
        let (resources, total) = self
            .repo()
            .select_page(list_filter(query), "name asc, id asc", limit, offset)
            .await?;
        Ok((resources, Pagination::new(page, limit, total)))
    }

    pub async fn get(&self, id: i64) -> Result<Resource, ApiError> {
        Ok(self.repo().select_404(id, "Resource not found").await?)
    }

    pub async fn create(&self, principal: &Principal, input: CreateResource) -> Result<Resource, ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can create resources")?;
        Validator::new()
            .required(input.name.as_deref(), "name")
            .check(input.resource_type.is_some(), "resourceType", "This field is required")
            .check(input.category.is_some(), "category", "This field is required")
            .check(input.quantity.is_some(), "quantity", "This field is required")
            .finish()?;
        let stock = Stock::new(input.quantity.unwrap_or_default())?;
        if let Some(team_id) = input.team_id {
            ensure_row(&self.pool, "teams", team_id, "teamId").await?;
        }

        let resource = sqlx::query_as::<_, Resource>(
            "INSERT INTO resources (name, description, resource_type, category, unit, quantity, \
             available_quantity, allocated_quantity, location, team_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(clean(input.name.as_deref()))
        .bind(clean(input.description.as_deref()))
        .bind(input.resource_type)
        .bind(input.category)
        .bind(input.unit.unwrap_or(ResourceUnit::Piece))
        .bind(stock.quantity)
        .bind(stock.available)
        .bind(stock.allocated)
        .bind(clean(input.location.as_deref()))
        .bind(input.team_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Resource {} created with quantity {}", resource.id, resource.quantity);
        Ok(resource)
    }

    pub async fn update(&self, principal: &Principal, id: i64, input: UpdateResource) -> Result<Resource, ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can update resources")?;
        if let Some(name) = &input.name {
            Validator::new().required(Some(name), "name").finish()?;
        }
        if let Some(Some(team_id)) = input.team_id {
            ensure_row(&self.pool, "teams", team_id, "teamId").await?;
        }

        let mut tx = self.pool.begin().await?;
        let resource = lock_resource(&mut tx, id).await?;

        if let Some(quantity) = input.quantity.filter(|q| *q != resource.quantity) {
            let stock = ledger::adjust_total(resource.stock(), quantity)?;
            write_stock(&mut tx, id, stock).await?;
            record_history(
                &mut tx,
                id,
                HistoryAction::Adjusted,
                quantity - resource.quantity,
                None,
                principal.id,
                Some(format!("Total changed from {} to {}", resource.quantity, quantity)),
            )
            .await?;
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE resources SET updated_at = now()");
        if let Some(name) = &input.name {
            qb.push(", name = ").push_bind(name.trim());
        }
        if let Some(description) = &input.description {
            qb.push(", description = ").push_bind(description.as_deref());
        }
        if let Some(resource_type) = input.resource_type {
            qb.push(", resource_type = ").push_bind(resource_type);
        }
        if let Some(category) = input.category {
            qb.push(", category = ").push_bind(category);
        }
        if let Some(unit) = input.unit {
            qb.push(", unit = ").push_bind(unit);
        }
        if let Some(location) = &input.location {
            qb.push(", location = ").push_bind(location.as_deref());
        }
        if let Some(team_id) = input.team_id {
            qb.push(", team_id = ").push_bind(team_id);
        }
        if let Some(is_active) = input.is_active {
            qb.push(", is_active = ").push_bind(is_active);
        }
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let updated = qb.build_query_as::<Resource>().fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can delete resources")?;

        let mut tx = self.pool.begin().await?;
        let resource = lock_resource(&mut tx, id).await?;
        if resource.allocated_quantity > 0 {
            return Err(ApiError::conflict(
                "ResourceInUse",
                format!("{} units are still allocated", resource.allocated_quantity),
            ));
        }
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Resource {} deleted by account {}", id, principal.id);
        Ok(())
    }

    pub async fn allocate(&self, principal: &Principal, id: i64, input: AllocationInput) -> Result<LedgerOutcome, ApiError> {
        ensure(is_manager_or_above(principal), "Only managers can allocate resources")?;
        let quantity = positive_quantity(input.quantity)?;
        let project_id = input
            .project_id
            .ok_or_else(|| ApiError::invalid_field("projectId", "This field is required"))?;

        let mut tx = self.pool.begin().await?;
        let resource = lock_resource(&mut tx, id).await?;
        ensure_row(&mut *tx, "projects", project_id, "projectId").await?;

        let (resource, allocation) = allocate_locked(&mut tx, &resource, project_id, quantity, principal.id).await?;
        record_history(
            &mut tx,
            id,
            HistoryAction::Allocated,
            quantity,
            Some(project_id),
            principal.id,
            clean(input.note.as_deref()),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            "Allocated {} of resource {} to project {} (available {})",
            quantity,
            id,
            project_id,
            resource.available_quantity
        );
        Ok(LedgerOutcome { resource, allocation: Some(allocation) })
    }

    pub async fn deallocate(&self, principal: &Principal, id: i64, input: AllocationInput) -> Result<LedgerOutcome, ApiError> {
        ensure(is_manager_or_above(principal), "Only managers can release resources")?;
        let quantity = positive_quantity(input.quantity)?;
        let project_id = input
            .project_id
            .ok_or_else(|| ApiError::invalid_field("projectId", "This field is required"))?;

        let mut tx = self.pool.begin().await?;
        let resource = lock_resource(&mut tx, id).await?;
        let current = sqlx::query_as::<_, ResourceAllocation>(
            "SELECT * FROM resource_allocations WHERE resource_id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (stock, change) = ledger::deallocate(
            resource.stock(),
            project_id,
            current.as_ref().map(|a| a.quantity),
            quantity,
        )?;
        let resource = write_stock(&mut tx, id, stock).await?;

        let allocation = match change {
            AllocationChange::Remove => {
                sqlx::query("DELETE FROM resource_allocations WHERE resource_id = $1 AND project_id = $2")
                    .bind(id)
                    .bind(project_id)
                    .execute(&mut *tx)
                    .await?;
                None
            }
            AllocationChange::Shrink { remaining } => Some(
                sqlx::query_as::<_, ResourceAllocation>(
                    "UPDATE resource_allocations SET quantity = $3, updated_at = now() \
                     WHERE resource_id = $1 AND project_id = $2 RETURNING *",
                )
                .bind(id)
                .bind(project_id)
                .bind(remaining)
                .fetch_one(&mut *tx)
                .await?,
            ),
        };
        record_history(
            &mut tx,
            id,
            HistoryAction::Deallocated,
            quantity,
            Some(project_id),
            principal.id,
            clean(input.note.as_deref()),
        )
        .await?;
        tx.commit().await?;

        tracing::info!("Released {} of resource {} from project {}", quantity, id, project_id);
        Ok(LedgerOutcome { resource, allocation })
    }

    pub async fn allocations(&self, id: i64) -> Result<Vec<ResourceAllocation>, ApiError> {
        self.get(id).await?;
        let allocations = sqlx::query_as::<_, ResourceAllocation>(
            "SELECT * FROM resource_allocations WHERE resource_id = $1 ORDER BY project_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(allocations)
    }

    pub async fn history(&self, id: i64) -> Result<Vec<ResourceHistoryEntry>, ApiError> {
        self.get(id).await?;
        let history = sqlx::query_as::<_, ResourceHistoryEntry>(
            "SELECT * FROM resource_history WHERE resource_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(history)
    }

    /// Requests in index order (oldest first)
    pub async fn requests(&self, id: i64) -> Result<Vec<ResourceRequest>, ApiError> {
        self.get(id).await?;
        let requests = sqlx::query_as::<_, ResourceRequest>(
            "SELECT * FROM resource_requests WHERE resource_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    pub async fn create_request(&self, principal: &Principal, id: i64, input: CreateRequest) -> Result<ResourceRequest, ApiError> {
        let quantity = positive_quantity(input.quantity)?;
        let resource = self.get(id).await?;
        if !resource.is_active {
            return Err(ApiError::conflict("ResourceInactive", "Inactive resources cannot be requested"));
        }
        if let Some(project_id) = input.project_id {
            ensure_row(&self.pool, "projects", project_id, "projectId").await?;
        }

        let mut tx = self.pool.begin().await?;
        let request = sqlx::query_as::<_, ResourceRequest>(
            "INSERT INTO resource_requests (resource_id, requested_by, project_id, quantity, reason) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(id)
        .bind(principal.id)
        .bind(input.project_id)
        .bind(quantity)
        .bind(clean(input.reason.as_deref()))
        .fetch_one(&mut *tx)
        .await?;
        record_history(
            &mut tx,
            id,
            HistoryAction::Requested,
            quantity,
            input.project_id,
            principal.id,
            request.reason.clone(),
        )
        .await?;
        tx.commit().await?;

        Ok(request)
    }

    /// Approve or deny the request at `index` in the resource's request list
    pub async fn decide_request(
        &self,
        principal: &Principal,
        id: i64,
        index: i64,
        input: DecideRequest,
    ) -> Result<(ResourceRequest, Resource), ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can decide resource requests")?;

        let mut tx = self.pool.begin().await?;
        let mut resource = lock_resource(&mut tx, id).await?;

        let request = if index < 0 {
            None
        } else {
            sqlx::query_as::<_, ResourceRequest>(
                "SELECT * FROM resource_requests WHERE resource_id = $1 ORDER BY id OFFSET $2 LIMIT 1 FOR UPDATE",
            )
            .bind(id)
            .bind(index)
            .fetch_optional(&mut *tx)
            .await?
        };
        let request = request.ok_or_else(|| {
            ApiError::not_found_with("RequestNotFound", format!("No request at index {}", index))
        })?;
        if request.status != RequestStatus::Pending {
            return Err(ApiError::conflict(
                "AlreadyProcessed",
                format!("Request was already {}", request.status),
            ));
        }

        let note = clean(input.note.as_deref());
        let (status, action) = match input.action {
            RequestDecision::Approve => (RequestStatus::Approved, HistoryAction::RequestApproved),
            RequestDecision::Deny => (RequestStatus::Denied, HistoryAction::RequestDenied),
        };

        if let (RequestDecision::Approve, Some(project_id)) = (input.action, request.project_id) {
            let (allocated, _) = allocate_locked(&mut tx, &resource, project_id, request.quantity, principal.id).await?;
            resource = allocated;
        }

        let decided = sqlx::query_as::<_, ResourceRequest>(
            "UPDATE resource_requests SET status = $2, decided_by = $3, decided_at = now(), decision_note = $4 \
             WHERE id = $1 RETURNING *",
        )
        .bind(request.id)
        .bind(status)
        .bind(principal.id)
        .bind(&note)
        .fetch_one(&mut *tx)
        .await?;
        record_history(&mut tx, id, action, request.quantity, request.project_id, principal.id, note).await?;
        tx.commit().await?;

        tracing::info!("Resource request {} {} by account {}", decided.id, decided.status, principal.id);

        let kind = match input.action {
            RequestDecision::Approve => NotificationKind::ResourceRequestApproved,
            RequestDecision::Deny => NotificationKind::ResourceRequestDenied,
        };
        let notice = Notice {
            message: Some(format!("{}: {} x {}", kind.default_text().1, decided.quantity, resource.name)),
            metadata: json!({ "resourceId": id, "requestId": decided.id, "status": decided.status }),
            ..Notice::new(kind)
        };
        let selection = RecipientSelection {
            creator: Some(decided.requested_by),
            ..Default::default()
        };
        fan_out(&PgNotificationDirectory::new(self.pool.clone()), &notice, &selection).await;

        Ok((decided, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_filter_uses_greater_than() {
        let query = ResourceListQuery {
            available: Some(true),
            category: Some(ResourceCategory::Computing),
            ..Default::default()
        };
        assert_eq!(
            list_filter(&query),
            json!({ "available_quantity": { "$gt": 0 }, "category": "COMPUTING" })
        );
    }

    #[test]
    fn empty_query_matches_everything() {
        assert_eq!(list_filter(&ResourceListQuery::default()), json!({}));
    }

    #[test]
    fn quantities_must_be_positive() {
        assert_eq!(positive_quantity(Some(3)).unwrap(), 3);
        assert_eq!(positive_quantity(Some(0)).unwrap_err().error_code(), "ValidationFailed");
        assert_eq!(positive_quantity(None).unwrap_err().error_code(), "ValidationFailed");
    }

    #[test]
    fn decision_body_parses() {
        let body: DecideRequest = serde_json::from_value(json!({ "action": "deny", "note": "Out of budget" })).unwrap();
        assert_eq!(body.action, RequestDecision::Deny);
        assert!(serde_json::from_value::<DecideRequest>(json!({ "action": "maybe" })).is_err());
    }

    #[test]
    fn quantity_fields_are_not_writable_through_update() {
        let body: UpdateResource = serde_json::from_value(json!({
            "availableQuantity": 99,
            "allocatedQuantity": 0,
            "name": "Laptop"
        }))
        .unwrap();
        assert_eq!(body.quantity, None);
        assert_eq!(body.name.as_deref(), Some("Laptop"));
    }
}
