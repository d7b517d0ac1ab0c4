use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};

use crate::database::models::project::{ClientInfo, Milestone, ProjectDocument, ProjectPriority, ProjectStatus, Risk};
use crate::database::models::ticket::Department;
use crate::database::models::Project;
use crate::database::Repository;
use crate::error::{ApiError, Validator};
use crate::middleware::{Principal, PrincipalKind};
use crate::policy::access::{can_view_team_scope, ensure, is_admin_or_above, is_manager_or_above, is_team_manager_of, owns_or_manages};
use crate::services::{all_of, clean, ensure_row, search_clause};
use crate::types::{deserialize_optional_date, double_option, double_option_date, PageQuery, Pagination};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    pub search: Option<String>,
    pub team_id: Option<i64>,
    pub manager_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub end_date: Option<NaiveDate>,
    pub budget: Option<Decimal>,
    pub progress: Option<i32>,
    pub manager_id: Option<i64>,
    pub team_id: Option<i64>,
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub documents: Vec<ProjectDocument>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProject {
    pub name: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    #[serde(default, deserialize_with = "double_option_date")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option_date")]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub budget: Option<Option<Decimal>>,
    pub progress: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub manager_id: Option<Option<i64>>,
    pub team_id: Option<i64>,
    pub departments: Option<Vec<Department>>,
    pub tags: Option<Vec<String>>,
    pub documents: Option<Vec<ProjectDocument>>,
    pub milestones: Option<Vec<Milestone>>,
    pub risks: Option<Vec<Risk>>,
    #[serde(default, deserialize_with = "double_option")]
    pub client_info: Option<Option<ClientInfo>>,
}

/// Projects a caller may list: own team, managed team, or everything
pub fn scope_filter(principal: &Principal) -> Value {
    match principal.kind {
        PrincipalKind::SuperAdmin => json!({}),
        PrincipalKind::Admin { managed_team: None } => json!({ "id": { "$in": [] } }),
        PrincipalKind::Admin { managed_team: Some(team_id) }
        | PrincipalKind::Team { team_id }
        | PrincipalKind::Member { team_id } => json!({ "team_id": team_id }),
    }
}

pub fn list_filter(principal: &Principal, query: &ProjectListQuery) -> Value {
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
    if let Some(manager_id) = query.manager_id {
        fields.insert("manager_id".to_string(), json!(manager_id));
    }

    let mut clauses = vec![scope_filter(principal), Value::Object(fields)];
    clauses.extend(search_clause(&["name", "code", "description"], query.search.as_deref()));
    all_of(clauses)
}

fn validate_numbers(validator: &mut Validator, progress: Option<i32>, budget: Option<Decimal>) {
    if let Some(progress) = progress {
        validator.check((0..=100).contains(&progress), "progress", "Progress must be between 0 and 100");
    }
    if let Some(budget) = budget {
        validator.check(budget >= Decimal::ZERO, "budget", "Budget cannot be negative");
    }
}

fn dates_ordered(start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => end >= start,
        _ => true,
    }
}

fn department_names(departments: &[Department]) -> Vec<String> {
    departments.iter().map(|d| d.as_str().to_string()).collect()
}

pub struct ProjectService {
    pool: PgPool,
}

impl ProjectService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> Repository<Project> {
        Repository::new("projects", self.pool.clone())
    }

    pub async fn list(&self, principal: &Principal, query: &ProjectListQuery) -> Result<(Vec<Project>, Pagination), ApiError> {
        let (page, limit, offset) = PageQuery { page: query.page, limit: query.limit }.resolve();
        let (projects, total) = self
            .repo()
            .select_page(list_filter(principal, query), "created_at desc, id desc", limit, offset)
            .await?;
        Ok((projects, Pagination::new(page, limit, total)))
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<Project, ApiError> {
        let project = self.repo().select_404(id, "Project not found").await?;
        ensure(
            can_view_team_scope(principal, project.team_id),
            "You do not have access to this project",
        )?;
        Ok(project)
    }

    async fn ensure_code_free(&self, code: &str, except: Option<i64>) -> Result<(), ApiError> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE code = $1 AND id <> $2)")
            .bind(code)
            .bind(except.unwrap_or(0))
            .fetch_one(&self.pool)
            .await?;
        if taken {
            return Err(ApiError::conflict("DuplicateCode", format!("Project code {} is already in use", code)));
        }
        Ok(())
    }

    pub async fn create(&self, principal: &Principal, input: CreateProject) -> Result<Project, ApiError> {
        ensure(is_manager_or_above(principal), "Only managers can create projects")?;

        let mut validator = Validator::new();
        validator
            .required(input.name.as_deref(), "name")
            .required(input.code.as_deref(), "code")
            .check(dates_ordered(input.start_date, input.end_date), "endDate", "End date cannot precede start date");
        validate_numbers(&mut validator, input.progress, input.budget);
        validator.finish()?;

        let team_id = input
            .team_id
            .or_else(|| principal.team_id())
            .ok_or_else(|| ApiError::invalid_field("teamId", "A team is required"))?;
        if !is_admin_or_above(principal) {
            ensure(is_team_manager_of(principal, team_id), "Team managers can only create projects for their own team")?;
        }
        ensure_row(&self.pool, "teams", team_id, "teamId").await?;
        if let Some(manager_id) = input.manager_id {
            ensure_row(&self.pool, "accounts", manager_id, "managerId").await?;
        }

        let code = clean(input.code.as_deref()).unwrap_or_default().to_uppercase();
        self.ensure_code_free(&code, None).await?;

        let project = sqlx::query_as::<_, Project>(
            "INSERT INTO projects (name, code, description, status, priority, start_date, end_date, budget, \
             progress, manager_id, team_id, departments, tags, documents, milestones, risks, client_info) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) RETURNING *",
        )
        .bind(clean(input.name.as_deref()))
        .bind(&code)
        .bind(clean(input.description.as_deref()))
        .bind(input.status.unwrap_or(ProjectStatus::Planning))
        .bind(input.priority.unwrap_or(ProjectPriority::Medium))
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.budget)
        .bind(input.progress.unwrap_or(0))
        .bind(input.manager_id.or(Some(principal.id)))
        .bind(team_id)
        .bind(department_names(&input.departments))
        .bind(&input.tags)
        .bind(Json(&input.documents))
        .bind(Json(&input.milestones))
        .bind(Json(&input.risks))
        .bind(input.client_info.as_ref().map(Json))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Project {} ({}) created by account {}", project.id, project.code, principal.id);
        Ok(project)
    }

    pub async fn update(&self, principal: &Principal, id: i64, input: UpdateProject) -> Result<Project, ApiError> {
        let project = self.repo().select_404(id, "Project not found").await?;
        ensure(
            owns_or_manages(principal, project.manager_id) || is_team_manager_of(principal, project.team_id),
            "You do not have permission to modify this project",
        )?;
        if input.team_id.is_some_and(|team| team != project.team_id) {
            ensure(is_admin_or_above(principal), "Only admins can move a project to another team")?;
        }

        let start = input.start_date.unwrap_or(project.start_date);
        let end = input.end_date.unwrap_or(project.end_date);
        let mut validator = Validator::new();
        if let Some(name) = &input.name {
            validator.required(Some(name), "name");
        }
        if let Some(code) = &input.code {
            validator.required(Some(code), "code");
        }
        validator.check(dates_ordered(start, end), "endDate", "End date cannot precede start date");
        validate_numbers(&mut validator, input.progress, input.budget.flatten());
        validator.finish()?;

        if let Some(team_id) = input.team_id {
            ensure_row(&self.pool, "teams", team_id, "teamId").await?;
        }
        if let Some(Some(manager_id)) = input.manager_id {
            ensure_row(&self.pool, "accounts", manager_id, "managerId").await?;
        }
        let code = input.code.as_deref().map(|c| c.trim().to_uppercase());
        if let Some(code) = &code {
            self.ensure_code_free(code, Some(id)).await?;
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE projects SET updated_at = now()");
        if let Some(name) = &input.name {
            qb.push(", name = ").push_bind(name.trim());
        }
        if let Some(code) = &code {
            qb.push(", code = ").push_bind(code);
        }
        if let Some(description) = &input.description {
            qb.push(", description = ").push_bind(description.as_deref());
        }
        if let Some(status) = input.status {
            qb.push(", status = ").push_bind(status);
        }
        if let Some(priority) = input.priority {
            qb.push(", priority = ").push_bind(priority);
        }
        if let Some(start_date) = input.start_date {
            qb.push(", start_date = ").push_bind(start_date);
        }
        if let Some(end_date) = input.end_date {
            qb.push(", end_date = ").push_bind(end_date);
        }
        if let Some(budget) = input.budget {
            qb.push(", budget = ").push_bind(budget);
        }
        if let Some(progress) = input.progress {
            qb.push(", progress = ").push_bind(progress);
        }
        if let Some(manager_id) = input.manager_id {
            qb.push(", manager_id = ").push_bind(manager_id);
        }
        if let Some(team_id) = input.team_id {
            qb.push(", team_id = ").push_bind(team_id);
        }
        if let Some(departments) = &input.departments {
            qb.push(", departments = ").push_bind(department_names(departments));
        }
        if let Some(tags) = &input.tags {
            qb.push(", tags = ").push_bind(tags);
        }
        if let Some(documents) = &input.documents {
            qb.push(", documents = ").push_bind(Json(documents));
        }
        if let Some(milestones) = &input.milestones {
            qb.push(", milestones = ").push_bind(Json(milestones));
        }
        if let Some(risks) = &input.risks {
            qb.push(", risks = ").push_bind(Json(risks));
        }
        if let Some(client_info) = &input.client_info {
            qb.push(", client_info = ").push_bind(client_info.as_ref().map(Json));
        }
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let updated = qb.build_query_as::<Project>().fetch_one(&self.pool).await?;
        tracing::info!("Project {} updated by account {}", id, principal.id);
        Ok(updated)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can delete projects")?;
        let project = self.repo().select_404(id, "Project not found").await?;

        let mut tx = self.pool.begin().await?;
        let open_tickets: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets WHERE project_id = $1 AND status NOT IN ('COMPLETED', 'REJECTED')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if open_tickets > 0 {
            return Err(ApiError::conflict(
                "ProjectHasActiveTickets",
                format!("Project {} still has {} open tickets", project.code, open_tickets),
            ));
        }
        let allocations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resource_allocations WHERE project_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if allocations > 0 {
            return Err(ApiError::conflict(
                "ProjectHasAllocations",
                format!("Project {} still holds allocated resources", project.code),
            ));
        }

        sqlx::query("UPDATE tickets SET project_id = NULL WHERE project_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Project {} deleted by account {}", id, principal.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::access::fixtures;

    #[test]
    fn scope_follows_team() {
        assert_eq!(scope_filter(&fixtures::member(5, 2)), json!({ "team_id": 2 }));
        assert_eq!(scope_filter(&fixtures::manager(6, 3)), json!({ "team_id": 3 }));
        assert_eq!(scope_filter(&fixtures::admin(7)), json!({ "id": { "$in": [] } }));
        assert_eq!(scope_filter(&fixtures::super_admin(1)), json!({}));
    }

    #[test]
    fn search_covers_name_code_and_description() {
        let query = ProjectListQuery {
            search: Some("erp".to_string()),
            ..Default::default()
        };
        let filter = list_filter(&fixtures::super_admin(1), &query);
        assert_eq!(filter["$or"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn dates_must_be_ordered() {
        let jan = NaiveDate::from_ymd_opt(2025, 1, 1);
        let feb = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert!(dates_ordered(jan, feb));
        assert!(dates_ordered(jan, jan));
        assert!(!dates_ordered(feb, jan));
        assert!(dates_ordered(None, jan));
    }

    #[test]
    fn numbers_are_range_checked() {
        let mut validator = Validator::new();
        validate_numbers(&mut validator, Some(101), Some(Decimal::new(-1, 0)));
        let err = validator.finish().unwrap_err();
        let details = err.to_json()["details"].as_array().map(Vec::len);
        assert_eq!(details, Some(2));

        let mut validator = Validator::new();
        validate_numbers(&mut validator, Some(100), Some(Decimal::ZERO));
        assert!(validator.finish().is_ok());
    }

    #[test]
    fn typed_json_fields_deserialize() {
        let body: CreateProject = serde_json::from_value(json!({
            "name": "ERP rollout",
            "code": "erp-1",
            "departments": ["IT", "FINANCE"],
            "milestones": [{ "title": "Kickoff", "dueDate": "2025-02-01" }],
            "clientInfo": { "name": "Acme" },
            "budget": "1500.50"
        }))
        .unwrap();
        assert_eq!(body.departments, vec![Department::It, Department::Finance]);
        assert_eq!(body.milestones[0].due_date, NaiveDate::from_ymd_opt(2025, 2, 1));
        assert!(!body.milestones[0].completed);
        assert_eq!(body.budget, Some(Decimal::new(150050, 2)));
        assert_eq!(department_names(&body.departments), vec!["IT", "FINANCE"]);
    }

    #[test]
    fn explicit_null_clears_optional_fields() {
        let body: UpdateProject = serde_json::from_value(json!({ "managerId": null, "endDate": null })).unwrap();
        assert_eq!(body.manager_id, Some(None));
        assert_eq!(body.end_date, Some(None));
        assert_eq!(body.start_date, None);
    }
}
