use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::database::models::team::TeamOption;
use crate::database::models::ticket::Department;
use crate::database::models::{Account, Team};
use crate::database::Repository;
use crate::error::{ApiError, Validator};
use crate::middleware::Principal;
use crate::policy::access::{can_view_team_scope, ensure, is_admin_or_above, is_team_manager_of};
use crate::services::{all_of, clean, search_clause};
use crate::types::{double_option, PageQuery, Pagination};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub department: Option<Department>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeam {
    pub name: Option<String>,
    pub description: Option<String>,
    pub department: Option<Department>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTeam {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub department: Option<Option<Department>>,
    pub is_active: Option<bool>,
}

/// Rows that still point at a team about to be deleted
#[derive(Debug, Default, sqlx::FromRow)]
pub(crate) struct TeamDependents {
    pub active_members: i64,
    pub members: i64,
    pub tickets: i64,
    pub projects: i64,
}

impl TeamDependents {
    /// The first dependent that blocks deletion, as a named conflict
    pub(crate) fn blocker(&self, team: &str) -> Option<ApiError> {
        if self.active_members > 0 {
            return Some(ApiError::conflict(
                "TeamHasActiveMembers",
                format!("Team {} still has {} active members", team, self.active_members),
            ));
        }
        if self.members > 0 {
            return Some(ApiError::conflict(
                "TeamHasMembers",
                format!("Team {} still has {} deactivated members", team, self.members),
            ));
        }
        if self.tickets > 0 {
            return Some(ApiError::conflict(
                "TeamHasTickets",
                format!("Team {} is still referenced by {} tickets", team, self.tickets),
            ));
        }
        if self.projects > 0 {
            return Some(ApiError::conflict(
                "TeamHasProjects",
                format!("Team {} still owns {} projects", team, self.projects),
            ));
        }
        None
    }
}

pub fn list_filter(query: &TeamListQuery) -> Value {
    let mut fields = serde_json::Map::new();
    if let Some(department) = query.department {
        fields.insert("department".to_string(), json!(department));
    }
    if let Some(is_active) = query.is_active {
        fields.insert("is_active".to_string(), json!(is_active));
    }
    let mut clauses = vec![Value::Object(fields)];
    clauses.extend(search_clause(&["name", "description"], query.search.as_deref()));
    all_of(clauses)
}

/// Insert a team, reporting a taken name as `DuplicateTeamName`
pub(crate) async fn insert_team(
    conn: &mut PgConnection,
    name: &str,
    description: Option<String>,
    department: Option<Department>,
) -> Result<i64, ApiError> {
    let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM teams WHERE lower(name) = lower($1))")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    if taken {
        return Err(ApiError::conflict("DuplicateTeamName", format!("Team {} already exists", name)));
    }

    let id: i64 = sqlx::query_scalar("INSERT INTO teams (name, description, department) VALUES ($1, $2, $3) RETURNING id")
        .bind(name)
        .bind(description)
        .bind(department)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub struct TeamService {
    pool: PgPool,
}

impl TeamService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> Repository<Team> {
        Repository::new("team_overview", self.pool.clone())
    }

    pub async fn list(&self, query: &TeamListQuery) -> Result<(Vec<Team>, Pagination), ApiError> {
        let (page, limit, offset) = PageQuery { page: query.page, limit: query.limit }.resolve();
        let (teams, total) = self
            .repo()
            .select_page(list_filter(query), "name asc", limit, offset)
            .await?;
        Ok((teams, Pagination::new(page, limit, total)))
    }

    /// Active teams for registration dropdowns
    pub async fn options(&self) -> Result<Vec<TeamOption>, ApiError> {
        let teams = sqlx::query_as::<_, TeamOption>("SELECT id, name FROM teams WHERE is_active ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(teams)
    }

    pub async fn get(&self, id: i64) -> Result<Team, ApiError> {
        Ok(self.repo().select_404(id, "Team not found").await?)
    }

    pub async fn create(&self, principal: &Principal, input: CreateTeam) -> Result<Team, ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can create teams")?;
        Validator::new().required(input.name.as_deref(), "name").finish()?;

        let name = clean(input.name.as_deref()).unwrap_or_default();
        let mut conn = self.pool.acquire().await?;
        let id = insert_team(&mut conn, &name, clean(input.description.as_deref()), input.department).await?;

        tracing::info!("Team {} ({}) created by account {}", id, name, principal.id);
        self.get(id).await
    }

    pub async fn update(&self, principal: &Principal, id: i64, input: UpdateTeam) -> Result<Team, ApiError> {
        let team = self.get(id).await?;
        ensure(
            is_admin_or_above(principal) || is_team_manager_of(principal, id),
            "You do not have permission to modify this team",
        )?;
        if input.is_active.is_some() {
            ensure(is_admin_or_above(principal), "Only admins can activate or deactivate teams")?;
        }

        let name = match &input.name {
            Some(name) => {
                Validator::new().required(Some(name), "name").finish()?;
                Some(name.trim().to_string())
            }
            None => None,
        };
        if let Some(name) = name.as_deref().filter(|n| !n.eq_ignore_ascii_case(&team.name)) {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM teams WHERE lower(name) = lower($1) AND id <> $2)",
            )
            .bind(name)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
            if taken {
                return Err(ApiError::conflict("DuplicateTeamName", format!("Team {} already exists", name)));
            }
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE teams SET updated_at = now()");
        if let Some(name) = &name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(description) = &input.description {
            qb.push(", description = ").push_bind(description.as_deref());
        }
        if let Some(department) = input.department {
            qb.push(", department = ").push_bind(department);
        }
        if let Some(is_active) = input.is_active {
            qb.push(", is_active = ").push_bind(is_active);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        self.get(id).await
    }

    /// Remove a team together with its manager login. Members, tickets and
    /// projects keep the team alive; resources and managing admins are detached.
    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can delete teams")?;

        let mut tx = self.pool.begin().await?;
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM teams WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(name) = name else {
            return Err(ApiError::not_found("Team not found"));
        };

        let dependents = sqlx::query_as::<_, TeamDependents>(
            "SELECT \
               (SELECT COUNT(*) FROM accounts WHERE team_id = $1 AND role = 'user' AND is_active) AS active_members, \
               (SELECT COUNT(*) FROM accounts WHERE team_id = $1 AND role = 'user') AS members, \
               (SELECT COUNT(*) FROM tickets WHERE team_id = $1 OR assigned_team_id = $1) AS tickets, \
               (SELECT COUNT(*) FROM projects WHERE team_id = $1) AS projects",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if let Some(err) = dependents.blocker(&name) {
            return Err(err);
        }

        sqlx::query("UPDATE resources SET team_id = NULL, updated_at = now() WHERE team_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE accounts SET team_id = NULL, updated_at = now() \
             WHERE team_id = $1 AND role IN ('admin', 'super_admin')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let managers = sqlx::query("DELETE FROM accounts WHERE team_id = $1 AND role = 'team'")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if matches!(&e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503")) {
                    ApiError::conflict(
                        "TeamManagerHasHistory",
                        format!("The manager login of team {} is still referenced by tickets or resources", name),
                    )
                } else {
                    e.into()
                }
            })?;
        sqlx::query("DELETE FROM teams WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Team {} deleted by account {} ({} manager logins removed)",
            id,
            principal.id,
            managers.rows_affected()
        );
        Ok(())
    }

    pub async fn members(&self, principal: &Principal, id: i64) -> Result<Vec<Account>, ApiError> {
        self.get(id).await?;
        ensure(can_view_team_scope(principal, id), "You do not have access to this team")?;

        let members = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE team_id = $1 AND role = 'user' ORDER BY name, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filter_combines_fields_and_search() {
        let query = TeamListQuery {
            department: Some(Department::It),
            search: Some("desk".to_string()),
            ..Default::default()
        };
        assert_eq!(
            list_filter(&query),
            json!({ "$and": [
                { "department": "IT" },
                { "$or": [{ "name": { "$ilike": "%desk%" } }, { "description": { "$ilike": "%desk%" } }] }
            ] })
        );
    }

    #[test]
    fn team_with_only_a_manager_login_can_go() {
        assert!(TeamDependents::default().blocker("Desk").is_none());
    }

    #[test]
    fn active_members_block_deletion_first() {
        let dependents = TeamDependents { active_members: 2, members: 3, tickets: 4, projects: 1 };
        let err = dependents.blocker("Desk").unwrap();
        assert_eq!(err.error_code(), "TeamHasActiveMembers");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn remaining_dependents_are_named() {
        let members = TeamDependents { members: 1, ..Default::default() };
        assert_eq!(members.blocker("Desk").unwrap().error_code(), "TeamHasMembers");
        let tickets = TeamDependents { tickets: 1, projects: 1, ..Default::default() };
        assert_eq!(tickets.blocker("Desk").unwrap().error_code(), "TeamHasTickets");
        let projects = TeamDependents { projects: 1, ..Default::default() };
        assert_eq!(projects.blocker("Desk").unwrap().error_code(), "TeamHasProjects");
    }

    #[test]
    fn update_body_can_clear_department() {
        let body: UpdateTeam = serde_json::from_value(json!({ "department": null })).unwrap();
        assert_eq!(body.department, Some(None));
        assert_eq!(body.description, None);
    }
}
