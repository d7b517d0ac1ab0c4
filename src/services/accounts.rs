use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::auth;
use crate::auth::AuthError;
use crate::config;
use crate::database::models::account::NewAccount;
use crate::database::models::ticket::Department;
use crate::database::models::Account;
use crate::database::Repository;
use crate::error::{ApiError, Validator};
use crate::middleware::{Principal, PrincipalKind};
use crate::policy::access::{ensure, is_admin_or_above, is_super_admin, is_team_manager_of};
use crate::services::teams::insert_team;
use crate::services::{all_of, clean, search_clause};
use crate::types::{double_option, PageQuery, Pagination, Role};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Basic shape check: one `@`, non-empty local part, dotted domain
pub fn validate_email_format(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email cannot be empty".to_string());
    }
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err("Invalid email format".to_string());
    }
    let domain = parts[1];
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err("Invalid email format".to_string());
    }
    if email.chars().any(char::is_whitespace) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(validator: &mut Validator, email: Option<&str>) {
    match email.map(normalize_email) {
        None => {
            validator.required(None, "email");
        }
        Some(email) => {
            if let Err(message) = validate_email_format(&email) {
                validator.check(false, "email", &message);
            }
        }
    }
}

fn check_password(validator: &mut Validator, field: &str, password: Option<&str>) {
    match password {
        None | Some("") => {
            validator.required(None, field);
        }
        Some(password) => {
            validator.check(
                password.chars().count() >= MIN_PASSWORD_LENGTH,
                field,
                "Password must be at least 8 characters",
            );
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Existing team to join (member) or manage (team, admin)
    pub team_id: Option<i64>,
    /// Team to create when registering a team manager
    pub team_name: Option<String>,
    pub team_description: Option<String>,
    pub department: Option<Department>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<Role>,
    pub team_id: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub team_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "double_option")]
    pub team_id: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

impl UpdateUser {
    fn touches_admin_fields(&self) -> bool {
        self.email.is_some() || self.role.is_some() || self.team_id.is_some() || self.is_active.is_some()
    }
}

/// Token plus the account it was issued for
#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub user: Account,
}

/// Accounts a caller may list
pub fn scope_filter(principal: &Principal) -> Value {
    match principal.kind {
        PrincipalKind::SuperAdmin | PrincipalKind::Admin { .. } => json!({}),
        PrincipalKind::Team { team_id } | PrincipalKind::Member { team_id } => json!({ "team_id": team_id }),
    }
}

pub fn list_filter(principal: &Principal, query: &UserListQuery) -> Value {
    let mut fields = serde_json::Map::new();
    if let Some(role) = query.role {
        fields.insert("role".to_string(), json!(role));
    }
    if let Some(team_id) = query.team_id {
        fields.insert("team_id".to_string(), json!(team_id));
    }
    if let Some(is_active) = query.is_active {
        fields.insert("is_active".to_string(), json!(is_active));
    }
    let mut clauses = vec![scope_filter(principal), Value::Object(fields)];
    clauses.extend(search_clause(&["name", "email"], query.search.as_deref()));
    all_of(clauses)
}

/// Roles `principal` may hand out when creating or editing accounts
pub fn can_grant(principal: &Principal, role: Role) -> bool {
    match role {
        Role::SuperAdmin => false,
        Role::Admin => is_super_admin(principal),
        Role::Team | Role::User => is_admin_or_above(principal),
    }
}

async fn email_taken(conn: &mut PgConnection, email: &str, except: Option<i64>) -> Result<bool, ApiError> {
    let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1 AND id <> $2)")
        .bind(email)
        .bind(except.unwrap_or(0))
        .fetch_one(conn)
        .await?;
    Ok(taken)
}

async fn active_team_exists(conn: &mut PgConnection, team_id: i64) -> Result<bool, ApiError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM teams WHERE id = $1 AND is_active)")
        .bind(team_id)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

/// Insert an account, reporting a taken email as `DuplicateEmail`
async fn insert_account(conn: &mut PgConnection, account: NewAccount) -> Result<Account, ApiError> {
    if email_taken(&mut *conn, &account.email, None).await? {
        return Err(ApiError::conflict(
            "DuplicateEmail",
            format!("An account with email {} already exists", account.email),
        ));
    }
    if matches!(account.role, Role::Team | Role::User) && account.team_id.is_none() {
        return Err(ApiError::invalid_field("teamId", "A team is required for this role"));
    }
    if let Some(team_id) = account.team_id {
        if !active_team_exists(&mut *conn, team_id).await? {
            return Err(ApiError::invalid_field("teamId", "Team not found or inactive"));
        }
    }

    let created = sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (name, email, password_hash, role, team_id) VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(account.role)
    .bind(account.team_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(created)
}

pub struct AccountService {
    pool: PgPool,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> Repository<Account> {
        Repository::new("accounts", self.pool.clone())
    }

    pub async fn login(&self, input: LoginInput) -> Result<Session, ApiError> {
        let mut validator = Validator::new();
        validator.required(input.email.as_deref(), "email");
        validator.required(input.password.as_deref(), "password");
        validator.finish()?;

        let email = normalize_email(input.email.as_deref().unwrap_or_default());
        let password = input.password.unwrap_or_default();

        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        let Some(account) = account else {
            tracing::warn!("Login failed for unknown email {}", email);
            return Err(AuthError::InvalidCredentials.into());
        };
        if !auth::verify_password(&password, &account.password_hash).await? {
            tracing::warn!("Login failed for account {}", account.id);
            return Err(AuthError::InvalidCredentials.into());
        }
        if !account.is_active {
            return Err(ApiError::AccountDeactivated);
        }

        let account = sqlx::query_as::<_, Account>(
            "UPDATE accounts SET last_login_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(account.id)
        .fetch_one(&self.pool)
        .await?;
        let token = auth::issue_token(account.id, account.role)?;

        tracing::info!("Account {} logged in as {}", account.id, account.role);
        Ok(Session { token, user: account })
    }

    /// Self-service registration for one role
    pub async fn register(&self, role: Role, input: RegisterInput) -> Result<Session, ApiError> {
        let mut validator = Validator::new();
        validator.required(input.name.as_deref(), "name");
        check_email(&mut validator, input.email.as_deref());
        check_password(&mut validator, "password", input.password.as_deref());
        if role == Role::User {
            validator.check(input.team_id.is_some(), "teamId", "A team is required");
        }
        if role == Role::Team {
            validator.check(
                input.team_id.is_some() || clean(input.team_name.as_deref()).is_some(),
                "teamId",
                "Pick an existing team or give a new team name",
            );
        }
        validator.finish()?;

        if role != Role::SuperAdmin && !config::config().security.allow_public_registration {
            return Err(ApiError::forbidden("Public registration is disabled"));
        }

        let password_hash = auth::hash_password(input.password.as_deref().unwrap_or_default()).await?;
        let mut tx = self.pool.begin().await?;

        if role == Role::SuperAdmin {
            // Serialises concurrent bootstrap attempts
            sqlx::query("LOCK TABLE accounts IN SHARE ROW EXCLUSIVE MODE")
                .execute(&mut *tx)
                .await?;
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE role = 'super_admin')")
                .fetch_one(&mut *tx)
                .await?;
            if exists {
                return Err(ApiError::forbidden("A super admin already exists"));
            }
        }

        let team_id = match (role, input.team_id) {
            (Role::SuperAdmin, _) => None,
            (Role::Team, None) => {
                let name = clean(input.team_name.as_deref()).unwrap_or_default();
                Some(insert_team(&mut tx, &name, clean(input.team_description.as_deref()), input.department).await?)
            }
            (_, team_id) => team_id,
        };

        let account = insert_account(
            &mut tx,
            NewAccount {
                name: clean(input.name.as_deref()).unwrap_or_default(),
                email: normalize_email(input.email.as_deref().unwrap_or_default()),
                password_hash,
                role,
                team_id,
            },
        )
        .await?;
        tx.commit().await?;

        let token = auth::issue_token(account.id, account.role)?;
        tracing::info!("Registered account {} as {}", account.id, account.role);
        Ok(Session { token, user: account })
    }

    /// Bootstrap path for operators; skips the registration switches
    pub async fn create_super_admin(&self, name: &str, email: &str, password: &str) -> Result<Account, ApiError> {
        let mut validator = Validator::new();
        validator.required(Some(name), "name");
        check_email(&mut validator, Some(email));
        check_password(&mut validator, "password", Some(password));
        validator.finish()?;

        let password_hash = auth::hash_password(password).await?;
        let mut conn = self.pool.acquire().await?;
        let account = insert_account(
            &mut conn,
            NewAccount {
                name: name.trim().to_string(),
                email: normalize_email(email),
                password_hash,
                role: Role::SuperAdmin,
                team_id: None,
            },
        )
        .await?;
        tracing::info!("Created super admin account {}", account.id);
        Ok(account)
    }

    pub async fn me(&self, principal: &Principal) -> Result<Account, ApiError> {
        Ok(self.repo().select_404(principal.id, "Account not found").await?)
    }

    pub async fn change_password(&self, principal: &Principal, input: ChangePassword) -> Result<(), ApiError> {
        let mut validator = Validator::new();
        validator.required(input.current_password.as_deref(), "currentPassword");
        check_password(&mut validator, "newPassword", input.new_password.as_deref());
        validator.finish()?;

        let account = self.me(principal).await?;
        let current = input.current_password.unwrap_or_default();
        if !auth::verify_password(&current, &account.password_hash).await? {
            return Err(ApiError::invalid_field("currentPassword", "Current password is incorrect"));
        }

        let password_hash = auth::hash_password(&input.new_password.unwrap_or_default()).await?;
        sqlx::query("UPDATE accounts SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(principal.id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        tracing::info!("Account {} changed its password", principal.id);
        Ok(())
    }

    pub async fn list(&self, principal: &Principal, query: &UserListQuery) -> Result<(Vec<Account>, Pagination), ApiError> {
        let (page, limit, offset) = PageQuery { page: query.page, limit: query.limit }.resolve();
        let (accounts, total) = self
            .repo()
            .select_page(list_filter(principal, query), "name asc, id asc", limit, offset)
            .await?;
        Ok((accounts, Pagination::new(page, limit, total)))
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<Account, ApiError> {
        let account = self.repo().select_404(id, "User not found").await?;
        let visible = account.id == principal.id
            || is_admin_or_above(principal)
            || account.team_id.is_some_and(|team| is_team_manager_of(principal, team));
        ensure(visible, "You do not have access to this user")?;
        Ok(account)
    }

    pub async fn create(&self, principal: &Principal, input: CreateUser) -> Result<Account, ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can create users")?;
        let role = input.role.unwrap_or(Role::User);
        ensure(can_grant(principal, role), &format!("You cannot create {} accounts", role))?;

        let mut validator = Validator::new();
        validator.required(input.name.as_deref(), "name");
        check_email(&mut validator, input.email.as_deref());
        check_password(&mut validator, "password", input.password.as_deref());
        validator.finish()?;

        let password_hash = auth::hash_password(input.password.as_deref().unwrap_or_default()).await?;
        let mut conn = self.pool.acquire().await?;
        let account = insert_account(
            &mut conn,
            NewAccount {
                name: clean(input.name.as_deref()).unwrap_or_default(),
                email: normalize_email(input.email.as_deref().unwrap_or_default()),
                password_hash,
                role,
                team_id: input.team_id,
            },
        )
        .await?;

        tracing::info!("Account {} created {} account {}", principal.id, role, account.id);
        Ok(account)
    }

    pub async fn update(&self, principal: &Principal, id: i64, input: UpdateUser) -> Result<Account, ApiError> {
        let account = self.repo().select_404(id, "User not found").await?;
        let is_self = account.id == principal.id;
        ensure(is_self || is_admin_or_above(principal), "You do not have permission to modify this user")?;
        if input.touches_admin_fields() {
            ensure(is_admin_or_above(principal), "Only admins can change email, role, team or status")?;
            ensure(
                account.role != Role::SuperAdmin || is_super_admin(principal),
                "Only a super admin can modify a super admin",
            )?;
        }
        if let Some(role) = input.role.filter(|r| *r != account.role) {
            ensure(can_grant(principal, role), &format!("You cannot grant the {} role", role))?;
        }

        let mut validator = Validator::new();
        if let Some(name) = &input.name {
            validator.required(Some(name), "name");
        }
        if let Some(email) = &input.email {
            check_email(&mut validator, Some(email));
        }
        let role = input.role.unwrap_or(account.role);
        let team_id = input.team_id.unwrap_or(account.team_id);
        validator.check(
            !(matches!(role, Role::Team | Role::User) && team_id.is_none()),
            "teamId",
            "A team is required for this role",
        );
        validator.finish()?;

        let mut conn = self.pool.acquire().await?;
        let email = input.email.as_deref().map(normalize_email);
        if let Some(email) = &email {
            if email_taken(&mut conn, email, Some(id)).await? {
                return Err(ApiError::conflict(
                    "DuplicateEmail",
                    format!("An account with email {} already exists", email),
                ));
            }
        }
        if let Some(Some(team_id)) = input.team_id {
            if !active_team_exists(&mut conn, team_id).await? {
                return Err(ApiError::invalid_field("teamId", "Team not found or inactive"));
            }
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE accounts SET updated_at = now()");
        if let Some(name) = &input.name {
            qb.push(", name = ").push_bind(name.trim());
        }
        if let Some(email) = &email {
            qb.push(", email = ").push_bind(email);
        }
        if let Some(role) = input.role {
            qb.push(", role = ").push_bind(role);
        }
        if let Some(team_id) = input.team_id {
            qb.push(", team_id = ").push_bind(team_id);
        }
        if let Some(is_active) = input.is_active {
            qb.push(", is_active = ").push_bind(is_active);
        }
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let updated = qb.build_query_as::<Account>().fetch_one(&mut *conn).await?;
        tracing::info!("Account {} updated by account {}", id, principal.id);
        Ok(updated)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        ensure(is_admin_or_above(principal), "Only admins can delete users")?;
        if id == principal.id {
            return Err(ApiError::forbidden("You cannot delete your own account"));
        }
        let account = self.repo().select_404(id, "User not found").await?;
        ensure(
            account.role != Role::SuperAdmin || is_super_admin(principal),
            "Only a super admin can delete a super admin",
        )?;

        let open_tickets: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets \
             WHERE (created_by = $1 OR assigned_to = $1) AND status NOT IN ('COMPLETED', 'REJECTED')",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if open_tickets > 0 {
            return Err(ApiError::conflict(
                "UserHasActiveTickets",
                format!("User still has {} open tickets", open_tickets),
            ));
        }

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Account {} deleted by account {}", id, principal.id);
        Ok(())
    }
}
