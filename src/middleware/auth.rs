use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::{self, AuthError};
use crate::database::models::Account;
use crate::error::ApiError;
use crate::types::Role;
use crate::AppState;

/// Role-specific facts about the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum PrincipalKind {
    SuperAdmin,
    Admin {
        #[serde(rename = "managedTeam")]
        managed_team: Option<i64>,
    },
    Team {
        #[serde(rename = "teamId")]
        team_id: i64,
    },
    #[serde(rename = "user")]
    Member {
        #[serde(rename = "teamId")]
        team_id: i64,
    },
}

/// Authenticated caller, resolved once per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(flatten)]
    pub kind: PrincipalKind,
}

impl Principal {
    pub fn role(&self) -> Role {
        match self.kind {
            PrincipalKind::SuperAdmin => Role::SuperAdmin,
            PrincipalKind::Admin { .. } => Role::Admin,
            PrincipalKind::Team { .. } => Role::Team,
            PrincipalKind::Member { .. } => Role::User,
        }
    }

    /// The team the caller belongs to, or manages when an admin
    pub fn team_id(&self) -> Option<i64> {
        match self.kind {
            PrincipalKind::SuperAdmin => None,
            PrincipalKind::Admin { managed_team } => managed_team,
            PrincipalKind::Team { team_id } | PrincipalKind::Member { team_id } => Some(team_id),
        }
    }

    /// Build the principal for an account, checking it against the role the
    /// token was issued for.
    pub fn from_account(account: &Account, token_role: Role) -> Result<Self, ApiError> {
        if account.role != token_role {
            return Err(ApiError::unauthenticated("Token no longer matches the account role"));
        }
        if !account.is_active {
            return Err(ApiError::AccountDeactivated);
        }

        let kind = match (account.role, account.team_id) {
            (Role::SuperAdmin, _) => PrincipalKind::SuperAdmin,
            (Role::Admin, managed_team) => PrincipalKind::Admin { managed_team },
            (Role::Team, Some(team_id)) => PrincipalKind::Team { team_id },
            (Role::User, Some(team_id)) => PrincipalKind::Member { team_id },
            (Role::Team | Role::User, None) => {
                tracing::warn!("Account {} has role {} but no team", account.id, account.role);
                return Err(ApiError::unauthenticated("Account is not linked to a team"));
            }
        };

        Ok(Self {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            kind,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("Authentication required"))
    }
}

/// Resolves the bearer token into a `Principal` and stores it on the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let principal = resolve_principal(&state.pool, &token).await?;

    tracing::debug!("Authenticated account {} as {}", principal.id, principal.role());
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Verify the token and load the account it names. Read-only.
pub async fn resolve_principal(pool: &PgPool, token: &str) -> Result<Principal, ApiError> {
    let claims = auth::verify_token(token)?;

    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("Account no longer exists"))?;

    Principal::from_account(&account, claims.role)
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let auth_header = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::unauthenticated("Invalid Authorization header format"))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err(ApiError::unauthenticated("Empty bearer token")),
        None => Err(ApiError::unauthenticated(
            "Authorization header must use Bearer token format",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn account(role: Role, team_id: Option<i64>, is_active: bool) -> Account {
        Account {
            id: 9,
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            password_hash: String::new(),
            role,
            team_id,
            is_active,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn builds_principal_per_role() {
        let p = Principal::from_account(&account(Role::User, Some(3), true), Role::User).unwrap();
        assert_eq!(p.kind, PrincipalKind::Member { team_id: 3 });
        assert_eq!(p.team_id(), Some(3));

        let p = Principal::from_account(&account(Role::Admin, None, true), Role::Admin).unwrap();
        assert_eq!(p.kind, PrincipalKind::Admin { managed_team: None });

        let p = Principal::from_account(&account(Role::SuperAdmin, None, true), Role::SuperAdmin).unwrap();
        assert_eq!(p.role(), Role::SuperAdmin);
        assert_eq!(p.team_id(), None);
    }

    #[test]
    fn stale_role_is_unauthenticated() {
        let err = Principal::from_account(&account(Role::User, Some(3), true), Role::Admin).unwrap_err();
        assert_eq!(err.error_code(), "Unauthenticated");
    }

    #[test]
    fn inactive_account_is_deactivated() {
        let err = Principal::from_account(&account(Role::Team, Some(3), false), Role::Team).unwrap_err();
        assert_eq!(err.error_code(), "AccountDeactivated");
    }

    #[test]
    fn member_without_team_is_rejected() {
        let err = Principal::from_account(&account(Role::User, None, true), Role::User).unwrap_err();
        assert_eq!(err.error_code(), "Unauthenticated");
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn principal_serializes_with_role_tag() {
        let p = Principal::from_account(&account(Role::Team, Some(4), true), Role::Team).unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["role"], "team");
        assert_eq!(json["teamId"], 4);
    }
}
