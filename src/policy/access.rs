//! Role-gate predicates over the resolved caller

use crate::database::models::Ticket;
use crate::error::ApiError;
use crate::middleware::{Principal, PrincipalKind};

pub fn is_admin_or_above(principal: &Principal) -> bool {
    matches!(principal.kind, PrincipalKind::Admin { .. } | PrincipalKind::SuperAdmin)
}

pub fn is_manager_or_above(principal: &Principal) -> bool {
    !matches!(principal.kind, PrincipalKind::Member { .. })
}

pub fn is_super_admin(principal: &Principal) -> bool {
    matches!(principal.kind, PrincipalKind::SuperAdmin)
}

/// The caller is the owner, or an admin
pub fn owns_or_manages(principal: &Principal, owner_id: Option<i64>) -> bool {
    owner_id == Some(principal.id) || is_admin_or_above(principal)
}

pub fn can_manage_ticket(principal: &Principal, ticket: &Ticket) -> bool {
    if is_admin_or_above(principal)
        || ticket.created_by == principal.id
        || ticket.assigned_to == Some(principal.id)
    {
        return true;
    }
    match principal.team_id() {
        Some(team) => team == ticket.team_id || ticket.assigned_team_id == Some(team),
        None => false,
    }
}

/// Admins see every team; everyone else only the team they belong to or manage
pub fn can_view_team_scope(principal: &Principal, team_id: i64) -> bool {
    is_admin_or_above(principal) || principal.team_id() == Some(team_id)
}

/// The caller manages the given team as its team-manager account
pub fn is_team_manager_of(principal: &Principal, team_id: i64) -> bool {
    principal.kind == PrincipalKind::Team { team_id }
}

/// Turn a denied predicate into `Forbidden`
pub fn ensure(allowed: bool, message: &str) -> Result<(), ApiError> {
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(message))
    }
}
