//! Ticket state machine.
//!
//! ```text
//! PENDING_APPROVAL --approve--> APPROVED --start--> IN_PROGRESS
//!        |                          |                    |
//!        +--reject--> REJECTED      +------complete------+--> COMPLETED
//! ```
//!
//! Approval decisions belong to admins; progress changes belong to anyone
//! who can manage the ticket. REJECTED and COMPLETED are terminal.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::database::models::Ticket;
use crate::middleware::Principal;
use crate::policy::access::{can_manage_ticket, is_admin_or_above};

crate::text_enum! {
    pub enum TicketStatus {
        PendingApproval => "PENDING_APPROVAL",
        Approved => "APPROVED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Rejected => "REJECTED",
    }
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Rejected)
    }
}

crate::text_enum! {
    pub enum TicketPriority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
        Urgent => "URGENT",
    }
}

/// Domain events a ticket change can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEvent {
    Created,
    Approved,
    Rejected,
    Assigned,
    InProgress,
    Completed,
    Commented,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Ticket has already been processed")]
    AlreadyProcessed,

    #[error("Cannot move ticket from {from} to {to}")]
    InvalidTransition { from: TicketStatus, to: TicketStatus },

    #[error("A rejection reason is required")]
    RejectionReasonRequired,

    #[error("Ticket cannot be deleted while {0}")]
    DeletionBlocked(TicketStatus),

    #[error("{0}")]
    NotPermitted(String),
}

/// Requested changes to the lifecycle-controlled fields of a ticket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketChange {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub expected_closure: Option<NaiveDate>,
    pub rejection_reason: Option<String>,
}

impl TicketChange {
    fn touches_approval(&self) -> bool {
        matches!(self.status, Some(TicketStatus::Approved | TicketStatus::Rejected))
            || self.priority.is_some()
            || self.expected_closure.is_some()
    }
}

/// What the store must write, and which event to announce afterwards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePlan {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub expected_closure: Option<NaiveDate>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub actual_closure: Option<DateTime<Utc>>,
    pub event: Option<TicketEvent>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        *self == ChangePlan::default()
    }
}

/// Decide whether `principal` may apply `change` to `ticket`, and how.
pub fn plan_change(
    principal: &Principal,
    ticket: &Ticket,
    change: &TicketChange,
    now: DateTime<Utc>,
) -> Result<ChangePlan, LifecycleError> {
    let pending = ticket.status == TicketStatus::PendingApproval;

    if change.touches_approval() && !pending {
        return Err(LifecycleError::AlreadyProcessed);
    }

    if !can_manage_ticket(principal, ticket) {
        return Err(LifecycleError::NotPermitted(
            "You do not have permission to modify this ticket".to_string(),
        ));
    }

    if pending {
        plan_pending(principal, ticket, change, now)
    } else {
        plan_progress(ticket, change, now)
    }
}

fn plan_pending(
    principal: &Principal,
    ticket: &Ticket,
    change: &TicketChange,
    now: DateTime<Utc>,
) -> Result<ChangePlan, LifecycleError> {
    if change.status.is_none() && change.priority.is_none() && change.expected_closure.is_none() {
        return Ok(ChangePlan::default());
    }
    if !is_admin_or_above(principal) {
        return Err(LifecycleError::NotPermitted(
            "Only admins can approve, reject or re-prioritise a pending ticket".to_string(),
        ));
    }

    match change.status {
        Some(TicketStatus::Approved) => Ok(ChangePlan {
            status: Some(TicketStatus::Approved),
            priority: change.priority,
            expected_closure: change.expected_closure,
            approved_by: Some(principal.id),
            approved_at: Some(now),
            event: Some(TicketEvent::Approved),
            ..Default::default()
        }),
        Some(TicketStatus::Rejected) => {
            let reason = change
                .rejection_reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(LifecycleError::RejectionReasonRequired)?;
            Ok(ChangePlan {
                status: Some(TicketStatus::Rejected),
                rejection_reason: Some(reason.to_string()),
                event: Some(TicketEvent::Rejected),
                ..Default::default()
            })
        }
        Some(other) => Err(LifecycleError::InvalidTransition { from: ticket.status, to: other }),
        None => Ok(ChangePlan {
            priority: change.priority,
            expected_closure: change.expected_closure,
            ..Default::default()
        }),
    }
}

fn plan_progress(ticket: &Ticket, change: &TicketChange, now: DateTime<Utc>) -> Result<ChangePlan, LifecycleError> {
    let Some(target) = change.status else {
        return Ok(ChangePlan::default());
    };

    match (ticket.status, target) {
        (TicketStatus::InProgress, TicketStatus::InProgress) => Ok(ChangePlan::default()),
        (TicketStatus::Approved, TicketStatus::InProgress) => Ok(ChangePlan {
            status: Some(TicketStatus::InProgress),
            event: Some(TicketEvent::InProgress),
            ..Default::default()
        }),
        (TicketStatus::Approved | TicketStatus::InProgress, TicketStatus::Completed) => Ok(ChangePlan {
            status: Some(TicketStatus::Completed),
            actual_closure: Some(now),
            event: Some(TicketEvent::Completed),
            ..Default::default()
        }),
        (from, to) => Err(LifecycleError::InvalidTransition { from, to }),
    }
}

/// Creator or admin may delete, and only before work has started
pub fn check_deletable(principal: &Principal, ticket: &Ticket) -> Result<(), LifecycleError> {
    if ticket.created_by != principal.id && !is_admin_or_above(principal) {
        return Err(LifecycleError::NotPermitted(
            "Only the creator or an admin can delete this ticket".to_string(),
        ));
    }
    match ticket.status {
        TicketStatus::InProgress | TicketStatus::Completed => Err(LifecycleError::DeletionBlocked(ticket.status)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::access::fixtures::*;

    fn approve() -> TicketChange {
        TicketChange {
            status: Some(TicketStatus::Approved),
            ..Default::default()
        }
    }

    fn to(status: TicketStatus) -> TicketChange {
        TicketChange {
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn admin_approves_pending_ticket() {
        let ticket = ticket(10, 1, TicketStatus::PendingApproval);
        let now = Utc::now();
        let closure = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let change = TicketChange {
            priority: Some(TicketPriority::High),
            expected_closure: Some(closure),
            ..approve()
        };

        let plan = plan_change(&admin(2), &ticket, &change, now).unwrap();
        assert_eq!(plan.status, Some(TicketStatus::Approved));
        assert_eq!(plan.approved_by, Some(2));
        assert_eq!(plan.approved_at, Some(now));
        assert_eq!(plan.priority, Some(TicketPriority::High));
        assert_eq!(plan.expected_closure, Some(closure));
        assert_eq!(plan.event, Some(TicketEvent::Approved));
    }

    #[test]
    fn approving_twice_is_already_processed() {
        let ticket = ticket(10, 1, TicketStatus::Approved);
        assert_eq!(
            plan_change(&super_admin(1), &ticket, &approve(), Utc::now()),
            Err(LifecycleError::AlreadyProcessed)
        );
    }

    #[test]
    fn already_processed_wins_over_permissions() {
        let ticket = ticket(10, 1, TicketStatus::Rejected);
        assert_eq!(
            plan_change(&member(99, 7), &ticket, &approve(), Utc::now()),
            Err(LifecycleError::AlreadyProcessed)
        );
        let change = TicketChange {
            priority: Some(TicketPriority::Low),
            ..Default::default()
        };
        assert_eq!(
            plan_change(&member(99, 7), &ticket, &change, Utc::now()),
            Err(LifecycleError::AlreadyProcessed)
        );
    }

    #[test]
    fn member_cannot_approve_own_ticket() {
        let ticket = ticket(10, 1, TicketStatus::PendingApproval);
        assert!(matches!(
            plan_change(&member(10, 1), &ticket, &approve(), Utc::now()),
            Err(LifecycleError::NotPermitted(_))
        ));
    }

    #[test]
    fn outsider_cannot_touch_ticket() {
        let ticket = ticket(10, 1, TicketStatus::Approved);
        assert!(matches!(
            plan_change(&member(11, 2), &ticket, &to(TicketStatus::InProgress), Utc::now()),
            Err(LifecycleError::NotPermitted(_))
        ));
    }

    #[test]
    fn reject_requires_reason_and_ignores_priority() {
        let ticket = ticket(10, 1, TicketStatus::PendingApproval);
        let mut change = TicketChange {
            status: Some(TicketStatus::Rejected),
            priority: Some(TicketPriority::Urgent),
            rejection_reason: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            plan_change(&admin(2), &ticket, &change, Utc::now()),
            Err(LifecycleError::RejectionReasonRequired)
        );

        change.rejection_reason = Some(" duplicate of #12 ".to_string());
        let plan = plan_change(&admin(2), &ticket, &change, Utc::now()).unwrap();
        assert_eq!(plan.status, Some(TicketStatus::Rejected));
        assert_eq!(plan.rejection_reason.as_deref(), Some("duplicate of #12"));
        assert_eq!(plan.priority, None);
        assert_eq!(plan.approved_by, None);
        assert_eq!(plan.event, Some(TicketEvent::Rejected));
    }

    #[test]
    fn pending_ticket_cannot_skip_approval() {
        let ticket = ticket(10, 1, TicketStatus::PendingApproval);
        assert_eq!(
            plan_change(&admin(2), &ticket, &to(TicketStatus::Completed), Utc::now()),
            Err(LifecycleError::InvalidTransition {
                from: TicketStatus::PendingApproval,
                to: TicketStatus::Completed,
            })
        );
    }

    #[test]
    fn admin_may_reprioritise_pending_ticket() {
        let ticket = ticket(10, 1, TicketStatus::PendingApproval);
        let change = TicketChange {
            priority: Some(TicketPriority::Critical),
            ..Default::default()
        };
        let plan = plan_change(&admin(2), &ticket, &change, Utc::now()).unwrap();
        assert_eq!(plan.status, None);
        assert_eq!(plan.priority, Some(TicketPriority::Critical));
        assert_eq!(plan.event, None);

        assert!(matches!(
            plan_change(&member(10, 1), &ticket, &change, Utc::now()),
            Err(LifecycleError::NotPermitted(_))
        ));
    }

    #[test]
    fn progress_path_through_completion() {
        let now = Utc::now();
        let approved = ticket(10, 1, TicketStatus::Approved);
        let plan = plan_change(&member(11, 1), &approved, &to(TicketStatus::InProgress), now).unwrap();
        assert_eq!(plan.status, Some(TicketStatus::InProgress));
        assert_eq!(plan.event, Some(TicketEvent::InProgress));

        let in_progress = ticket(10, 1, TicketStatus::InProgress);
        let plan = plan_change(&member(10, 1), &in_progress, &to(TicketStatus::Completed), now).unwrap();
        assert_eq!(plan.status, Some(TicketStatus::Completed));
        assert_eq!(plan.actual_closure, Some(now));
        assert_eq!(plan.event, Some(TicketEvent::Completed));

        let plan = plan_change(&member(10, 1), &approved, &to(TicketStatus::Completed), now).unwrap();
        assert_eq!(plan.status, Some(TicketStatus::Completed));
    }

    #[test]
    fn in_progress_again_is_a_no_op() {
        let ticket = ticket(10, 1, TicketStatus::InProgress);
        let plan = plan_change(&member(10, 1), &ticket, &to(TicketStatus::InProgress), Utc::now()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn terminal_states_stay_terminal() {
        let completed = ticket(10, 1, TicketStatus::Completed);
        assert_eq!(
            plan_change(&admin(1), &completed, &to(TicketStatus::InProgress), Utc::now()),
            Err(LifecycleError::InvalidTransition {
                from: TicketStatus::Completed,
                to: TicketStatus::InProgress,
            })
        );
        assert!(plan_change(&admin(1), &completed, &to(TicketStatus::Completed), Utc::now()).is_err());
        assert!(plan_change(&admin(1), &completed, &to(TicketStatus::PendingApproval), Utc::now()).is_err());
        assert!(TicketStatus::Rejected.is_terminal());
        assert!(!TicketStatus::Approved.is_terminal());
    }

    #[test]
    fn deletion_rules() {
        let pending = ticket(10, 1, TicketStatus::PendingApproval);
        assert!(check_deletable(&member(10, 1), &pending).is_ok());
        assert!(matches!(
            check_deletable(&member(11, 1), &pending),
            Err(LifecycleError::NotPermitted(_))
        ));
        assert!(check_deletable(&admin(2), &pending).is_ok());

        let started = ticket(10, 1, TicketStatus::InProgress);
        assert_eq!(
            check_deletable(&member(10, 1), &started),
            Err(LifecycleError::DeletionBlocked(TicketStatus::InProgress))
        );
        let rejected = ticket(10, 1, TicketStatus::Rejected);
        assert!(check_deletable(&member(10, 1), &rejected).is_ok());
    }
}
