use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::database::models::{NewNotification, Notification, NotificationKind, Ticket};
use crate::database::{DatabaseError, Repository};
use crate::error::ApiError;
use crate::middleware::Principal;
use crate::policy::lifecycle::TicketEvent;
use crate::types::{PageQuery, Pagination, Role};

/// Store seam for fan-out: who is in a group, and where rows go
#[async_trait]
pub trait NotificationDirectory: Send + Sync {
    /// Active team-manager accounts of a team
    async fn team_accounts(&self, team_id: i64) -> Result<Vec<i64>, DatabaseError>;

    /// Active accounts holding a role
    async fn accounts_with_role(&self, role: Role) -> Result<Vec<i64>, DatabaseError>;

    async fn insert(&self, notification: NewNotification) -> Result<(), DatabaseError>;
}

/// Which groups should hear about an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSelection {
    pub creator: Option<i64>,
    pub assignee: Option<i64>,
    pub team: Option<i64>,
    pub assigned_team: Option<i64>,
    pub admins: bool,
    pub super_admins: bool,
}

impl RecipientSelection {
    /// Recipients for a ticket lifecycle event
    pub fn for_ticket_event(event: TicketEvent, ticket: &Ticket) -> Self {
        let creator = Some(ticket.created_by);
        let assignee = ticket.assigned_to;
        let team = Some(ticket.team_id);
        let assigned_team = ticket.assigned_team_id;

        match event {
            TicketEvent::Created => Self { team, admins: true, ..Default::default() },
            TicketEvent::Approved => Self { creator, assignee, team, assigned_team, ..Default::default() },
            TicketEvent::Rejected => Self { creator, team, ..Default::default() },
            TicketEvent::Assigned => Self { assignee, assigned_team, ..Default::default() },
            TicketEvent::InProgress => Self { creator, ..Default::default() },
            TicketEvent::Completed => Self { creator, team, admins: true, ..Default::default() },
            TicketEvent::Commented => Self { creator, assignee, ..Default::default() },
        }
    }
}

impl From<TicketEvent> for NotificationKind {
    fn from(event: TicketEvent) -> Self {
        match event {
            TicketEvent::Created => NotificationKind::TicketCreated,
            TicketEvent::Approved => NotificationKind::TicketApproved,
            TicketEvent::Rejected => NotificationKind::TicketRejected,
            TicketEvent::Assigned => NotificationKind::TicketAssigned,
            TicketEvent::InProgress => NotificationKind::TicketInProgress,
            TicketEvent::Completed => NotificationKind::TicketCompleted,
            TicketEvent::Commented => NotificationKind::TicketCommented,
        }
    }
}

/// Content shared by every row of one fan-out
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationKind,
    pub ticket_id: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub metadata: Value,
}

impl Notice {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            ticket_id: None,
            title: None,
            message: None,
            metadata: json!({}),
        }
    }

    pub fn for_ticket(event: TicketEvent, ticket: &Ticket) -> Self {
        let kind = NotificationKind::from(event);
        let (_, default_message) = kind.default_text();
        Self {
            kind,
            ticket_id: Some(ticket.id),
            title: None,
            message: Some(format!("{}: {}", default_message, ticket.title)),
            metadata: json!({ "ticketId": ticket.id, "status": ticket.status }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Resolve `selection` into unique recipients (first-seen order) and insert
/// one notification per recipient. Failures are logged and counted only.
pub async fn fan_out(
    directory: &dyn NotificationDirectory,
    notice: &Notice,
    selection: &RecipientSelection,
) -> Delivery {
    let recipients = resolve_recipients(directory, selection).await;
    let (default_title, default_message) = notice.kind.default_text();

    let mut delivery = Delivery::default();
    for recipient_id in recipients {
        let notification = NewNotification {
            recipient_id,
            ticket_id: notice.ticket_id,
            kind: notice.kind,
            title: notice.title.clone().unwrap_or_else(|| default_title.to_string()),
            message: notice.message.clone().unwrap_or_else(|| default_message.to_string()),
            metadata: notice.metadata.clone(),
        };
        match directory.insert(notification).await {
            Ok(()) => delivery.delivered += 1,
            Err(e) => {
                tracing::warn!("Failed to notify account {} of {}: {}", recipient_id, notice.kind, e);
                delivery.failed += 1;
            }
        }
    }

    tracing::debug!(
        "Fan-out {} delivered={} failed={}",
        notice.kind,
        delivery.delivered,
        delivery.failed
    );
    delivery
}

async fn resolve_recipients(directory: &dyn NotificationDirectory, selection: &RecipientSelection) -> Vec<i64> {
    let mut recipients: Vec<i64> = Vec::new();
    let mut push_all = |ids: Vec<i64>| {
        for id in ids {
            if !recipients.contains(&id) {
                recipients.push(id);
            }
        }
    };

    push_all(selection.creator.into_iter().collect());
    push_all(selection.assignee.into_iter().collect());

    for team_id in [selection.team, selection.assigned_team].into_iter().flatten() {
        match directory.team_accounts(team_id).await {
            Ok(ids) => push_all(ids),
            Err(e) => tracing::warn!("Could not resolve team {} recipients: {}", team_id, e),
        }
    }

    let roles = [(selection.admins, Role::Admin), (selection.super_admins, Role::SuperAdmin)];
    for (wanted, role) in roles {
        if !wanted {
            continue;
        }
        match directory.accounts_with_role(role).await {
            Ok(ids) => push_all(ids),
            Err(e) => tracing::warn!("Could not resolve {} recipients: {}", role, e),
        }
    }

    recipients
}

/// Postgres-backed directory
pub struct PgNotificationDirectory {
    pool: PgPool,
}

impl PgNotificationDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationDirectory for PgNotificationDirectory {
    async fn team_accounts(&self, team_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM accounts WHERE team_id = $1 AND role = 'team' AND is_active ORDER BY id",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<i64>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM accounts WHERE role = $1 AND is_active ORDER BY id")
            .bind(role)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn insert(&self, n: NewNotification) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO notifications (recipient_id, ticket_id, kind, title, message, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(n.recipient_id)
        .bind(n.ticket_id)
        .bind(n.kind)
        .bind(n.title)
        .bind(n.message)
        .bind(sqlx::types::Json(n.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Announce a ticket lifecycle event to its interested parties
pub async fn notify_ticket_event(pool: &PgPool, event: TicketEvent, ticket: &Ticket) -> Delivery {
    let directory = PgNotificationDirectory::new(pool.clone());
    let selection = RecipientSelection::for_ticket_event(event, ticket);
    fan_out(&directory, &Notice::for_ticket(event, ticket), &selection).await
}

/// A caller's own inbox
pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        principal: &Principal,
        unread_only: bool,
        page: &PageQuery,
    ) -> Result<(Vec<Notification>, Pagination, i64), ApiError> {
        let (page, limit, offset) = page.resolve();
        let mut where_clause = json!({ "recipient_id": principal.id });
        if unread_only {
            where_clause["is_read"] = json!(false);
        }

        let repo = Repository::<Notification>::new("notifications", self.pool.clone());
        let (rows, total) = repo
            .select_page(where_clause, "created_at desc, id desc", limit, offset)
            .await?;
        let unread: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(principal.id)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, Pagination::new(page, limit, total), unread))
    }

    async fn owned(&self, principal: &Principal, id: i64) -> Result<Notification, ApiError> {
        let repo = Repository::<Notification>::new("notifications", self.pool.clone());
        let notification = repo.select_404(id, "Notification not found").await?;
        if notification.recipient_id != principal.id {
            return Err(ApiError::forbidden("This notification belongs to another account"));
        }
        Ok(notification)
    }

    pub async fn mark_read(&self, principal: &Principal, id: i64) -> Result<Notification, ApiError> {
        self.owned(principal, id).await?;
        let notification = sqlx::query_as::<_, Notification>(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(notification)
    }

    pub async fn mark_all_read(&self, principal: &Principal) -> Result<u64, ApiError> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE recipient_id = $1 AND NOT is_read")
            .bind(principal.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ApiError> {
        self.owned(principal, id).await?;
        sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::access::fixtures;
    use crate::policy::lifecycle::TicketStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryDirectory {
        teams: HashMap<i64, Vec<i64>>,
        roles: HashMap<Role, Vec<i64>>,
        failing_recipient: Option<i64>,
        inserted: Mutex<Vec<NewNotification>>,
    }

    impl MemoryDirectory {
        fn recipients(&self) -> Vec<i64> {
            self.inserted.lock().unwrap().iter().map(|n| n.recipient_id).collect()
        }
    }

    #[async_trait]
    impl NotificationDirectory for MemoryDirectory {
        async fn team_accounts(&self, team_id: i64) -> Result<Vec<i64>, DatabaseError> {
            Ok(self.teams.get(&team_id).cloned().unwrap_or_default())
        }

        async fn accounts_with_role(&self, role: Role) -> Result<Vec<i64>, DatabaseError> {
            Ok(self.roles.get(&role).cloned().unwrap_or_default())
        }

        async fn insert(&self, notification: NewNotification) -> Result<(), DatabaseError> {
            if Some(notification.recipient_id) == self.failing_recipient {
                return Err(DatabaseError::QueryError("insert failed".to_string()));
            }
            self.inserted.lock().unwrap().push(notification);
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_recipients_are_notified_once() {
        let directory = MemoryDirectory {
            teams: HashMap::from([(1, vec![20, 5])]),
            roles: HashMap::from([(Role::Admin, vec![30, 20])]),
            ..Default::default()
        };
        let selection = RecipientSelection {
            creator: Some(5),
            assignee: Some(5),
            team: Some(1),
            admins: true,
            ..Default::default()
        };

        let delivery = fan_out(&directory, &Notice::new(NotificationKind::System), &selection).await;
        assert_eq!(delivery, Delivery { delivered: 3, failed: 0 });
        assert_eq!(directory.recipients(), vec![5, 20, 30]);
    }

    #[tokio::test]
    async fn one_failed_insert_does_not_stop_the_rest() {
        let directory = MemoryDirectory {
            roles: HashMap::from([(Role::SuperAdmin, vec![1, 2, 3])]),
            failing_recipient: Some(2),
            ..Default::default()
        };
        let selection = RecipientSelection { super_admins: true, ..Default::default() };

        let delivery = fan_out(&directory, &Notice::new(NotificationKind::System), &selection).await;
        assert_eq!(delivery, Delivery { delivered: 2, failed: 1 });
        assert_eq!(directory.recipients(), vec![1, 3]);
    }

    #[tokio::test]
    async fn default_text_fills_missing_title_and_message() {
        let directory = MemoryDirectory::default();
        let selection = RecipientSelection { creator: Some(8), ..Default::default() };
        let notice = Notice {
            message: Some("Custom body".to_string()),
            ..Notice::new(NotificationKind::TicketApproved)
        };

        fan_out(&directory, &notice, &selection).await;
        let inserted = directory.inserted.lock().unwrap();
        assert_eq!(inserted[0].title, "Ticket approved");
        assert_eq!(inserted[0].message, "Custom body");
    }

    #[test]
    fn event_selections() {
        let mut ticket = fixtures::ticket(10, 1, TicketStatus::PendingApproval);
        ticket.assigned_to = Some(11);
        ticket.assigned_team_id = Some(2);

        let created = RecipientSelection::for_ticket_event(TicketEvent::Created, &ticket);
        assert_eq!(created, RecipientSelection { team: Some(1), admins: true, ..Default::default() });

        let approved = RecipientSelection::for_ticket_event(TicketEvent::Approved, &ticket);
        assert_eq!(approved.creator, Some(10));
        assert_eq!(approved.assignee, Some(11));
        assert_eq!(approved.assigned_team, Some(2));
        assert!(!approved.admins);

        let rejected = RecipientSelection::for_ticket_event(TicketEvent::Rejected, &ticket);
        assert_eq!(rejected, RecipientSelection { creator: Some(10), team: Some(1), ..Default::default() });

        let assigned = RecipientSelection::for_ticket_event(TicketEvent::Assigned, &ticket);
        assert_eq!(assigned.creator, None);
        assert_eq!(assigned.assignee, Some(11));

        let completed = RecipientSelection::for_ticket_event(TicketEvent::Completed, &ticket);
        assert!(completed.admins);
        assert_eq!(completed.team, Some(1));

        let commented = RecipientSelection::for_ticket_event(TicketEvent::Commented, &ticket);
        assert_eq!(commented, RecipientSelection { creator: Some(10), assignee: Some(11), ..Default::default() });
    }

    #[test]
    fn ticket_notice_names_the_ticket() {
        let ticket = fixtures::ticket(10, 1, TicketStatus::Approved);
        let notice = Notice::for_ticket(TicketEvent::Approved, &ticket);
        assert_eq!(notice.kind, NotificationKind::TicketApproved);
        assert_eq!(notice.ticket_id, Some(100));
        assert!(notice.message.unwrap().ends_with("VPN is down"));
    }
}
