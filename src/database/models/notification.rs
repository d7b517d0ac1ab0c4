use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{types::Json, FromRow};

crate::text_enum! {
    pub enum NotificationKind {
        TicketCreated => "TICKET_CREATED",
        TicketApproved => "TICKET_APPROVED",
        TicketRejected => "TICKET_REJECTED",
        TicketAssigned => "TICKET_ASSIGNED",
        TicketInProgress => "TICKET_IN_PROGRESS",
        TicketCompleted => "TICKET_COMPLETED",
        TicketCommented => "TICKET_COMMENTED",
        ResourceRequestApproved => "RESOURCE_REQUEST_APPROVED",
        ResourceRequestDenied => "RESOURCE_REQUEST_DENIED",
        System => "SYSTEM",
    }
}

impl NotificationKind {
    /// Default (title, message) when the caller supplies no text
    pub fn default_text(&self) -> (&'static str, &'static str) {
        match self {
            NotificationKind::TicketCreated => ("New ticket", "A new ticket was submitted and awaits approval"),
            NotificationKind::TicketApproved => ("Ticket approved", "A ticket was approved"),
            NotificationKind::TicketRejected => ("Ticket rejected", "A ticket was rejected"),
            NotificationKind::TicketAssigned => ("Ticket assigned", "A ticket was assigned to you or your team"),
            NotificationKind::TicketInProgress => ("Work started", "Work on your ticket has started"),
            NotificationKind::TicketCompleted => ("Ticket completed", "A ticket was completed"),
            NotificationKind::TicketCommented => ("New comment", "A comment was added to a ticket"),
            NotificationKind::ResourceRequestApproved => ("Request approved", "Your resource request was approved"),
            NotificationKind::ResourceRequestDenied => ("Request denied", "Your resource request was denied"),
            NotificationKind::System => ("System notice", "System notification"),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub ticket_id: Option<i64>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub ticket_id: Option<i64>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub metadata: Value,
}
