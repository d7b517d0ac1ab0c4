use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::policy::lifecycle::{TicketPriority, TicketStatus};

crate::text_enum! {
    pub enum TicketType {
        Incident => "INCIDENT",
        ServiceRequest => "SERVICE_REQUEST",
        ChangeRequest => "CHANGE_REQUEST",
        Problem => "PROBLEM",
        Task => "TASK",
    }
}

crate::text_enum! {
    pub enum TicketCategory {
        Hardware => "HARDWARE",
        Software => "SOFTWARE",
        Network => "NETWORK",
        Access => "ACCESS",
        Security => "SECURITY",
        Other => "OTHER",
    }
}

crate::text_enum! {
    pub enum Department {
        It => "IT",
        Hr => "HR",
        Finance => "FINANCE",
        Operations => "OPERATIONS",
        Sales => "SALES",
        Marketing => "MARKETING",
        Engineering => "ENGINEERING",
        Support => "SUPPORT",
        Other => "OTHER",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub ticket_type: TicketType,
    pub category: TicketCategory,
    pub department: Department,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: i64,
    pub team_id: i64,
    pub assigned_to: Option<i64>,
    pub assigned_team_id: Option<i64>,
    pub project_id: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub expected_closure: Option<NaiveDate>,
    pub actual_closure: Option<DateTime<Utc>>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketComment {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketAttachment {
    pub id: i64,
    pub ticket_id: i64,
    pub file_name: String,
    pub url: String,
    pub uploaded_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketResource {
    pub id: i64,
    pub ticket_id: i64,
    pub resource_id: i64,
    pub quantity: i64,
    pub notes: Option<String>,
    pub added_by: i64,
    pub created_at: DateTime<Utc>,
}

/// A ticket with its child collections, as served by `GET /tickets/:id`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub comments: Vec<TicketComment>,
    pub attachments: Vec<TicketAttachment>,
    pub resources: Vec<TicketResource>,
}
