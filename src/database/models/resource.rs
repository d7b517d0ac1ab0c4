use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::policy::ledger::Stock;

crate::text_enum! {
    pub enum ResourceType {
        Hardware => "HARDWARE",
        Software => "SOFTWARE",
        License => "LICENSE",
        Equipment => "EQUIPMENT",
        Facility => "FACILITY",
        Personnel => "PERSONNEL",
        Other => "OTHER",
    }
}

crate::text_enum! {
    pub enum ResourceCategory {
        Computing => "COMPUTING",
        Networking => "NETWORKING",
        Storage => "STORAGE",
        Peripheral => "PERIPHERAL",
        Software => "SOFTWARE",
        Facility => "FACILITY",
        Other => "OTHER",
    }
}

crate::text_enum! {
    pub enum ResourceUnit {
        Piece => "PIECE",
        License => "LICENSE",
        Hour => "HOUR",
        Seat => "SEAT",
        Gigabyte => "GIGABYTE",
    }
}

crate::text_enum! {
    pub enum HistoryAction {
        Allocated => "ALLOCATED",
        Deallocated => "DEALLOCATED",
        Requested => "REQUESTED",
        RequestApproved => "REQUEST_APPROVED",
        RequestDenied => "REQUEST_DENIED",
        Adjusted => "ADJUSTED",
    }
}

crate::text_enum! {
    pub enum RequestStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Denied => "DENIED",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub resource_type: ResourceType,
    pub category: ResourceCategory,
    pub unit: ResourceUnit,
    pub quantity: i64,
    pub available_quantity: i64,
    pub allocated_quantity: i64,
    pub location: Option<String>,
    pub team_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn stock(&self) -> Stock {
        Stock {
            quantity: self.quantity,
            available: self.available_quantity,
            allocated: self.allocated_quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    pub id: i64,
    pub resource_id: i64,
    pub project_id: i64,
    pub quantity: i64,
    pub allocated_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHistoryEntry {
    pub id: i64,
    pub resource_id: i64,
    pub action: HistoryAction,
    pub quantity: i64,
    pub project_id: Option<i64>,
    pub actor_id: i64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub id: i64,
    pub resource_id: i64,
    pub requested_by: i64,
    pub project_id: Option<i64>,
    pub quantity: i64,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub decided_by: Option<i64>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_note: Option<String>,
    pub created_at: DateTime<Utc>,
}
