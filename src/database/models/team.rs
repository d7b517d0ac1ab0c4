use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::ticket::Department;

/// Row of the `team_overview` view: the team plus its active member count
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub department: Option<Department>,
    pub is_active: bool,
    pub active_members: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal shape served to anonymous callers
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TeamOption {
    pub id: i64,
    pub name: String,
}
