use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// User row without the password hash, as listed to admins.
#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct UserSummary {
    pub id: u64,
    pub email: String,
    pub role_id: u8,
    pub employee_id: Option<u64>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}
