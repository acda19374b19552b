use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, AsRefStr, EnumString, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

/// Leave type master data (code `V`, `S`, `P`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveType {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub annual_quota_days: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveRequest {
    pub id: u64,
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    pub reason: Option<String>,
    pub status: String,
    pub reviewed_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Leave request with its leave type joined.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveRequestView {
    pub id: u64,
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub leave_type_code: String,
    pub leave_type_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: u32,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inclusive calendar-day count of `[start, end]`; `None` when the range is reversed.
pub fn leave_days(start: NaiveDate, end: NaiveDate) -> Option<u32> {
    if start > end {
        return None;
    }
    u32::try_from((end - start).num_days() + 1).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn single_day_leave_counts_one() {
        assert_eq!(leave_days(d(2026, 2, 9), d(2026, 2, 9)), Some(1));
    }

    #[test]
    fn span_is_inclusive_across_months() {
        assert_eq!(leave_days(d(2026, 1, 30), d(2026, 2, 2)), Some(4));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert_eq!(leave_days(d(2026, 2, 10), d(2026, 2, 9)), None);
    }
}
