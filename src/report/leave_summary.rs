use crate::model::leave::{LeaveStatus, LeaveType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// The parts of a leave request the balance needs.
#[derive(Debug, Clone, FromRow)]
pub struct LeaveUsage {
    pub leave_type_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct LeaveBalance {
    pub leave_type_id: u64,
    pub code: String,
    pub name: String,
    pub quota: u32,
    pub used: u32,
    pub pending: u32,
    pub remaining: u32,
}

/// Days of `[start, end]` that fall inside `year`.
pub fn days_in_year(start: NaiveDate, end: NaiveDate, year: i32) -> u32 {
    let (Some(jan1), Some(dec31)) = (
        NaiveDate::from_ymd_opt(year, 1, 1),
        NaiveDate::from_ymd_opt(year, 12, 31),
    ) else {
        return 0;
    };
    let from = start.max(jan1);
    let to = end.min(dec31);
    if from > to {
        return 0;
    }
    ((to - from).num_days() + 1) as u32
}

/// One balance line per active leave type, in the order given.
pub fn build_leave_summary(types: &[LeaveType], usage: &[LeaveUsage], year: i32) -> Vec<LeaveBalance> {
    types
        .iter()
        .filter(|t| t.is_active)
        .map(|t| {
            let mut used = 0;
            let mut pending = 0;
            for u in usage.iter().filter(|u| u.leave_type_id == t.id) {
                let days = days_in_year(u.start_date, u.end_date, year);
                match u.status.parse::<LeaveStatus>() {
                    Ok(LeaveStatus::Approved) => used += days,
                    Ok(LeaveStatus::Pending) => pending += days,
                    _ => {}
                }
            }
            LeaveBalance {
                leave_type_id: t.id,
                code: t.code.clone(),
                name: t.name.clone(),
                quota: t.annual_quota_days,
                used,
                pending,
                remaining: t.annual_quota_days.saturating_sub(used),
            }
        })
        .collect()
}
