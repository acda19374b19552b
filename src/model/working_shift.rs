use crate::model::attendance::AttendanceStatus;
use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct WorkingShift {
    pub id: u64,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Minutes after `start_time` a check-in still counts as on time.
    pub grace_minutes: u32,
}

impl WorkingShift {
    /// PRESENT when checking in no later than start + grace, LATE afterwards.
    pub fn classify_check_in(&self, at: NaiveTime) -> AttendanceStatus {
        let deadline = self.start_time + Duration::minutes(i64::from(self.grace_minutes));
        // a grace window that wraps past midnight never marks anyone late
        if deadline < self.start_time || at <= deadline {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(start: (u32, u32), grace: u32) -> WorkingShift {
        WorkingShift {
            id: 1,
            name: "Day".into(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            grace_minutes: grace,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn check_in_within_grace_is_present() {
        let day = shift((9, 0), 15);
        assert_eq!(day.classify_check_in(t(8, 40)), AttendanceStatus::Present);
        assert_eq!(day.classify_check_in(t(9, 15)), AttendanceStatus::Present);
    }

    #[test]
    fn check_in_after_grace_is_late() {
        assert_eq!(shift((9, 0), 15).classify_check_in(t(9, 16)), AttendanceStatus::Late);
        assert_eq!(shift((9, 0), 0).classify_check_in(t(9, 1)), AttendanceStatus::Late);
    }
}
