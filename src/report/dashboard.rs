use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use utoipa::ToSchema;

pub const TREND_DAYS: i64 = 7;
pub const ACTIVITY_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub present: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    EmployeeJoined,
    LeaveApproved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Activity {
    pub kind: ActivityKind,
    pub reference_id: u64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct NewHire {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApprovedLeave {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub leave_type_code: String,
    pub days: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DailyPresence {
    pub date: NaiveDate,
    pub present: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DashboardSummary {
    pub date: NaiveDate,
    pub total_employees: i64,
    pub present_today: i64,
    pub on_leave_today: i64,
    pub pending_leaves: i64,
    pub attendance_trend: Vec<TrendPoint>,
    pub recent_activity: Vec<Activity>,
}

impl DashboardSummary {
    /// Zeroed shape served when the underlying queries fail.
    pub fn empty(today: NaiveDate) -> Self {
        Self {
            date: today,
            total_employees: 0,
            present_today: 0,
            on_leave_today: 0,
            pending_leaves: 0,
            attendance_trend: fill_trend(today, &[]),
            recent_activity: Vec::new(),
        }
    }
}

/// First day of the trend window ending on `today`.
pub fn trend_start(today: NaiveDate) -> NaiveDate {
    today - Duration::days(TREND_DAYS - 1)
}

/// One point per day from `trend_start(today)` to `today`, zero where no row exists.
pub fn fill_trend(today: NaiveDate, rows: &[DailyPresence]) -> Vec<TrendPoint> {
    let by_date: HashMap<NaiveDate, i64> = rows.iter().map(|r| (r.date, r.present)).collect();
    let start = trend_start(today);
    (0..TREND_DAYS)
        .map(|offset| {
            let date = start + Duration::days(offset);
            TrendPoint {
                date,
                present: by_date.get(&date).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// Newest-first feed of hires and leave approvals, capped at `ACTIVITY_LIMIT`.
pub fn merge_activity(hires: &[NewHire], approvals: &[ApprovedLeave]) -> Vec<Activity> {
    let mut feed: Vec<Activity> = hires
        .iter()
        .map(|h| Activity {
            kind: ActivityKind::EmployeeJoined,
            reference_id: h.id,
            description: format!("{} {} joined", h.first_name, h.last_name),
            timestamp: h.created_at,
        })
        .chain(approvals.iter().map(|l| Activity {
            kind: ActivityKind::LeaveApproved,
            reference_id: l.id,
            description: format!(
                "{} {}: {} day(s) of {} leave approved",
                l.first_name, l.last_name, l.days, l.leave_type_code
            ),
            timestamp: l.updated_at,
        }))
        .collect();

    feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    feed.truncate(ACTIVITY_LIMIT);
    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, hour, 0, 0).unwrap()
    }

    fn hire(id: u64, hour: u32) -> NewHire {
        NewHire {
            id,
            first_name: "New".into(),
            last_name: format!("Hire{id}"),
            created_at: at(hour),
        }
    }

    fn approval(id: u64, hour: u32) -> ApprovedLeave {
        ApprovedLeave {
            id,
            first_name: "On".into(),
            last_name: "Leave".into(),
            leave_type_code: "V".into(),
            days: 2,
            updated_at: at(hour),
        }
    }

    #[test]
    fn trend_covers_seven_days_ending_today() {
        let today = d(2026, 3, 2);
        let rows = [
            DailyPresence { date: d(2026, 2, 28), present: 12 },
            DailyPresence { date: d(2026, 3, 2), present: 9 },
            DailyPresence { date: d(2026, 2, 1), present: 99 },
        ];
        let trend = fill_trend(today, &rows);

        assert_eq!(trend.len(), 7);
        assert_eq!(trend[0].date, d(2026, 2, 24));
        assert_eq!(trend[6].date, today);
        assert_eq!(trend[4].present, 12);
        assert_eq!(trend[6].present, 9);
        assert_eq!(trend.iter().map(|p| p.present).sum::<i64>(), 21);
    }

    #[test]
    fn activity_is_merged_newest_first_and_truncated() {
        let hires: Vec<_> = (1..=5).map(|i| hire(i, i as u32)).collect();
        let approvals: Vec<_> = (1..=5).map(|i| approval(100 + i, 10 + i as u32)).collect();

        let feed = merge_activity(&hires, &approvals);
        assert_eq!(feed.len(), ACTIVITY_LIMIT);
        assert!(feed.iter().all(|a| a.kind == ActivityKind::LeaveApproved));
        assert_eq!(feed[0].reference_id, 105);
        assert!(feed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn activity_interleaves_by_timestamp() {
        let feed = merge_activity(&[hire(1, 3), hire(2, 1)], &[approval(9, 2)]);
        let ids: Vec<u64> = feed.iter().map(|a| a.reference_id).collect();
        assert_eq!(ids, vec![1, 9, 2]);
        assert_eq!(feed[0].description, "New Hire1 joined");
    }

    #[test]
    fn empty_summary_keeps_full_trend_shape() {
        let summary = DashboardSummary::empty(d(2026, 2, 10));
        assert_eq!(summary.present_today, 0);
        assert_eq!(summary.attendance_trend.len(), 7);
        assert!(summary.attendance_trend.iter().all(|p| p.present == 0));
        assert!(summary.recent_activity.is_empty());
    }
}
