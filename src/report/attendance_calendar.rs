//! Month sheet: one row per employee, one entry per calendar day.
//!
//! Approved leave wins over whatever was punched for the same day.

use crate::model::attendance::{Attendance, AttendanceStatus};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub const LEAVE_STATUS: &str = "LEAVE";

/// Employee columns the sheet needs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SheetEmployee {
    pub id: u64,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub department_name: String,
}

/// An approved leave interval with its type code.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveSpan {
    pub employee_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leave_type_code: String,
}

impl LeaveSpan {
    fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DayEntry {
    pub day: u32,
    pub date: NaiveDate,
    pub is_weekend: bool,
    /// Attendance status, `LEAVE`, or `None` when nothing was recorded.
    pub status: Option<String>,
    pub leave_type: Option<String>,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmployeeMonth {
    pub employee_id: u64,
    pub employee_code: String,
    pub name: String,
    pub department: String,
    pub days: Vec<DayEntry>,
    /// Days that are PRESENT or LEAVE.
    pub total: u32,
}

/// First and last day of the month, `None` for an invalid month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn counts_toward_total(status: Option<&str>) -> bool {
    match status {
        Some(LEAVE_STATUS) => true,
        Some(s) => matches!(s.parse::<AttendanceStatus>(), Ok(AttendanceStatus::Present)),
        None => false,
    }
}

/// Folds attendance rows and approved leave into per-day sheets.
///
/// Rows for employees not in `employees`, or dated outside the month, are ignored.
pub fn build_month_sheet(
    year: i32,
    month: u32,
    employees: &[SheetEmployee],
    attendance: &[Attendance],
    leaves: &[LeaveSpan],
) -> Option<Vec<EmployeeMonth>> {
    let (first, last) = month_bounds(year, month)?;

    let punches: HashMap<(u64, NaiveDate), &Attendance> = attendance
        .iter()
        .map(|a| ((a.employee_id, a.date), a))
        .collect();

    let mut leaves_by_employee: HashMap<u64, Vec<&LeaveSpan>> = HashMap::new();
    for span in leaves {
        if span.end_date >= first && span.start_date <= last {
            leaves_by_employee.entry(span.employee_id).or_default().push(span);
        }
    }

    let sheets = employees
        .iter()
        .map(|emp| {
            let spans = leaves_by_employee.get(&emp.id).map(Vec::as_slice).unwrap_or(&[]);

            let days: Vec<DayEntry> = first
                .iter_days()
                .take_while(|d| *d <= last)
                .map(|date| {
                    let mut entry = DayEntry {
                        day: date.day(),
                        date,
                        is_weekend: is_weekend(date),
                        status: None,
                        leave_type: None,
                        check_in: None,
                        check_out: None,
                    };

                    if let Some(span) = spans.iter().find(|s| s.covers(date)) {
                        entry.status = Some(LEAVE_STATUS.to_string());
                        entry.leave_type = Some(span.leave_type_code.clone());
                    } else if let Some(punch) = punches.get(&(emp.id, date)) {
                        entry.status = Some(punch.status.clone());
                        entry.check_in = punch.check_in;
                        entry.check_out = punch.check_out;
                    }
                    entry
                })
                .collect();

            let total = days
                .iter()
                .filter(|d| counts_toward_total(d.status.as_deref()))
                .count() as u32;

            EmployeeMonth {
                employee_id: emp.id,
                employee_code: emp.employee_code.clone(),
                name: format!("{} {}", emp.first_name, emp.last_name),
                department: emp.department_name.clone(),
                days,
                total,
            }
        })
        .collect();

    Some(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn employee(id: u64) -> SheetEmployee {
        SheetEmployee {
            id,
            employee_code: format!("EMP-{id:03}"),
            first_name: "Ana".into(),
            last_name: "Lim".into(),
            department_name: "Ops".into(),
        }
    }

    fn punch(employee_id: u64, date: NaiveDate, status: AttendanceStatus) -> Attendance {
        Attendance {
            id: 0,
            employee_id,
            date,
            check_in: NaiveTime::from_hms_opt(9, 0, 0),
            check_out: NaiveTime::from_hms_opt(18, 0, 0),
            status: status.to_string(),
        }
    }

    fn leave(employee_id: u64, start: NaiveDate, end: NaiveDate, code: &str) -> LeaveSpan {
        LeaveSpan {
            employee_id,
            start_date: start,
            end_date: end,
            leave_type_code: code.into(),
        }
    }

    #[test]
    fn one_entry_per_day_in_ascending_order() {
        for (year, month, expected) in [(2026, 2, 28), (2024, 2, 29), (2026, 4, 30), (2026, 12, 31)] {
            let sheet = build_month_sheet(year, month, &[employee(1)], &[], &[]).unwrap();
            let days: Vec<u32> = sheet[0].days.iter().map(|e| e.day).collect();
            assert_eq!(days, (1..=expected).collect::<Vec<_>>(), "{year}-{month}");
        }
    }

    #[test]
    fn invalid_month_yields_none() {
        assert!(build_month_sheet(2026, 13, &[employee(1)], &[], &[]).is_none());
        assert!(build_month_sheet(2026, 0, &[employee(1)], &[], &[]).is_none());
    }

    #[test]
    fn approved_leave_overrides_attendance() {
        let attendance = [punch(1, d(2026, 2, 10), AttendanceStatus::Present)];
        let leaves = [leave(1, d(2026, 2, 9), d(2026, 2, 11), "V")];

        let sheet = build_month_sheet(2026, 2, &[employee(1)], &attendance, &leaves).unwrap();
        let days = &sheet[0].days;

        for day in [9, 10, 11] {
            let entry = &days[day - 1];
            assert_eq!(entry.status.as_deref(), Some("LEAVE"));
            assert_eq!(entry.leave_type.as_deref(), Some("V"));
        }
        // the PRESENT punch underneath is not surfaced
        assert_eq!(days[9].check_in, None);
        assert_eq!(days[11].status, None);
        assert_eq!(sheet[0].total, 3);
    }

    #[test]
    fn empty_day_has_no_status_but_weekend_flag() {
        let sheet = build_month_sheet(2026, 2, &[employee(1)], &[], &[]).unwrap();
        // 2026-02-07 is a Saturday
        let sat = &sheet[0].days[6];
        assert!(sat.is_weekend);
        assert_eq!(sat.status, None);
        assert!(!sheet[0].days[8].is_weekend);
    }

    #[test]
    fn total_counts_present_and_leave_only() {
        let attendance = [
            punch(1, d(2026, 3, 2), AttendanceStatus::Present),
            punch(1, d(2026, 3, 3), AttendanceStatus::Late),
            punch(1, d(2026, 3, 4), AttendanceStatus::Absent),
            punch(1, d(2026, 3, 5), AttendanceStatus::Present),
        ];
        let leaves = [leave(1, d(2026, 3, 9), d(2026, 3, 9), "S")];

        let sheet = build_month_sheet(2026, 3, &[employee(1)], &attendance, &leaves).unwrap();
        assert_eq!(sheet[0].total, 3);
        assert_eq!(sheet[0].days[2].status.as_deref(), Some("LATE"));
    }

    #[test]
    fn leave_spanning_month_edges_is_clipped() {
        let leaves = [leave(1, d(2026, 1, 30), d(2026, 2, 2), "V")];
        let sheet = build_month_sheet(2026, 2, &[employee(1)], &[], &leaves).unwrap();
        assert_eq!(sheet[0].total, 2);
        assert_eq!(sheet[0].days[2].status, None);
    }

    #[test]
    fn rows_are_routed_to_their_own_employee() {
        let attendance = [punch(2, d(2026, 2, 3), AttendanceStatus::Present)];
        let leaves = [leave(1, d(2026, 2, 3), d(2026, 2, 3), "P")];

        let sheet =
            build_month_sheet(2026, 2, &[employee(1), employee(2)], &attendance, &leaves).unwrap();
        assert_eq!(sheet[0].days[2].leave_type.as_deref(), Some("P"));
        assert_eq!(sheet[1].days[2].status.as_deref(), Some("PRESENT"));
        assert_eq!(sheet[1].days[2].leave_type, None);
    }

    #[test]
    fn month_bounds_handles_december() {
        assert_eq!(month_bounds(2026, 12), Some((d(2026, 12, 1), d(2026, 12, 31))));
    }
}
