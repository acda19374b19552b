//! Pure folds from fetched rows to the JSON view-models the UI renders.

pub mod attendance_calendar;
pub mod benefit_summary;
pub mod dashboard;
pub mod leave_summary;
pub mod org_tree;
