use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, AsRefStr, EnumString, EnumIter, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeStatus {
    Probation,
    Active,
    Suspended,
    Resigned,
    Terminated,
}

impl EmployeeStatus {
    /// Statuses that still appear on attendance sheets and headcounts.
    pub const WORKING: [EmployeeStatus; 2] = [EmployeeStatus::Probation, EmployeeStatus::Active];

    pub fn is_working(self) -> bool {
        Self::WORKING.contains(&self)
    }
}

/// Employee joined with person, department and position for listings.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct EmployeeView {
    pub id: u64,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_id: u64,
    pub department_id: u64,
    pub department_name: String,
    pub position_id: Option<u64>,
    pub position_title: Option<String>,
    pub hire_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn only_probation_and_active_are_working() {
        let working: Vec<_> = EmployeeStatus::iter().filter(|s| s.is_working()).collect();
        assert_eq!(working, vec![EmployeeStatus::Probation, EmployeeStatus::Active]);
    }

    #[test]
    fn parses_stored_status() {
        assert_eq!(EmployeeStatus::from_str("RESIGNED").unwrap(), EmployeeStatus::Resigned);
        assert!(EmployeeStatus::from_str("retired").is_err());
    }
}
