use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, AsRefStr, EnumString, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct BenefitType {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

/// Spending envelope per (employee, benefit type, year).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct BenefitBudget {
    pub id: u64,
    pub employee_id: u64,
    pub benefit_type_id: u64,
    pub year: i32,
    pub total_amount: f64,
    /// Manual or opening adjustments; approved claims are summed separately.
    pub used_amount: f64,
}

/// Budget row with its benefit type joined.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct BenefitBudgetView {
    pub id: u64,
    pub employee_id: u64,
    pub benefit_type_id: u64,
    pub benefit_type_code: String,
    pub benefit_type_name: String,
    pub year: i32,
    pub total_amount: f64,
    pub used_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct BenefitClaim {
    pub id: u64,
    pub employee_id: u64,
    pub benefit_type_id: u64,
    pub amount: f64,
    pub claim_date: NaiveDate,
    pub description: Option<String>,
    pub status: String,
    pub reviewed_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}
