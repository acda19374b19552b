use crate::model::benefit::BenefitBudgetView;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Amount of one approved claim, keyed by its benefit type.
#[derive(Debug, Clone, FromRow)]
pub struct ApprovedClaimAmount {
    pub benefit_type_id: u64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BenefitBalance {
    pub budget_id: u64,
    pub benefit_type_id: u64,
    pub benefit_type_code: String,
    pub benefit_type_name: String,
    pub year: i32,
    pub total: f64,
    pub used: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimRejection {
    NonPositiveAmount,
    ExceedsRemaining { remaining: f64 },
}

impl ClaimRejection {
    pub fn message(&self) -> String {
        match self {
            ClaimRejection::NonPositiveAmount => "Claim amount must be greater than zero".to_string(),
            ClaimRejection::ExceedsRemaining { remaining } => {
                format!("Claim amount exceeds remaining budget ({remaining:.2})")
            }
        }
    }
}

fn approved_totals(claims: &[ApprovedClaimAmount]) -> HashMap<u64, f64> {
    let mut totals = HashMap::new();
    for c in claims {
        *totals.entry(c.benefit_type_id).or_insert(0.0) += c.amount;
    }
    totals
}

/// `used = used_amount + approved claims of the same type`, `remaining = total - used`.
pub fn balance_of(budget: &BenefitBudgetView, approved_sum: f64) -> BenefitBalance {
    let used = budget.used_amount + approved_sum;
    BenefitBalance {
        budget_id: budget.id,
        benefit_type_id: budget.benefit_type_id,
        benefit_type_code: budget.benefit_type_code.clone(),
        benefit_type_name: budget.benefit_type_name.clone(),
        year: budget.year,
        total: budget.total_amount,
        used,
        remaining: budget.total_amount - used,
    }
}

pub fn build_benefit_summary(
    budgets: &[BenefitBudgetView],
    approved: &[ApprovedClaimAmount],
) -> Vec<BenefitBalance> {
    let totals = approved_totals(approved);
    budgets
        .iter()
        .map(|b| balance_of(b, totals.get(&b.benefit_type_id).copied().unwrap_or(0.0)))
        .collect()
}

/// Admission check for a new claim against the balance computed at call time.
pub fn admit_claim(amount: f64, remaining: f64) -> Result<(), ClaimRejection> {
    if !(amount > 0.0) {
        return Err(ClaimRejection::NonPositiveAmount);
    }
    if amount > remaining {
        return Err(ClaimRejection::ExceedsRemaining { remaining });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(id: u64, type_id: u64, total: f64, used: f64) -> BenefitBudgetView {
        BenefitBudgetView {
            id,
            employee_id: 7,
            benefit_type_id: type_id,
            benefit_type_code: format!("B{type_id}"),
            benefit_type_name: format!("Benefit {type_id}"),
            year: 2026,
            total_amount: total,
            used_amount: used,
        }
    }

    fn claim(type_id: u64, amount: f64) -> ApprovedClaimAmount {
        ApprovedClaimAmount {
            benefit_type_id: type_id,
            amount,
        }
    }

    #[test]
    fn remaining_is_total_minus_used() {
        let budgets = [budget(1, 10, 5000.0, 250.0), budget(2, 20, 1200.0, 0.0)];
        let approved = [claim(10, 1000.0), claim(10, 500.0), claim(20, 200.0), claim(99, 75.0)];

        let summary = build_benefit_summary(&budgets, &approved);
        assert_eq!(summary.len(), 2);
        for line in &summary {
            assert_eq!(line.remaining, line.total - line.used);
        }
        assert_eq!(summary[0].used, 1750.0);
        assert_eq!(summary[0].remaining, 3250.0);
        assert_eq!(summary[1].used, 200.0);
        assert_eq!(summary[0].benefit_type_code, "B10");
    }

    #[test]
    fn budget_without_claims_keeps_manual_usage() {
        let summary = build_benefit_summary(&[budget(1, 10, 800.0, 300.0)], &[]);
        assert_eq!(summary[0].used, 300.0);
        assert_eq!(summary[0].remaining, 500.0);
    }

    #[test]
    fn claim_equal_to_remaining_is_admitted() {
        assert_eq!(admit_claim(500.0, 500.0), Ok(()));
    }

    #[test]
    fn claim_over_remaining_is_rejected() {
        assert_eq!(
            admit_claim(500.01, 500.0),
            Err(ClaimRejection::ExceedsRemaining { remaining: 500.0 })
        );
    }

    #[test]
    fn zero_negative_and_nan_amounts_are_rejected() {
        for amount in [0.0, -10.0, f64::NAN] {
            assert_eq!(admit_claim(amount, 100.0), Err(ClaimRejection::NonPositiveAmount));
        }
    }
}
