use crate::{
    auth::auth::{AuthUser, resolve_employee_id, target_employee},
    error::{AppError, conflict_on_duplicate},
    model::benefit::{BenefitBudgetView, BenefitClaim, BenefitType, ClaimStatus},
    report::benefit_summary::{
        ApprovedClaimAmount, BenefitBalance, ClaimRejection, admit_claim, balance_of, build_benefit_summary,
    },
};
use actix_web::{HttpResponse, Responder, web};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const BUDGET_VIEW_SELECT: &str = r#"
    SELECT
        bb.id, bb.employee_id, bb.benefit_type_id,
        bt.code AS benefit_type_code, bt.name AS benefit_type_name,
        bb.year, bb.total_amount, bb.used_amount
    FROM benefit_budgets bb
    JOIN benefit_types bt ON bt.id = bb.benefit_type_id
"#;

const CLAIM_SELECT: &str = r#"
    SELECT id, employee_id, benefit_type_id, amount, claim_date, description, status, reviewed_by, created_at
    FROM benefit_claims
"#;

#[derive(Deserialize, IntoParams)]
pub struct BenefitQuery {
    /// HR/Admin only; defaults to the caller's own record
    pub employee_id: Option<u64>,
    /// Defaults to the current year
    pub year: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct BenefitSummaryResponse {
    pub employee_id: u64,
    pub year: i32,
    pub budgets: Vec<BenefitBalance>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct SubmitClaim {
    #[schema(example = 1)]
    pub benefit_type_id: u64,
    #[schema(example = 150.0)]
    pub amount: f64,
    /// Defaults to today
    #[schema(example = "2026-03-14", format = "date", value_type = Option<String>)]
    pub claim_date: Option<NaiveDate>,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct UpsertBudget {
    pub employee_id: u64,
    pub benefit_type_id: u64,
    #[schema(example = 2026)]
    pub year: i32,
    #[validate(range(min = 0.0, message = "must not be negative"))]
    #[schema(example = 5000.0)]
    pub total_amount: f64,
    /// Opening or manual adjustment; approved claims are counted separately
    #[validate(range(min = 0.0, message = "must not be negative"))]
    pub used_amount: Option<f64>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateBenefitType {
    #[validate(length(min = 1, max = 20, message = "must be 1-20 characters"))]
    #[schema(example = "MED")]
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    #[schema(example = "Medical")]
    pub name: String,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub description: Option<String>,
}

fn year_bounds(year: i32) -> Result<(NaiveDate, NaiveDate), AppError> {
    match (NaiveDate::from_ymd_opt(year, 1, 1), NaiveDate::from_ymd_opt(year, 12, 31)) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(AppError::field("year", "out of range")),
    }
}

/// Claims draw on the budget of the year they are dated in, so only this year's dates are accepted.
fn claim_date_in_year(claim_date: Option<NaiveDate>, today: NaiveDate) -> Result<NaiveDate, AppError> {
    let date = claim_date.unwrap_or(today);
    if date.year() != today.year() {
        return Err(AppError::field("claim_date", "must fall within the current year"));
    }
    Ok(date)
}

fn rejection(r: ClaimRejection) -> AppError {
    match r {
        ClaimRejection::NonPositiveAmount => AppError::field("amount", &r.message()),
        ClaimRejection::ExceedsRemaining { .. } => AppError::BusinessRule(r.message()),
    }
}

/// Locks the budget row and returns its balance as of now.
async fn locked_balance(
    tx: &mut Transaction<'_, MySql>,
    employee_id: u64,
    benefit_type_id: u64,
    year: i32,
) -> Result<Option<BenefitBalance>, AppError> {
    let sql = format!(
        "{} WHERE bb.employee_id = ? AND bb.benefit_type_id = ? AND bb.year = ? FOR UPDATE",
        BUDGET_VIEW_SELECT
    );
    let Some(budget) = sqlx::query_as::<_, BenefitBudgetView>(&sql)
        .bind(employee_id)
        .bind(benefit_type_id)
        .bind(year)
        .fetch_optional(&mut **tx)
        .await?
    else {
        return Ok(None);
    };

    let (first, last) = year_bounds(year)?;
    let approved = sqlx::query_as::<_, ApprovedClaimAmount>(
        r#"
        SELECT benefit_type_id, amount
        FROM benefit_claims
        WHERE employee_id = ? AND benefit_type_id = ? AND status = ?
        AND claim_date BETWEEN ? AND ?
        "#,
    )
    .bind(employee_id)
    .bind(benefit_type_id)
    .bind(ClaimStatus::Approved.to_string())
    .bind(first)
    .bind(last)
    .fetch_all(&mut **tx)
    .await?;

    let approved_sum = approved.iter().map(|c| c.amount).sum();
    Ok(Some(balance_of(&budget, approved_sum)))
}

/// Budgets of one employee and year with what has been used and what remains
#[utoipa::path(
    get,
    path = "/api/benefit/summary",
    params(BenefitQuery),
    responses(
        (status = 200, description = "Benefit balances", body = BenefitSummaryResponse),
        (status = 403, description = "Not allowed to view this employee")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
#[instrument(name = "benefit_summary", skip(auth, pool, query), fields(user_id = auth.user_id))]
pub async fn get_benefit_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BenefitQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = target_employee(&auth, pool.get_ref(), query.employee_id).await?;
    let year = query.year.unwrap_or_else(|| Local::now().year());
    let (first, last) = year_bounds(year)?;

    let sql = format!(
        "{} WHERE bb.employee_id = ? AND bb.year = ? ORDER BY bt.code",
        BUDGET_VIEW_SELECT
    );
    let budgets = sqlx::query_as::<_, BenefitBudgetView>(&sql)
        .bind(employee_id)
        .bind(year)
        .fetch_all(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    let approved = sqlx::query_as::<_, ApprovedClaimAmount>(
        r#"
        SELECT benefit_type_id, amount
        FROM benefit_claims
        WHERE employee_id = ? AND status = ?
        AND claim_date BETWEEN ? AND ?
        "#,
    )
    .bind(employee_id)
    .bind(ClaimStatus::Approved.to_string())
    .bind(first)
    .bind(last)
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(BenefitSummaryResponse {
        employee_id,
        year,
        budgets: build_benefit_summary(&budgets, &approved),
    }))
}

/// Submit a claim against this year's budget; rejected when it exceeds what remains
#[utoipa::path(
    post,
    path = "/api/benefit/claims",
    request_body = SubmitClaim,
    responses(
        (status = 201, description = "Claim submitted", body = Object, example = json!({
            "message": "Claim submitted",
            "id": 9,
            "status": "PENDING"
        })),
        (status = 400, description = "Amount not positive or claim date outside the current year"),
        (status = 403, description = "No employee profile"),
        (status = 404, description = "No budget for this benefit this year"),
        (status = 422, description = "Claim exceeds remaining budget")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn submit_benefit_claim(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<SubmitClaim>,
) -> actix_web::Result<impl Responder> {
    payload.validate().map_err(AppError::from)?;
    if !(payload.amount > 0.0) {
        return Err(rejection(ClaimRejection::NonPositiveAmount).into());
    }

    let today = Local::now().date_naive();
    let claim_date = claim_date_in_year(payload.claim_date, today)?;
    let year = today.year();

    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;
    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let balance = locked_balance(&mut tx, employee_id, payload.benefit_type_id, year)
        .await?
        .ok_or_else(|| AppError::not_found("Benefit budget"))?;

    if let Err(r) = admit_claim(payload.amount, balance.remaining) {
        warn!(employee_id, amount = payload.amount, remaining = balance.remaining, "Benefit claim refused");
        return Err(rejection(r).into());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO benefit_claims (employee_id, benefit_type_id, amount, claim_date, description, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(payload.benefit_type_id)
    .bind(payload.amount)
    .bind(claim_date)
    .bind(&payload.description)
    .bind(ClaimStatus::Pending.to_string())
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    info!(claim_id = result.last_insert_id(), employee_id, amount = payload.amount, "Benefit claim submitted");
    Ok(HttpResponse::Created().json(json!({
        "message": "Claim submitted",
        "id": result.last_insert_id(),
        "status": ClaimStatus::Pending
    })))
}

/// Claims of one employee in a year, newest first
#[utoipa::path(
    get,
    path = "/api/benefit/claims",
    params(BenefitQuery),
    responses(
        (status = 200, description = "Claims", body = Vec<BenefitClaim>),
        (status = 403, description = "Not allowed to view this employee")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn list_claims(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<BenefitQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = target_employee(&auth, pool.get_ref(), query.employee_id).await?;
    let (first, last) = year_bounds(query.year.unwrap_or_else(|| Local::now().year()))?;

    let sql = format!(
        "{} WHERE employee_id = ? AND claim_date BETWEEN ? AND ? ORDER BY created_at DESC",
        CLAIM_SELECT
    );
    let claims = sqlx::query_as::<_, BenefitClaim>(&sql)
        .bind(employee_id)
        .bind(first)
        .bind(last)
        .fetch_all(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(claims))
}

/// Withdraw one of the caller's own pending claims
#[utoipa::path(
    put,
    path = "/api/benefit/claims/{claim_id}/cancel",
    params(("claim_id" = u64, Path, description = "Claim ID")),
    responses(
        (status = 200, description = "Claim cancelled"),
        (status = 400, description = "Claim not found or already processed")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn cancel_claim(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;
    let claim_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE benefit_claims SET status = ? WHERE id = ? AND employee_id = ? AND status = ?",
    )
    .bind(ClaimStatus::Cancelled.to_string())
    .bind(claim_id)
    .bind(employee_id)
    .bind(ClaimStatus::Pending.to_string())
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Claim not found or already processed"
        })));
    }

    info!(claim_id, employee_id, "Benefit claim cancelled");
    Ok(HttpResponse::Ok().json(json!({ "message": "Claim cancelled" })))
}

/// Approve a pending claim (HR/Admin). The budget is re-checked under lock so
/// several pending claims cannot be approved past the total.
#[utoipa::path(
    put,
    path = "/api/benefit/claims/{claim_id}/approve",
    params(("claim_id" = u64, Path, description = "Claim ID")),
    responses(
        (status = 200, description = "Claim approved"),
        (status = 400, description = "Claim not found or already processed"),
        (status = 403, description = "HR/Admin only"),
        (status = 422, description = "Claim exceeds remaining budget")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn approve_claim(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let claim_id = path.into_inner();

    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let sql = format!("{} WHERE id = ? AND status = ? FOR UPDATE", CLAIM_SELECT);
    let Some(claim) = sqlx::query_as::<_, BenefitClaim>(&sql)
        .bind(claim_id)
        .bind(ClaimStatus::Pending.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?
    else {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Claim not found or already processed"
        })));
    };

    let balance = locked_balance(&mut tx, claim.employee_id, claim.benefit_type_id, claim.claim_date.year())
        .await?
        .ok_or_else(|| AppError::not_found("Benefit budget"))?;
    admit_claim(claim.amount, balance.remaining).map_err(rejection)?;

    sqlx::query("UPDATE benefit_claims SET status = ?, reviewed_by = ? WHERE id = ?")
        .bind(ClaimStatus::Approved.to_string())
        .bind(auth.user_id)
        .bind(claim_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    info!(claim_id, reviewer = auth.user_id, "Benefit claim approved");
    Ok(HttpResponse::Ok().json(json!({ "message": "Claim approved" })))
}

/// Reject a pending claim (HR/Admin)
#[utoipa::path(
    put,
    path = "/api/benefit/claims/{claim_id}/reject",
    params(("claim_id" = u64, Path, description = "Claim ID")),
    responses(
        (status = 200, description = "Claim rejected"),
        (status = 400, description = "Claim not found or already processed"),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn reject_claim(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let claim_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE benefit_claims SET status = ?, reviewed_by = ? WHERE id = ? AND status = ?",
    )
    .bind(ClaimStatus::Rejected.to_string())
    .bind(auth.user_id)
    .bind(claim_id)
    .bind(ClaimStatus::Pending.to_string())
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Claim not found or already processed"
        })));
    }

    info!(claim_id, reviewer = auth.user_id, "Benefit claim rejected");
    Ok(HttpResponse::Ok().json(json!({ "message": "Claim rejected" })))
}

/// Create or replace an employee's budget for a benefit and year (HR/Admin)
#[utoipa::path(
    put,
    path = "/api/benefit/budgets",
    request_body = UpsertBudget,
    responses(
        (status = 200, description = "Budget saved"),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn upsert_budget(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<UpsertBudget>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;
    year_bounds(payload.year)?;

    sqlx::query(
        r#"
        INSERT INTO benefit_budgets (employee_id, benefit_type_id, year, total_amount, used_amount)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            total_amount = VALUES(total_amount),
            used_amount = VALUES(used_amount)
        "#,
    )
    .bind(payload.employee_id)
    .bind(payload.benefit_type_id)
    .bind(payload.year)
    .bind(payload.total_amount)
    .bind(payload.used_amount.unwrap_or(0.0))
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    info!(
        employee_id = payload.employee_id,
        benefit_type_id = payload.benefit_type_id,
        year = payload.year,
        "Benefit budget saved"
    );
    Ok(HttpResponse::Ok().json(json!({ "message": "Budget saved" })))
}

/// Active benefit types
#[utoipa::path(
    get,
    path = "/api/benefit/types",
    responses((status = 200, description = "Benefit types", body = Vec<BenefitType>)),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn list_benefit_types(pool: web::Data<MySqlPool>) -> actix_web::Result<impl Responder> {
    let types = sqlx::query_as::<_, BenefitType>(
        "SELECT id, code, name, description, is_active FROM benefit_types WHERE is_active = TRUE ORDER BY code",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(types))
}

/// Add a benefit type (HR/Admin)
#[utoipa::path(
    post,
    path = "/api/benefit/types",
    request_body = CreateBenefitType,
    responses(
        (status = 201, description = "Benefit type created"),
        (status = 409, description = "Code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Benefit"
)]
pub async fn create_benefit_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateBenefitType>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    let code = payload.code.trim().to_uppercase();
    let result = sqlx::query("INSERT INTO benefit_types (code, name, description) VALUES (?, ?, ?)")
        .bind(&code)
        .bind(&payload.name)
        .bind(&payload.description)
        .execute(pool.get_ref())
        .await
        .map_err(|e| conflict_on_duplicate(e, "Benefit type code already exists"))?;

    info!(code = %code, "Benefit type created");
    Ok(HttpResponse::Created().json(json!({
        "message": "Benefit type created",
        "id": result.last_insert_id()
    })))
}
