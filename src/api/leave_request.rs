use crate::{
    api::page_window,
    auth::auth::{AuthUser, resolve_employee_id, target_employee},
    error::{AppError, conflict_on_duplicate},
    model::leave::{LeaveRequestView, LeaveStatus, LeaveType, leave_days},
    report::leave_summary::{LeaveBalance, LeaveUsage, build_leave_summary},
    utils::db_utils::{SqlValue, bind_values},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const LEAVE_VIEW_SELECT: &str = r#"
    SELECT
        lr.id, lr.employee_id, lr.leave_type_id,
        lt.code AS leave_type_code, lt.name AS leave_type_name,
        lr.start_date, lr.end_date, lr.days, lr.reason, lr.status,
        lr.created_at, lr.updated_at
    FROM leave_requests lr
    JOIN leave_types lt ON lt.id = lr.leave_type_id
"#;

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateLeave {
    #[schema(example = 1)]
    pub leave_type_id: u64,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateLeaveType {
    #[validate(length(min = 1, max = 10, message = "must be 1-10 characters"))]
    #[schema(example = "M")]
    pub code: String,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    #[schema(example = "Maternity")]
    pub name: String,
    #[validate(range(max = 366, message = "must be at most 366"))]
    #[schema(example = 90)]
    pub annual_quota_days: u32,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveListResponse {
    pub data: Vec<LeaveRequestView>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 10)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct LeaveFilter {
    #[schema(example = 123)]
    /// Filter by employee ID
    pub employee_id: Option<u64>,
    /// Filter by leave status
    pub status: Option<LeaveStatus>,
    #[schema(example = 1)]
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    #[schema(example = 10)]
    /// Pagination per page number
    pub per_page: Option<u32>,
}

#[derive(Deserialize, IntoParams)]
pub struct EmployeeYearQuery {
    /// HR/Admin only; defaults to the caller's own record
    pub employee_id: Option<u64>,
    /// Defaults to the current year
    pub year: Option<i32>,
}

#[derive(Deserialize, IntoParams)]
pub struct EmployeeQuery {
    /// HR/Admin only; defaults to the caller's own record
    pub employee_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveSummaryResponse {
    pub employee_id: u64,
    pub year: i32,
    pub balances: Vec<LeaveBalance>,
}

/// Moves a PENDING request to `to`; 400 when it is missing or already decided.
async fn review_leave(
    pool: &MySqlPool,
    leave_id: u64,
    reviewer: u64,
    to: LeaveStatus,
) -> Result<HttpResponse, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE leave_requests
        SET status = ?, reviewed_by = ?
        WHERE id = ?
        AND status = ?
        "#,
    )
    .bind(to.to_string())
    .bind(reviewer)
    .bind(leave_id)
    .bind(LeaveStatus::Pending.to_string())
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error = %e, leave_id, status = %to, "Leave review failed");
        AppError::from(e)
    })?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Leave request not found or already processed"
        })));
    }

    info!(leave_id, reviewer, status = %to, "Leave reviewed");
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Leave {}", to.to_string().to_lowercase())
    })))
}

/* =========================
Create leave request
========================= */
#[utoipa::path(
    post,
    path = "/api/leave",
    request_body(
        content = CreateLeave,
        description = "Leave request payload",
        content_type = "application/json"
    ),
    responses(
        (status = 201, description = "Leave request submitted successfully",
         body = Object,
         example = json!({
            "message": "Leave request submitted",
            "id": 4,
            "days": 3,
            "status": "PENDING"
         })
        ),
        (status = 400, description = "Invalid dates or unknown leave type"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn create_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateLeave>,
) -> actix_web::Result<impl Responder> {
    payload.validate().map_err(AppError::from)?;

    let days = leave_days(payload.start_date, payload.end_date)
        .ok_or_else(|| AppError::field("end_date", "start_date cannot be after end_date"))?;

    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;

    let active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM leave_types WHERE id = ?")
        .bind(payload.leave_type_id)
        .fetch_optional(pool.get_ref())
        .await
        .map_err(AppError::from)?;
    if active != Some(true) {
        return Err(AppError::field("leave_type_id", "unknown or inactive leave type").into());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO leave_requests
            (employee_id, leave_type_id, start_date, end_date, days, reason, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(payload.leave_type_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(days)
    .bind(&payload.reason)
    .bind(LeaveStatus::Pending.to_string())
    .execute(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, employee_id, "Failed to create leave request");
        AppError::from(e)
    })?;

    info!(leave_id = result.last_insert_id(), employee_id, days, "Leave requested");

    Ok(HttpResponse::Created().json(json!({
        "message": "Leave request submitted",
        "id": result.last_insert_id(),
        "days": days,
        "status": LeaveStatus::Pending
    })))
}

/* =========================
Approve leave (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/{leave_id}/approve",
    params(
        ("leave_id" = u64, Path, description = "ID of the leave request to approve")
    ),
    responses(
        (status = 200, description = "Leave approved successfully", body = Object, example = json!({
            "message": "Leave approved"
        })),
        (status = 400, description = "Leave request not found or already processed", body = Object, example = json!({
            "message": "Leave request not found or already processed"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn approve_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    review_leave(pool.get_ref(), path.into_inner(), auth.user_id, LeaveStatus::Approved).await
}

/* =========================
Reject leave (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/{leave_id}/reject",
    params(
        ("leave_id" = u64, Path, description = "ID of the leave request to reject")
    ),
    responses(
        (status = 200, description = "Leave rejected successfully", body = Object, example = json!({
            "message": "Leave rejected"
        })),
        (status = 400, description = "Leave request not found or already processed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn reject_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    review_leave(pool.get_ref(), path.into_inner(), auth.user_id, LeaveStatus::Rejected).await
}

/* =========================
Cancel own pending leave
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/{leave_id}/cancel",
    params(
        ("leave_id" = u64, Path, description = "ID of the caller's own pending leave request")
    ),
    responses(
        (status = 200, description = "Leave cancelled", body = Object, example = json!({
            "message": "Leave cancelled"
        })),
        (status = 400, description = "Leave request not found or already processed"),
        (status = 403, description = "No employee profile")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn cancel_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;
    let leave_id = path.into_inner();

    let result = sqlx::query(
        r#"
        UPDATE leave_requests
        SET status = ?
        WHERE id = ? AND employee_id = ? AND status = ?
        "#,
    )
    .bind(LeaveStatus::Cancelled.to_string())
    .bind(leave_id)
    .bind(employee_id)
    .bind(LeaveStatus::Pending.to_string())
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "Leave request not found or already processed"
        })));
    }

    info!(leave_id, employee_id, "Leave cancelled");
    Ok(HttpResponse::Ok().json(json!({ "message": "Leave cancelled" })))
}

/// Leave request details (HR/Admin, or the requesting employee)
#[utoipa::path(
    get,
    path = "/api/leave/{leave_id}",
    params(
        ("leave_id" = u64, Path, description = "ID of the leave request to fetch")
    ),
    responses(
        (status = 200, description = "Leave request found", body = LeaveRequestView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave request not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let leave_id = path.into_inner();

    let sql = format!("{} WHERE lr.id = ?", LEAVE_VIEW_SELECT);
    let leave = sqlx::query_as::<_, LeaveRequestView>(&sql)
        .bind(leave_id)
        .fetch_optional(pool.get_ref())
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("Leave request"))?;

    if !auth.role.is_hr_or_admin() {
        let own = resolve_employee_id(&auth, pool.get_ref()).await?;
        if own != leave.employee_id {
            // same answer as a missing row
            return Err(AppError::not_found("Leave request").into());
        }
    }

    Ok(HttpResponse::Ok().json(leave))
}

/// Paginated leave list for HR/Admin
#[utoipa::path(
    get,
    path = "/api/leave",
    params(LeaveFilter),
    responses(
        (status = 200, description = "Paginated leave list", body = LeaveListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn leave_list(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<LeaveFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let (page, per_page, offset) = page_window(query.page, query.per_page, 10);

    let mut where_sql = String::from(" WHERE 1=1");
    let mut args: Vec<SqlValue> = Vec::new();

    if let Some(emp_id) = query.employee_id {
        where_sql.push_str(" AND lr.employee_id = ?");
        args.push(SqlValue::U64(emp_id));
    }

    if let Some(status) = query.status {
        where_sql.push_str(" AND lr.status = ?");
        args.push(SqlValue::String(status.to_string()));
    }

    let count_sql = format!("SELECT COUNT(*) FROM leave_requests lr{}", where_sql);
    let total = bind_values!(sqlx::query_scalar::<_, i64>(&count_sql), args.iter().cloned())
        .fetch_one(pool.get_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to count leave requests");
            AppError::from(e)
        })?;

    let data_sql = format!(
        "{}{} ORDER BY lr.created_at DESC LIMIT ? OFFSET ?",
        LEAVE_VIEW_SELECT, where_sql
    );
    let leaves = bind_values!(sqlx::query_as::<_, LeaveRequestView>(&data_sql), args)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to fetch leave list");
            AppError::from(e)
        })?;

    Ok(HttpResponse::Ok().json(LeaveListResponse {
        data: leaves,
        page,
        per_page,
        total,
    }))
}

/// Every leave request of one employee, newest first
#[utoipa::path(
    get,
    path = "/api/leave/requests",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Leave requests with type", body = Vec<LeaveRequestView>),
        (status = 403, description = "Not allowed to view this employee")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn my_leave_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = target_employee(&auth, pool.get_ref(), query.employee_id).await?;

    let sql = format!(
        "{} WHERE lr.employee_id = ? ORDER BY lr.created_at DESC",
        LEAVE_VIEW_SELECT
    );
    let leaves = sqlx::query_as::<_, LeaveRequestView>(&sql)
        .bind(employee_id)
        .fetch_all(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(leaves))
}

/// Per leave type: yearly quota, approved and pending days, and what remains
#[utoipa::path(
    get,
    path = "/api/leave/summary",
    params(EmployeeYearQuery),
    responses(
        (status = 200, description = "Leave balances", body = LeaveSummaryResponse),
        (status = 403, description = "Not allowed to view this employee")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
#[instrument(name = "leave_summary", skip(auth, pool, query), fields(user_id = auth.user_id))]
pub async fn leave_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeYearQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = target_employee(&auth, pool.get_ref(), query.employee_id).await?;
    let year = query.year.unwrap_or_else(|| Local::now().year());

    let (Some(jan1), Some(dec31)) = (
        NaiveDate::from_ymd_opt(year, 1, 1),
        NaiveDate::from_ymd_opt(year, 12, 31),
    ) else {
        return Err(AppError::field("year", "out of range").into());
    };

    let types = sqlx::query_as::<_, LeaveType>(
        "SELECT id, code, name, annual_quota_days, is_active FROM leave_types ORDER BY code",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    let usage = sqlx::query_as::<_, LeaveUsage>(
        r#"
        SELECT leave_type_id, start_date, end_date, status
        FROM leave_requests
        WHERE employee_id = ?
        AND status IN (?, ?)
        AND start_date <= ? AND end_date >= ?
        "#,
    )
    .bind(employee_id)
    .bind(LeaveStatus::Approved.to_string())
    .bind(LeaveStatus::Pending.to_string())
    .bind(dec31)
    .bind(jan1)
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(LeaveSummaryResponse {
        employee_id,
        year,
        balances: build_leave_summary(&types, &usage, year),
    }))
}

/// Active leave types
#[utoipa::path(
    get,
    path = "/api/leave/types",
    responses(
        (status = 200, description = "Leave type master list", body = Vec<LeaveType>)
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn list_leave_types(pool: web::Data<MySqlPool>) -> actix_web::Result<impl Responder> {
    let types = sqlx::query_as::<_, LeaveType>(
        r#"
        SELECT id, code, name, annual_quota_days, is_active
        FROM leave_types
        WHERE is_active = TRUE
        ORDER BY code
        "#,
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(types))
}

/// Add a leave type (HR/Admin)
#[utoipa::path(
    post,
    path = "/api/leave/types",
    request_body = CreateLeaveType,
    responses(
        (status = 201, description = "Leave type created"),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Code already exists")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Leave"
)]
pub async fn create_leave_type(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateLeaveType>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    let code = payload.code.trim().to_uppercase();
    let result = sqlx::query(
        "INSERT INTO leave_types (code, name, annual_quota_days, is_active) VALUES (?, ?, ?, TRUE)",
    )
    .bind(&code)
    .bind(&payload.name)
    .bind(payload.annual_quota_days)
    .execute(pool.get_ref())
    .await
    .map_err(|e| conflict_on_duplicate(e, "Leave type code already exists"))?;

    info!(code = %code, "Leave type created");
    Ok(HttpResponse::Created().json(json!({
        "message": "Leave type created",
        "id": result.last_insert_id()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service, read_body_json};

    #[actix_web::test]
    async fn reversed_dates_are_rejected_before_db() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/leave", web::post().to(create_leave)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/leave")
            .insert_header(auth_header(Role::Employee, Some(2)))
            .set_json(json!({
                "leave_type_id": 1,
                "start_date": "2026-03-05",
                "end_date": "2026-03-01"
            }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = read_body_json(resp).await;
        assert_eq!(body["errors"]["end_date"], "start_date cannot be after end_date");
    }

    #[actix_web::test]
    async fn employee_cannot_approve() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/leave/{id}/approve", web::put().to(approve_leave)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/leave/1/approve")
            .insert_header(auth_header(Role::Employee, Some(2)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn employee_cannot_list_all_leaves() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/leave", web::get().to(leave_list)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/leave?status=PENDING")
            .insert_header(auth_header(Role::Employee, Some(2)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn employee_cannot_read_another_summary() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/leave/summary", web::get().to(leave_summary)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/leave/summary?employee_id=8")
            .insert_header(auth_header(Role::Employee, Some(2)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn leave_type_code_is_validated() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/leave/types", web::post().to(create_leave_type)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/leave/types")
            .insert_header(auth_header(Role::Hr, None))
            .set_json(json!({ "code": "", "name": "Study", "annual_quota_days": 5 }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
