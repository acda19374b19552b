use crate::{
    auth::auth::{AuthUser, resolve_employee_id, target_employee},
    error::AppError,
    model::{
        attendance::{Attendance, AttendanceStatus},
        employee::EmployeeStatus,
        leave::LeaveStatus,
        working_shift::WorkingShift,
    },
    report::attendance_calendar::{EmployeeMonth, LeaveSpan, SheetEmployee, build_month_sheet, month_bounds},
    utils::db_utils::{SqlValue, bind_values},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::{Datelike, Local, NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct AttendanceQuery {
    /// 1-12, defaults to the current month
    pub month: Option<u32>,
    /// Defaults to the current year
    pub year: Option<i32>,
    /// HR/Admin only; employees always get their own sheet
    pub employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkAttendance {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance",
    responses(
        (status = 200, description = "Checked in successfully", body = Object, example = json!({
            "message": "Checked in successfully",
            "status": "PRESENT"
        })),
        (status = 400, description = "Already checked in today", body = Object, example = json!({
            "message": "Already checked in today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;
    let now = Local::now().naive_local();

    let shift = sqlx::query_as::<_, WorkingShift>(
        r#"
        SELECT ws.id, ws.name, ws.start_time, ws.end_time, ws.grace_minutes
        FROM employees e
        JOIN working_shifts ws ON ws.id = e.working_shift_id
        WHERE e.id = ?
        "#,
    )
    .bind(employee_id)
    .fetch_optional(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    // no shift assigned means nobody can be late
    let status = shift
        .map(|s| s.classify_check_in(now.time()))
        .unwrap_or(AttendanceStatus::Present);

    let result = sqlx::query(
        r#"
        INSERT INTO attendance (employee_id, date, check_in, status)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(now.date())
    .bind(now.time())
    .bind(status.to_string())
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(_) => Ok(HttpResponse::Ok().json(json!({
            "message": "Checked in successfully",
            "status": status
        }))),

        Err(e) => {
            // Duplicate check-in for same day
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some("23000") {
                    return Ok(HttpResponse::BadRequest().json(json!({
                        "message": "Already checked in today"
                    })));
                }
            }

            tracing::error!(error = %e, employee_id, "Check-in failed");
            Err(AppError::from(e).into())
        }
    }
}

/// Check-out endpoint
#[utoipa::path(
    put,
    path = "/api/attendance",
    responses(
        (status = 200, description = "Checked out successfully", body = Object, example = json!({
            "message": "Checked out successfully"
        })),
        (status = 400, description = "No active check-in found for today", body = Object, example = json!({
            "message": "No active check-in found for today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    let employee_id = resolve_employee_id(&auth, pool.get_ref()).await?;
    let now = Local::now().naive_local();

    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out = ?
        WHERE employee_id = ?
        AND date = ?
        AND check_out IS NULL
        "#,
    )
    .bind(now.time())
    .bind(employee_id)
    .bind(now.date())
    .execute(pool.get_ref())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, employee_id, "Check-out failed");
        AppError::from(e)
    })?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "No active check-in found for today"
        })));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Checked out successfully"
    })))
}

/// Record or correct a day's attendance (HR/Admin). One row per employee and date.
#[utoipa::path(
    put,
    path = "/api/attendance/records",
    request_body = MarkAttendance,
    responses(
        (status = 200, description = "Attendance recorded"),
        (status = 400, description = "check_out before check_in"),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn mark_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<MarkAttendance>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    if let (Some(check_in), Some(check_out)) = (payload.check_in, payload.check_out) {
        if check_out < check_in {
            return Err(AppError::field("check_out", "must not be before check_in").into());
        }
    }

    sqlx::query(
        r#"
        INSERT INTO attendance (employee_id, date, check_in, check_out, status)
        SELECT e.id, ?, ?, ?, ?
        FROM employees e
        WHERE e.id = ? AND e.is_deleted = FALSE
        ON DUPLICATE KEY UPDATE
            check_in = VALUES(check_in),
            check_out = VALUES(check_out),
            status = VALUES(status)
        "#,
    )
    .bind(payload.date)
    .bind(payload.check_in)
    .bind(payload.check_out)
    .bind(payload.status.to_string())
    .bind(payload.employee_id)
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)
    .and_then(|r| {
        if r.rows_affected() == 0 {
            Err(AppError::not_found("Employee"))
        } else {
            Ok(r)
        }
    })?;

    info!(employee_id = payload.employee_id, date = %payload.date, "Attendance recorded");
    Ok(HttpResponse::Ok().json(json!({ "message": "Attendance recorded" })))
}

/// SQL text with its positional arguments.
#[derive(Debug)]
struct BoundSql {
    sql: String,
    args: Vec<SqlValue>,
}

/// The three reads behind a month sheet. Only live, working employees are listed,
/// so punches and leave of anyone else never reach the sheet.
struct MonthSheetQueries {
    employees: BoundSql,
    attendance: BoundSql,
    leaves: BoundSql,
}

fn month_sheet_queries(first: NaiveDate, last: NaiveDate, employee_id: Option<u64>) -> MonthSheetQueries {
    let mut employees = BoundSql {
        sql: String::from(
            r#"
        SELECT e.id, e.employee_code, p.first_name, p.last_name, d.name AS department_name
        FROM employees e
        JOIN persons p ON p.id = e.person_id
        JOIN departments d ON d.id = e.department_id
        WHERE e.is_deleted = FALSE AND e.status IN (?, ?)
        "#,
        ),
        args: EmployeeStatus::WORKING
            .iter()
            .map(|s| SqlValue::String(s.to_string()))
            .collect(),
    };

    let mut attendance = BoundSql {
        sql: String::from(
            r#"
        SELECT a.id, a.employee_id, a.date, a.check_in, a.check_out, a.status
        FROM attendance a
        WHERE a.date BETWEEN ? AND ?
        "#,
        ),
        args: vec![SqlValue::Date(first), SqlValue::Date(last)],
    };

    let mut leaves = BoundSql {
        sql: String::from(
            r#"
        SELECT lr.employee_id, lr.start_date, lr.end_date, lt.code AS leave_type_code
        FROM leave_requests lr
        JOIN leave_types lt ON lt.id = lr.leave_type_id
        WHERE lr.status = ? AND lr.start_date <= ? AND lr.end_date >= ?
        "#,
        ),
        args: vec![
            SqlValue::String(LeaveStatus::Approved.to_string()),
            SqlValue::Date(last),
            SqlValue::Date(first),
        ],
    };

    if let Some(id) = employee_id {
        employees.sql.push_str(" AND e.id = ?");
        employees.args.push(SqlValue::U64(id));
        attendance.sql.push_str(" AND a.employee_id = ?");
        attendance.args.push(SqlValue::U64(id));
        leaves.sql.push_str(" AND lr.employee_id = ?");
        leaves.args.push(SqlValue::U64(id));
    }
    employees.sql.push_str(" ORDER BY e.employee_code");

    MonthSheetQueries { employees, attendance, leaves }
}

/// Loads everything the month sheet needs and folds it.
async fn load_month_sheet(
    pool: &MySqlPool,
    year: i32,
    month: u32,
    employee_id: Option<u64>,
) -> Result<Vec<EmployeeMonth>, sqlx::Error> {
    let Some((first, last)) = month_bounds(year, month) else {
        return Ok(Vec::new());
    };
    let q = month_sheet_queries(first, last, employee_id);

    let employees = bind_values!(sqlx::query_as::<_, SheetEmployee>(&q.employees.sql), q.employees.args)
        .fetch_all(pool)
        .await?;
    let attendance = bind_values!(sqlx::query_as::<_, Attendance>(&q.attendance.sql), q.attendance.args)
        .fetch_all(pool)
        .await?;
    let leaves = bind_values!(sqlx::query_as::<_, LeaveSpan>(&q.leaves.sql), q.leaves.args)
        .fetch_all(pool)
        .await?;

    Ok(build_month_sheet(year, month, &employees, &attendance, &leaves).unwrap_or_default())
}

/// Month attendance sheet: one entry per calendar day for every employee in scope.
/// Database failures are logged and answered with an empty list.
#[utoipa::path(
    get,
    path = "/api/attendance/monthly",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Per-employee day-by-day sheet", body = Vec<EmployeeMonth>),
        (status = 400, description = "Month outside 1-12"),
        (status = 403, description = "Not allowed to view this employee")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
#[instrument(name = "attendance_monthly", skip(auth, pool), fields(user_id = auth.user_id))]
pub async fn get_attendance_data(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceQuery>,
) -> actix_web::Result<impl Responder> {
    let today = Local::now().date_naive();
    let month = query.month.unwrap_or_else(|| today.month());
    let year = query.year.unwrap_or_else(|| today.year());

    if month_bounds(year, month).is_none() {
        return Err(AppError::field("month", "must be between 1 and 12").into());
    }

    // HR and Admin may ask for everyone; others resolve to their own record
    let employee_id = if auth.role.is_hr_or_admin() {
        query.employee_id
    } else {
        Some(target_employee(&auth, pool.get_ref(), query.employee_id).await?)
    };

    let sheet = match load_month_sheet(pool.get_ref(), year, month, employee_id).await {
        Ok(sheet) => sheet,
        Err(e) => {
            error!(error = %e, year, month, ?employee_id, "Failed to build attendance sheet");
            Vec::new()
        }
    };

    Ok(HttpResponse::Ok().json(sheet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service};

    #[actix_web::test]
    async fn month_out_of_range_is_rejected() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/attendance/monthly", web::get().to(get_attendance_data)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/attendance/monthly?month=13&year=2026")
            .insert_header(auth_header(Role::Hr, None))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn employee_cannot_read_another_sheet() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/attendance/monthly", web::get().to(get_attendance_data)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/attendance/monthly?month=2&year=2026&employee_id=99")
            .insert_header(auth_header(Role::Employee, Some(7)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn unlinked_token_cannot_name_another_employee() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/attendance/monthly", web::get().to(get_attendance_data)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/attendance/monthly?month=2&year=2026&employee_id=99")
            .insert_header(auth_header(Role::Employee, None))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn mark_attendance_rejects_reversed_times() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/attendance/records", web::put().to(mark_attendance)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/attendance/records")
            .insert_header(auth_header(Role::Admin, None))
            .set_json(json!({
                "employee_id": 1,
                "date": "2026-02-10",
                "status": "PRESENT",
                "check_in": "18:00:00",
                "check_out": "09:00:00"
            }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
    }

    #[test]
    fn sheet_lists_only_live_working_employees() {
        for scope in [None, Some(4)] {
            let q = month_sheet_queries(d(1), d(28), scope);
            assert!(q.employees.sql.contains("e.is_deleted = FALSE"));
            assert!(q.employees.sql.contains("e.status IN (?, ?)"));
            assert_eq!(
                &q.employees.args[..2],
                &[SqlValue::String("PROBATION".into()), SqlValue::String("ACTIVE".into())]
            );
        }
    }

    #[test]
    fn single_employee_scope_narrows_every_read() {
        let q = month_sheet_queries(d(1), d(28), Some(4));
        assert!(q.employees.sql.contains("AND e.id = ?"));
        assert!(q.attendance.sql.ends_with("AND a.employee_id = ?"));
        assert!(q.leaves.sql.ends_with("AND lr.employee_id = ?"));
        assert_eq!(q.attendance.args.last(), Some(&SqlValue::U64(4)));
        assert_eq!(q.leaves.args[0], SqlValue::String("APPROVED".into()));

        let everyone = month_sheet_queries(d(1), d(28), None);
        assert_eq!(everyone.attendance.args, vec![SqlValue::Date(d(1)), SqlValue::Date(d(28))]);
    }
}
