use crate::{
    auth::auth::AuthUser,
    model::{attendance::AttendanceStatus, employee::EmployeeStatus, leave::LeaveStatus},
    report::dashboard::{
        ACTIVITY_LIMIT, ApprovedLeave, DailyPresence, DashboardSummary, NewHire, fill_trend,
        merge_activity, trend_start,
    },
};
use actix_web::{HttpResponse, Responder, web};
use chrono::{Local, NaiveDate};
use sqlx::MySqlPool;
use tracing::{error, instrument};

async fn load_summary(pool: &MySqlPool, today: NaiveDate) -> Result<DashboardSummary, sqlx::Error> {
    let present = AttendanceStatus::Present.to_string();
    let approved = LeaveStatus::Approved.to_string();

    let total_employees = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM employees WHERE is_deleted = FALSE AND status IN (?, ?)",
    )
    .bind(EmployeeStatus::WORKING[0].to_string())
    .bind(EmployeeStatus::WORKING[1].to_string())
    .fetch_one(pool)
    .await?;

    let present_today = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM attendance WHERE date = ? AND status = ?",
    )
    .bind(today)
    .bind(&present)
    .fetch_one(pool)
    .await?;

    let on_leave_today = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(DISTINCT employee_id)
        FROM leave_requests
        WHERE status = ? AND start_date <= ? AND end_date >= ?
        "#,
    )
    .bind(&approved)
    .bind(today)
    .bind(today)
    .fetch_one(pool)
    .await?;

    let pending_leaves = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM leave_requests WHERE status = ?",
    )
    .bind(LeaveStatus::Pending.to_string())
    .fetch_one(pool)
    .await?;

    let presence = sqlx::query_as::<_, DailyPresence>(
        r#"
        SELECT date, COUNT(*) AS present
        FROM attendance
        WHERE status = ? AND date BETWEEN ? AND ?
        GROUP BY date
        "#,
    )
    .bind(&present)
    .bind(trend_start(today))
    .bind(today)
    .fetch_all(pool)
    .await?;

    let hires = sqlx::query_as::<_, NewHire>(
        r#"
        SELECT e.id, p.first_name, p.last_name, e.created_at
        FROM employees e
        JOIN persons p ON p.id = e.person_id
        WHERE e.is_deleted = FALSE
        ORDER BY e.created_at DESC
        LIMIT ?
        "#,
    )
    .bind(ACTIVITY_LIMIT as u32)
    .fetch_all(pool)
    .await?;

    let approvals = sqlx::query_as::<_, ApprovedLeave>(
        r#"
        SELECT lr.id, p.first_name, p.last_name, lt.code AS leave_type_code, lr.days, lr.updated_at
        FROM leave_requests lr
        JOIN leave_types lt ON lt.id = lr.leave_type_id
        JOIN employees e ON e.id = lr.employee_id
        JOIN persons p ON p.id = e.person_id
        WHERE lr.status = ?
        ORDER BY lr.updated_at DESC
        LIMIT ?
        "#,
    )
    .bind(&approved)
    .bind(ACTIVITY_LIMIT as u32)
    .fetch_all(pool)
    .await?;

    Ok(DashboardSummary {
        date: today,
        total_employees,
        present_today,
        on_leave_today,
        pending_leaves,
        attendance_trend: fill_trend(today, &presence),
        recent_activity: merge_activity(&hires, &approvals),
    })
}

/// Headcount, today's presence and leave, pending approvals, a 7-day presence
/// trend and the latest activity. Failures are logged and served as a zeroed summary.
#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Dashboard summary", body = DashboardSummary),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
#[instrument(name = "dashboard", skip(auth, pool), fields(user_id = auth.user_id))]
pub async fn get_dashboard_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let today = Local::now().date_naive();
    let summary = match load_summary(pool.get_ref(), today).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, %today, "Failed to build dashboard summary");
            DashboardSummary::empty(today)
        }
    };

    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service};

    #[actix_web::test]
    async fn employee_cannot_open_dashboard() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/dashboard", web::get().to(get_dashboard_summary)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/dashboard")
            .insert_header(auth_header(Role::Employee, Some(1)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
