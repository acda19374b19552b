use crate::{
    api::page_window,
    auth::auth::AuthUser,
    error::{AppError, conflict_on_duplicate},
    model::employee::{EmployeeStatus, EmployeeView},
    utils::db_utils::{ColumnKind, SqlValue, UpdatableColumn, bind_values, build_update_sql, execute_update},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const EMPLOYEE_VIEW_SELECT: &str = r#"
    SELECT
        e.id, e.employee_code, p.first_name, p.last_name, p.email, p.phone,
        e.company_id, e.department_id, d.name AS department_name,
        e.position_id, pos.title AS position_title,
        e.hire_date, e.status, e.created_at
    FROM employees e
    JOIN persons p ON p.id = e.person_id
    JOIN departments d ON d.id = e.department_id
    LEFT JOIN positions pos ON pos.id = e.position_id
"#;

fn is_employee_status(raw: &str) -> bool {
    raw.parse::<EmployeeStatus>().is_ok()
}

/// Columns `PUT /employee/{id}` may change.
const UPDATABLE: [UpdatableColumn; 8] = [
    UpdatableColumn { name: "employee_code", nullable: false, kind: ColumnKind::Text { max: 30 } },
    UpdatableColumn { name: "company_id", nullable: false, kind: ColumnKind::Id },
    UpdatableColumn { name: "unit_id", nullable: true, kind: ColumnKind::Id },
    UpdatableColumn { name: "department_id", nullable: false, kind: ColumnKind::Id },
    UpdatableColumn { name: "position_id", nullable: true, kind: ColumnKind::Id },
    UpdatableColumn { name: "working_shift_id", nullable: true, kind: ColumnKind::Id },
    UpdatableColumn { name: "hire_date", nullable: false, kind: ColumnKind::Date },
    UpdatableColumn { name: "status", nullable: false, kind: ColumnKind::Tag(is_employee_status) },
];

#[derive(Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateEmployee {
    #[validate(length(min = 1, max = 30, message = "must be 1-30 characters"))]
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    #[schema(example = "John")]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    #[schema(example = "Doe")]
    pub last_name: String,
    #[validate(email(message = "must be a valid email"))]
    #[schema(example = "john@company.com", format = "email")]
    pub email: String,
    #[validate(length(max = 30, message = "must be at most 30 characters"))]
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    #[schema(example = 1)]
    pub company_id: u64,
    pub unit_id: Option<u64>,
    #[schema(example = 1)]
    pub department_id: u64,
    pub position_id: Option<u64>,
    pub working_shift_id: Option<u64>,
    #[schema(example = "2026-01-01")]
    pub hire_date: NaiveDate,
    /// Defaults to PROBATION
    pub status: Option<EmployeeStatus>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub department_id: Option<u64>,
    pub status: Option<EmployeeStatus>,
    /// Matches first name, last name, email or employee code
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeListResponse {
    pub data: Vec<EmployeeView>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 10)]
    pub total: i64,
}

/// `WHERE` clause and bindings for the employee list; soft-deleted rows never match.
fn employee_filter(query: &EmployeeQuery) -> (String, Vec<SqlValue>) {
    let mut conditions = vec!["e.is_deleted = FALSE"];
    let mut bindings: Vec<SqlValue> = Vec::new();

    if let Some(company_id) = query.company_id {
        conditions.push("e.company_id = ?");
        bindings.push(SqlValue::U64(company_id));
    }

    if let Some(department_id) = query.department_id {
        conditions.push("e.department_id = ?");
        bindings.push(SqlValue::U64(department_id));
    }

    if let Some(status) = query.status {
        conditions.push("e.status = ?");
        bindings.push(SqlValue::String(status.to_string()));
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(p.first_name LIKE ? OR p.last_name LIKE ? OR p.email LIKE ? OR e.employee_code LIKE ?)",
        );
        let like = format!("%{}%", search);
        for _ in 0..4 {
            bindings.push(SqlValue::String(like.clone()));
        }
    }

    (format!("WHERE {}", conditions.join(" AND ")), bindings)
}

/// Create Employee (person + employee in one transaction)
#[utoipa::path(
    post,
    path = "/api/employee",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Object, example = json!({
            "message": "Employee created successfully",
            "id": 12
        })),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Employee code or email already exists")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    let status = payload.status.unwrap_or(EmployeeStatus::Probation);
    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let person = sqlx::query(
        r#"
        INSERT INTO persons (first_name, last_name, email, phone, date_of_birth, gender, address)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(payload.email.trim().to_lowercase())
    .bind(&payload.phone)
    .bind(payload.date_of_birth)
    .bind(&payload.gender)
    .bind(&payload.address)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_duplicate(e, "Email already belongs to another person"))?;

    let employee = sqlx::query(
        r#"
        INSERT INTO employees
            (employee_code, person_id, company_id, unit_id, department_id,
             position_id, working_shift_id, hire_date, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&payload.employee_code)
    .bind(person.last_insert_id())
    .bind(payload.company_id)
    .bind(payload.unit_id)
    .bind(payload.department_id)
    .bind(payload.position_id)
    .bind(payload.working_shift_id)
    .bind(payload.hire_date)
    .bind(status.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_duplicate(e, "Employee code already exists"))?;

    tx.commit().await.map_err(AppError::from)?;

    let id = employee.last_insert_id();
    info!(employee_id = id, code = %payload.employee_code, "Employee created");

    Ok(HttpResponse::Created().json(json!({
        "message": "Employee created successfully",
        "id": id
    })))
}

/// List live (not soft-deleted) employees
#[utoipa::path(
    get,
    path = "/api/employee",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = EmployeeListResponse)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let (page, per_page, offset) = page_window(query.page, query.per_page, 20);

    let (where_clause, bindings) = employee_filter(&query);

    // ---------- total count ----------
    let count_sql = format!(
        "SELECT COUNT(*) FROM employees e JOIN persons p ON p.id = e.person_id {}",
        where_clause
    );
    debug!(sql = %count_sql, bindings = ?bindings, "Counting employees");

    let total = bind_values!(sqlx::query_scalar::<_, i64>(&count_sql), bindings.iter().cloned())
        .fetch_one(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    // ---------- data query ----------
    let data_sql = format!(
        "{} {} ORDER BY e.id DESC LIMIT ? OFFSET ?",
        EMPLOYEE_VIEW_SELECT, where_clause
    );
    debug!(page, per_page, offset, "Fetching employees");

    let employees = bind_values!(sqlx::query_as::<_, EmployeeView>(&data_sql), bindings)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(EmployeeListResponse {
        data: employees,
        page,
        per_page,
        total,
    }))
}

/// Get Employee by ID (HR/Admin, or the employee themself)
#[utoipa::path(
    get,
    path = "/api/employee/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = EmployeeView),
        (status = 403, description = "Not allowed to view this employee"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let employee_id = auth.scope_employee(Some(path.into_inner()))?.unwrap_or_default();

    let sql = format!("{} WHERE e.id = ? AND e.is_deleted = FALSE", EMPLOYEE_VIEW_SELECT);
    let employee = sqlx::query_as::<_, EmployeeView>(&sql)
        .bind(employee_id)
        .fetch_optional(pool.get_ref())
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("Employee"))?;

    Ok(HttpResponse::Ok().json(employee))
}

/// Partially update an employee; only whitelisted columns are accepted
#[utoipa::path(
    put,
    path = "/api/employee/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    request_body(content = Object, description = "Any subset of employee_code, company_id, unit_id, department_id, position_id, working_shift_id, hire_date, status"),
    responses(
        (status = 200, description = "Employee updated", body = Object, example = json!({
            "message": "Employee updated successfully"
        })),
        (status = 400, description = "Unknown field or invalid value"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let update = build_update_sql(
        "employees",
        &body,
        &UPDATABLE,
        "id",
        employee_id,
        Some("is_deleted = FALSE"),
    )?;
    // already checked against the status names above
    let new_status = body
        .get("status")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<EmployeeStatus>().ok());

    let affected = execute_update(pool.get_ref(), update)
        .await
        .map_err(|e| conflict_on_duplicate(e, "Employee code already exists"))?;

    if affected == 0 {
        return Err(AppError::not_found("Employee").into());
    }

    // people who left or are suspended lose portal access
    if let Some(status) = new_status.filter(|s| !s.is_working()) {
        let revoked = sqlx::query("UPDATE users SET is_active = FALSE WHERE employee_id = ?")
            .bind(employee_id)
            .execute(pool.get_ref())
            .await
            .map_err(AppError::from)?;
        info!(employee_id, %status, logins = revoked.rows_affected(), "Linked logins deactivated");
    }

    info!(employee_id, "Employee updated");
    Ok(HttpResponse::Ok().json(json!({ "message": "Employee updated successfully" })))
}

/// Soft-delete an employee and deactivate any linked login
#[utoipa::path(
    delete,
    path = "/api/employee/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Successfully deleted", body = Object, example = json!({
            "message": "Successfully deleted"
        })),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let result = sqlx::query(
        r#"
        UPDATE employees
        SET is_deleted = TRUE, deleted_at = NOW()
        WHERE id = ? AND is_deleted = FALSE
        "#,
    )
    .bind(employee_id)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Employee").into());
    }

    sqlx::query("UPDATE users SET is_active = FALSE WHERE employee_id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    info!(employee_id, "Employee soft-deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Successfully deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service, read_body_json};

    fn filter(status: Option<EmployeeStatus>, search: Option<&str>) -> EmployeeQuery {
        EmployeeQuery {
            page: None,
            per_page: None,
            company_id: None,
            department_id: Some(2),
            status,
            search: search.map(str::to_string),
        }
    }

    #[test]
    fn list_filter_always_hides_soft_deleted_rows() {
        let (bare, bindings) = employee_filter(&filter(None, Some("   ")));
        assert_eq!(bare, "WHERE e.is_deleted = FALSE AND e.department_id = ?");
        assert_eq!(bindings, vec![SqlValue::U64(2)]);

        let (full, bindings) = employee_filter(&filter(Some(EmployeeStatus::Resigned), Some("ann")));
        assert!(full.starts_with("WHERE e.is_deleted = FALSE AND "));
        assert!(full.contains("e.status = ?"));
        assert_eq!(bindings.len(), 6);
        assert_eq!(bindings[1], SqlValue::String("RESIGNED".into()));
        assert_eq!(bindings[5], SqlValue::String("%ann%".into()));
    }

    #[test]
    fn whitelist_excludes_soft_delete_columns() {
        assert!(UPDATABLE.iter().all(|c| c.name != "is_deleted" && c.name != "deleted_at"));
    }

    #[actix_web::test]
    async fn employee_cannot_list_employees() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/employee", web::get().to(list_employees)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/employee")
            .insert_header(auth_header(Role::Employee, Some(4)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn employee_cannot_view_someone_else() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/employee/{id}", web::get().to(get_employee)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/employee/5")
            .insert_header(auth_header(Role::Employee, Some(4)))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn update_rejects_unknown_status_before_db() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/employee/{id}", web::put().to(update_employee)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/employee/3")
            .insert_header(auth_header(Role::Hr, None))
            .set_json(json!({ "status": "ON_VACATION" }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn update_rejects_soft_delete_flag() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/employee/{id}", web::put().to(update_employee)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/employee/3")
            .insert_header(auth_header(Role::Admin, None))
            .set_json(json!({ "is_deleted": false }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = read_body_json(resp).await;
        assert_eq!(body["errors"]["is_deleted"], "field cannot be updated");
    }

    #[actix_web::test]
    async fn update_rejects_numeric_status_and_blank_code() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/employee/{id}", web::put().to(update_employee)),
        )
        .await;

        let req = TestRequest::put()
            .uri("/employee/3")
            .insert_header(auth_header(Role::Hr, None))
            .set_json(json!({ "status": 7, "employee_code": "" }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = read_body_json(resp).await;
        assert_eq!(body["errors"]["status"], "unsupported value type");
        assert_eq!(body["errors"]["employee_code"], "must be 1-30 characters");
    }
}
