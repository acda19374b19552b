use crate::{
    auth::auth::AuthUser,
    error::{AppError, conflict_on_duplicate},
    model::{
        organization::{Company, Department, Position, Unit},
        working_shift::WorkingShift,
    },
    report::org_tree::{build_org_tree, creates_cycle},
};
use actix_web::{HttpResponse, Responder, web};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use std::collections::HashMap;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateCompany {
    #[validate(length(min = 1, max = 150, message = "must be 1-150 characters"))]
    #[schema(example = "Acme Holdings")]
    pub name: String,
    #[validate(length(min = 1, max = 30, message = "must be 1-30 characters"))]
    #[schema(example = "ACME")]
    pub code: String,
    pub parent_id: Option<u64>,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateUnit {
    pub company_id: u64,
    #[validate(length(min = 1, max = 150, message = "must be 1-150 characters"))]
    #[schema(example = "Operations")]
    pub name: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateDepartment {
    pub company_id: u64,
    pub unit_id: Option<u64>,
    pub parent_id: Option<u64>,
    #[validate(length(min = 1, max = 150, message = "must be 1-150 characters"))]
    #[schema(example = "Finance")]
    pub name: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreatePosition {
    pub department_id: u64,
    #[validate(length(min = 1, max = 150, message = "must be 1-150 characters"))]
    #[schema(example = "Accountant")]
    pub title: String,
}

#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateWorkingShift {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    #[schema(example = "Day")]
    pub name: String,
    #[schema(example = "09:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "18:00:00", value_type = String)]
    pub end_time: NaiveTime,
    #[validate(range(max = 240, message = "must be at most 240"))]
    #[schema(example = 10)]
    pub grace_minutes: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct Reparent {
    /// `null` detaches the node and makes it a root
    pub parent_id: Option<u64>,
}

#[derive(Deserialize, IntoParams)]
pub struct CompanyFilter {
    pub company_id: Option<u64>,
}

#[derive(Deserialize, IntoParams)]
pub struct DepartmentFilter {
    pub department_id: Option<u64>,
}

/// Parent links of a self-referencing table, for cycle checks.
fn parent_links_sql(table: &str) -> String {
    format!("SELECT id, parent_id FROM {} FOR UPDATE", table)
}

/// Parent link of every node, locked until the transaction ends so concurrent
/// moves are checked one after another.
async fn parent_links(
    tx: &mut Transaction<'_, MySql>,
    table: &str,
) -> Result<HashMap<u64, Option<u64>>, AppError> {
    let rows = sqlx::query_as::<_, (u64, Option<u64>)>(&parent_links_sql(table))
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().collect())
}

fn check_reparent(
    node: u64,
    new_parent: Option<u64>,
    parents: &HashMap<u64, Option<u64>>,
    what: &str,
) -> Result<(), AppError> {
    if !parents.contains_key(&node) {
        return Err(AppError::not_found(what));
    }
    if let Some(parent) = new_parent {
        if !parents.contains_key(&parent) {
            return Err(AppError::field("parent_id", "unknown parent"));
        }
        if creates_cycle(node, parent, parents) {
            return Err(AppError::BusinessRule(format!(
                "{what} cannot be moved under itself or one of its descendants"
            )));
        }
    }
    Ok(())
}

/// Companies, each with its child companies, units, departments and positions nested
#[utoipa::path(
    get,
    path = "/api/organization/tree",
    responses((status = 200, description = "Organization chart", body = Vec<CompanyNode>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn get_org_tree(pool: web::Data<MySqlPool>) -> actix_web::Result<impl Responder> {
    let pool = pool.get_ref();

    let companies = sqlx::query_as::<_, Company>(
        "SELECT id, name, code, parent_id, is_active FROM companies WHERE is_active = TRUE ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    let units = sqlx::query_as::<_, Unit>(
        "SELECT id, company_id, name, is_active FROM units WHERE is_active = TRUE ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    let departments = sqlx::query_as::<_, Department>(
        r#"
        SELECT id, company_id, unit_id, parent_id, name, is_active
        FROM departments WHERE is_active = TRUE ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    let positions = sqlx::query_as::<_, Position>(
        "SELECT id, department_id, title, is_active FROM positions WHERE is_active = TRUE ORDER BY title",
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(build_org_tree(&companies, &units, &departments, &positions)))
}

#[utoipa::path(
    get,
    path = "/api/organization/companies",
    responses((status = 200, description = "Companies", body = Vec<Company>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn list_companies(pool: web::Data<MySqlPool>) -> actix_web::Result<impl Responder> {
    let companies = sqlx::query_as::<_, Company>(
        "SELECT id, name, code, parent_id, is_active FROM companies ORDER BY name",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(companies))
}

#[utoipa::path(
    post,
    path = "/api/organization/companies",
    request_body = CreateCompany,
    responses(
        (status = 201, description = "Company created"),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn create_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateCompany>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    payload.validate().map_err(AppError::from)?;

    let result = sqlx::query("INSERT INTO companies (name, code, parent_id) VALUES (?, ?, ?)")
        .bind(&payload.name)
        .bind(payload.code.trim().to_uppercase())
        .bind(payload.parent_id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| conflict_on_duplicate(e, "Company code already exists"))?;

    info!(company_id = result.last_insert_id(), "Company created");
    Ok(HttpResponse::Created().json(json!({ "message": "Company created", "id": result.last_insert_id() })))
}

/// Move a company under another company, or make it a root
#[utoipa::path(
    put,
    path = "/api/organization/companies/{company_id}/parent",
    params(("company_id" = u64, Path, description = "Company ID")),
    request_body = Reparent,
    responses(
        (status = 200, description = "Company moved"),
        (status = 404, description = "Company not found"),
        (status = 422, description = "Move would create a cycle")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn reparent_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Reparent>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let company_id = path.into_inner();

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let parents = parent_links(&mut tx, "companies").await?;
    check_reparent(company_id, payload.parent_id, &parents, "Company")?;

    sqlx::query("UPDATE companies SET parent_id = ? WHERE id = ?")
        .bind(payload.parent_id)
        .bind(company_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    tx.commit().await.map_err(AppError::from)?;

    info!(company_id, parent_id = ?payload.parent_id, "Company moved");
    Ok(HttpResponse::Ok().json(json!({ "message": "Company moved" })))
}

#[utoipa::path(
    get,
    path = "/api/organization/units",
    params(CompanyFilter),
    responses((status = 200, description = "Units", body = Vec<Unit>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn list_units(
    pool: web::Data<MySqlPool>,
    query: web::Query<CompanyFilter>,
) -> actix_web::Result<impl Responder> {
    let units = sqlx::query_as::<_, Unit>(
        r#"
        SELECT id, company_id, name, is_active
        FROM units
        WHERE (? IS NULL OR company_id = ?)
        ORDER BY name
        "#,
    )
    .bind(query.company_id)
    .bind(query.company_id)
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(units))
}

#[utoipa::path(
    post,
    path = "/api/organization/units",
    request_body = CreateUnit,
    responses(
        (status = 201, description = "Unit created"),
        (status = 400, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn create_unit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUnit>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    payload.validate().map_err(AppError::from)?;

    let result = sqlx::query("INSERT INTO units (company_id, name) VALUES (?, ?)")
        .bind(payload.company_id)
        .bind(&payload.name)
        .execute(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    info!(unit_id = result.last_insert_id(), company_id = payload.company_id, "Unit created");
    Ok(HttpResponse::Created().json(json!({ "message": "Unit created", "id": result.last_insert_id() })))
}

#[utoipa::path(
    get,
    path = "/api/organization/departments",
    params(CompanyFilter),
    responses((status = 200, description = "Departments", body = Vec<Department>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn list_departments(
    pool: web::Data<MySqlPool>,
    query: web::Query<CompanyFilter>,
) -> actix_web::Result<impl Responder> {
    let departments = sqlx::query_as::<_, Department>(
        r#"
        SELECT id, company_id, unit_id, parent_id, name, is_active
        FROM departments
        WHERE (? IS NULL OR company_id = ?)
        ORDER BY name
        "#,
    )
    .bind(query.company_id)
    .bind(query.company_id)
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(departments))
}

#[utoipa::path(
    post,
    path = "/api/organization/departments",
    request_body = CreateDepartment,
    responses(
        (status = 201, description = "Department created"),
        (status = 400, description = "Validation failed or parent in another company")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn create_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateDepartment>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    if let Some(parent_id) = payload.parent_id {
        let parent_company = sqlx::query_scalar::<_, u64>("SELECT company_id FROM departments WHERE id = ?")
            .bind(parent_id)
            .fetch_optional(pool.get_ref())
            .await
            .map_err(AppError::from)?;
        if parent_company != Some(payload.company_id) {
            return Err(AppError::field("parent_id", "parent must be a department of the same company").into());
        }
    }

    let result = sqlx::query(
        "INSERT INTO departments (company_id, unit_id, parent_id, name) VALUES (?, ?, ?, ?)",
    )
    .bind(payload.company_id)
    .bind(payload.unit_id)
    .bind(payload.parent_id)
    .bind(&payload.name)
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    info!(department_id = result.last_insert_id(), company_id = payload.company_id, "Department created");
    Ok(HttpResponse::Created().json(json!({ "message": "Department created", "id": result.last_insert_id() })))
}

/// Move a department under another department, or to the top of its company
#[utoipa::path(
    put,
    path = "/api/organization/departments/{department_id}/parent",
    params(("department_id" = u64, Path, description = "Department ID")),
    request_body = Reparent,
    responses(
        (status = 200, description = "Department moved"),
        (status = 404, description = "Department not found"),
        (status = 422, description = "Move would create a cycle")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn reparent_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Reparent>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let department_id = path.into_inner();

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let parents = parent_links(&mut tx, "departments").await?;
    check_reparent(department_id, payload.parent_id, &parents, "Department")?;

    if let Some(parent_id) = payload.parent_id {
        let companies = sqlx::query_as::<_, (u64, u64)>("SELECT id, company_id FROM departments WHERE id IN (?, ?)")
            .bind(department_id)
            .bind(parent_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(AppError::from)?;
        let company_of = |id: u64| companies.iter().find(|(d, _)| *d == id).map(|(_, c)| *c);
        if company_of(department_id) != company_of(parent_id) {
            return Err(AppError::field("parent_id", "parent must be a department of the same company").into());
        }
    }

    sqlx::query("UPDATE departments SET parent_id = ? WHERE id = ?")
        .bind(payload.parent_id)
        .bind(department_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    tx.commit().await.map_err(AppError::from)?;

    info!(department_id, parent_id = ?payload.parent_id, "Department moved");
    Ok(HttpResponse::Ok().json(json!({ "message": "Department moved" })))
}

#[utoipa::path(
    get,
    path = "/api/organization/positions",
    params(DepartmentFilter),
    responses((status = 200, description = "Positions", body = Vec<Position>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn list_positions(
    pool: web::Data<MySqlPool>,
    query: web::Query<DepartmentFilter>,
) -> actix_web::Result<impl Responder> {
    let positions = sqlx::query_as::<_, Position>(
        r#"
        SELECT id, department_id, title, is_active
        FROM positions
        WHERE (? IS NULL OR department_id = ?)
        ORDER BY title
        "#,
    )
    .bind(query.department_id)
    .bind(query.department_id)
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(positions))
}

#[utoipa::path(
    post,
    path = "/api/organization/positions",
    request_body = CreatePosition,
    responses(
        (status = 201, description = "Position created"),
        (status = 400, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn create_position(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePosition>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    let result = sqlx::query("INSERT INTO positions (department_id, title) VALUES (?, ?)")
        .bind(payload.department_id)
        .bind(&payload.title)
        .execute(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    info!(position_id = result.last_insert_id(), department_id = payload.department_id, "Position created");
    Ok(HttpResponse::Created().json(json!({ "message": "Position created", "id": result.last_insert_id() })))
}

#[utoipa::path(
    get,
    path = "/api/organization/shifts",
    responses((status = 200, description = "Working shifts", body = Vec<WorkingShift>)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn list_shifts(pool: web::Data<MySqlPool>) -> actix_web::Result<impl Responder> {
    let shifts = sqlx::query_as::<_, WorkingShift>(
        "SELECT id, name, start_time, end_time, grace_minutes FROM working_shifts ORDER BY start_time",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(shifts))
}

#[utoipa::path(
    post,
    path = "/api/organization/shifts",
    request_body = CreateWorkingShift,
    responses(
        (status = 201, description = "Working shift created"),
        (status = 400, description = "Validation failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn create_shift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateWorkingShift>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    payload.validate().map_err(AppError::from)?;

    let result = sqlx::query(
        "INSERT INTO working_shifts (name, start_time, end_time, grace_minutes) VALUES (?, ?, ?, ?)",
    )
    .bind(&payload.name)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.grace_minutes)
    .execute(pool.get_ref())
    .await
    .map_err(AppError::from)?;

    info!(shift_id = result.last_insert_id(), "Working shift created");
    Ok(HttpResponse::Created().json(json!({ "message": "Working shift created", "id": result.last_insert_id() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{auth_header, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service};

    fn chain() -> HashMap<u64, Option<u64>> {
        // 1 <- 2 <- 3, 4 standalone
        HashMap::from([(1, None), (2, Some(1)), (3, Some(2)), (4, None)])
    }

    #[test]
    fn parent_links_are_read_under_row_locks() {
        assert_eq!(
            parent_links_sql("departments"),
            "SELECT id, parent_id FROM departments FOR UPDATE"
        );
    }

    #[test]
    fn reparent_rejects_descendant_parent() {
        let err = check_reparent(1, Some(3), &chain(), "Company").unwrap_err();
        assert!(matches!(err, AppError::BusinessRule(_)));
    }

    #[test]
    fn reparent_rejects_self_and_unknown_ids() {
        assert!(matches!(check_reparent(2, Some(2), &chain(), "Company"), Err(AppError::BusinessRule(_))));
        assert!(matches!(check_reparent(9, None, &chain(), "Company"), Err(AppError::NotFound(_))));
        assert!(matches!(check_reparent(2, Some(9), &chain(), "Company"), Err(AppError::Validation(_))));
    }

    #[test]
    fn reparent_allows_moves_and_detaching() {
        assert!(check_reparent(3, Some(4), &chain(), "Department").is_ok());
        assert!(check_reparent(2, None, &chain(), "Department").is_ok());
    }

    #[actix_web::test]
    async fn hr_cannot_create_company() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/organization/companies", web::post().to(create_company)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/organization/companies")
            .insert_header(auth_header(Role::Hr, None))
            .set_json(json!({ "name": "Acme", "code": "ACME" }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn blank_position_title_is_rejected() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .route("/organization/positions", web::post().to(create_position)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/organization/positions")
            .insert_header(auth_header(Role::Hr, None))
            .set_json(json!({ "department_id": 1, "title": "" }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
