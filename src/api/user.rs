use crate::{
    api::page_window,
    auth::auth::AuthUser,
    error::{AppError, conflict_on_duplicate},
    model::{role::Role, user::UserSummary},
    utils::{
        db_utils::{SqlValue, bind_values},
        email_cache, email_filter,
    },
};
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

const USER_SELECT: &str = r#"
    SELECT id, email, role_id, employee_id, is_active, last_login_at
    FROM users
"#;

#[derive(Deserialize, IntoParams)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<UserSummary>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangeRole {
    pub role: Role,
}

#[derive(Deserialize, ToSchema)]
pub struct LinkEmployee {
    /// `null` unlinks the account
    pub employee_id: Option<u64>,
}

#[derive(Deserialize, ToSchema)]
pub struct SetActive {
    pub is_active: bool,
}

fn user_not_found(rows_affected: u64) -> Result<(), AppError> {
    if rows_affected == 0 {
        Err(AppError::not_found("User"))
    } else {
        Ok(())
    }
}

/// Login accounts (Admin)
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated users", body = UserListResponse),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let (page, per_page, offset) = page_window(query.page, query.per_page, 20);

    let mut where_sql = String::from(" WHERE 1=1");
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(role) = query.role {
        where_sql.push_str(" AND role_id = ?");
        args.push(SqlValue::U64(u64::from(role.id())));
    }
    if let Some(active) = query.is_active {
        where_sql.push_str(" AND is_active = ?");
        args.push(SqlValue::Bool(active));
    }

    let count_sql = format!("SELECT COUNT(*) FROM users{}", where_sql);
    let total = bind_values!(sqlx::query_scalar::<_, i64>(&count_sql), args.iter().cloned())
        .fetch_one(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    let data_sql = format!("{}{} ORDER BY id LIMIT ? OFFSET ?", USER_SELECT, where_sql);
    let users = bind_values!(sqlx::query_as::<_, UserSummary>(&data_sql), args)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(UserListResponse {
        data: users,
        page,
        per_page,
        total,
    }))
}

/// Change a user's role (Admin). Takes effect at the user's next login or refresh.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/role",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body = ChangeRole,
    responses(
        (status = 200, description = "Role changed"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Admins cannot demote themselves")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn change_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ChangeRole>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id && payload.role != Role::Admin {
        return Err(AppError::BusinessRule("Admins cannot demote themselves".to_string()).into());
    }

    let result = sqlx::query("UPDATE users SET role_id = ? WHERE id = ?")
        .bind(payload.role.id())
        .bind(user_id)
        .execute(pool.get_ref())
        .await
        .map_err(AppError::from)?;
    user_not_found(result.rows_affected())?;

    info!(user_id, role = %payload.role, by = auth.user_id, "User role changed");
    Ok(HttpResponse::Ok().json(json!({ "message": "Role changed" })))
}

/// Link a user to an employee record, or unlink it (Admin)
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/employee",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body = LinkEmployee,
    responses(
        (status = 200, description = "Link updated"),
        (status = 400, description = "Unknown or deleted employee"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Employee already linked to another user")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn link_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<LinkEmployee>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if let Some(employee_id) = payload.employee_id {
        let live = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ? AND is_deleted = FALSE)",
        )
        .bind(employee_id)
        .fetch_one(pool.get_ref())
        .await
        .map_err(AppError::from)?;
        if !live {
            return Err(AppError::field("employee_id", "unknown or deleted employee").into());
        }

        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE employee_id = ? AND id <> ?)",
        )
        .bind(employee_id)
        .bind(user_id)
        .fetch_one(pool.get_ref())
        .await
        .map_err(AppError::from)?;
        if taken {
            return Err(AppError::Conflict("Employee already linked to another user".to_string()).into());
        }
    }

    let result = sqlx::query("UPDATE users SET employee_id = ? WHERE id = ?")
        .bind(payload.employee_id)
        .bind(user_id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| conflict_on_duplicate(e, "Employee already linked to another user"))?;
    user_not_found(result.rows_affected())?;

    info!(user_id, employee_id = ?payload.employee_id, "User employee link updated");
    Ok(HttpResponse::Ok().json(json!({ "message": "Link updated" })))
}

/// Activate or deactivate a login (Admin). Deactivation also revokes refresh tokens.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/active",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body = SetActive,
    responses(
        (status = 200, description = "Status changed"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Admins cannot deactivate themselves")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn set_active(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<SetActive>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id && !payload.is_active {
        return Err(AppError::BusinessRule("Admins cannot deactivate themselves".to_string()).into());
    }

    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
        .bind(payload.is_active)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    user_not_found(result.rows_affected())?;

    if !payload.is_active {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;
    }

    tx.commit().await.map_err(AppError::from)?;

    info!(user_id, is_active = payload.is_active, by = auth.user_id, "User status changed");
    Ok(HttpResponse::Ok().json(json!({ "message": "Status changed" })))
}

/// Remove a login for good (Admin); its email becomes available again
#[utoipa::path(
    delete,
    path = "/api/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Admins cannot delete themselves")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        return Err(AppError::BusinessRule("Admins cannot delete themselves".to_string()).into());
    }

    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let email = sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = ? FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("User"))?;

    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    email_filter::remove(&email);
    email_cache::forget(&email).await;

    warn!(user_id, by = auth.user_id, "User deleted");
    Ok(HttpResponse::NoContent().finish())
}
