use crate::{
    auth::{
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    error::{AppError, conflict_on_duplicate},
    model::role::Role,
    models::{Claims, LoginReqDto, RegisterReq, TokenPair, TokenType, UserSql},
    utils::{email_cache, email_filter},
};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// true  => email AVAILABLE
/// false => email TAKEN
pub async fn is_email_available(email: &str, pool: &MySqlPool) -> bool {
    let email = email_filter::normalize(email);

    // 1️⃣ Cuckoo filter: a miss is definitive
    if !email_filter::might_exist(&email) {
        return true;
    }

    // 2️⃣ Moka cache: a hit is definitive
    if email_cache::is_taken(&email).await {
        return false;
    }

    // 3️⃣ Database fallback
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ? LIMIT 1)",
    )
    .bind(&email)
    .fetch_one(pool)
    .await
    .unwrap_or(true); // fail-safe

    if exists {
        email_cache::mark_taken(&email).await;
        return false;
    }

    true
}

/// Stores a refresh token's `jti` so it can be rotated and revoked.
async fn store_refresh_token(pool: &MySqlPool, user_id: u64, claims: &Claims) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&claims.jti)
    .bind(claims.exp as i64)
    .execute(pool)
    .await?;
    Ok(())
}

fn issue_pair(subject: &TokenSubject, config: &Config) -> Result<(TokenPair, Claims), jsonwebtoken::errors::Error> {
    let access_token = generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl)?;
    Ok((
        TokenPair {
            access_token,
            refresh_token,
        },
        refresh_claims,
    ))
}

/// Self-service registration. New accounts get the EMPLOYEE role and are linked
/// to the live employee whose person record carries the same email, if any.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered", body = Object, example = json!({
            "message": "User registered successfully",
            "employee_linked": true
        })),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_register", skip(user, pool), fields(email = %user.email))]
pub async fn register(
    user: web::Json<RegisterReq>,
    pool: web::Data<MySqlPool>,
) -> Result<HttpResponse, AppError> {
    user.validate()?;
    let email = email_filter::normalize(&user.email);

    if !is_email_available(&email, pool.get_ref()).await {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let hashed = hash_password(&user.password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::BusinessRule("Could not register user".to_string())
    })?;

    let employee_id = sqlx::query_scalar::<_, u64>(
        r#"
        SELECT e.id
        FROM employees e
        JOIN persons p ON p.id = e.person_id
        WHERE p.email = ? AND e.is_deleted = FALSE
        LIMIT 1
        "#,
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?;

    sqlx::query(r#"INSERT INTO users (email, password, role_id, employee_id) VALUES (?, ?, ?, ?)"#)
        .bind(&email)
        .bind(hashed)
        .bind(Role::Employee.id())
        .bind(employee_id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| conflict_on_duplicate(e, "Email already registered"))?;

    email_filter::insert(&email);
    email_cache::mark_taken(&email).await;
    info!(linked = employee_id.is_some(), "User registered");

    Ok(HttpResponse::Created().json(json!({
        "message": "User registered successfully",
        "employee_linked": employee_id.is_some()
    })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Email or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(email = %user.email)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    info!("Login request received");

    // 1️⃣ Basic validation
    if user.email.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty email or password");
        return HttpResponse::BadRequest().body("Email or password required");
    }

    debug!("Fetching user from database");

    // 2️⃣ Fetch user
    let db_user = match sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, email, password, role_id, employee_id, is_active
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email_filter::normalize(&user.email))
    .fetch_optional(pool.get_ref())
    .await
    {
        Ok(Some(user)) if user.is_active => {
            debug!(user_id = user.id, "User found");
            user
        }
        Ok(Some(user)) => {
            info!(user_id = user.id, "Invalid credentials: user deactivated");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Ok(None) => {
            info!("Invalid credentials: user not found");
            return HttpResponse::Unauthorized().body("Invalid credentials");
        }
        Err(e) => {
            error!(error = %e, "Database error while fetching user");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // 3️⃣ Verify password
    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return HttpResponse::Unauthorized().body("Invalid credentials");
    }

    debug!("Password verified");

    // 4️⃣ Generate tokens
    let subject = TokenSubject {
        user_id: db_user.id,
        email: db_user.email.clone(),
        role: db_user.role_id,
        employee_id: db_user.employee_id,
    };

    let (pair, refresh_claims) = match issue_pair(&subject, &config) {
        Ok(issued) => issued,
        Err(e) => {
            error!(error = %e, "Failed to sign tokens");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // 5️⃣ Store refresh token
    debug!(user_id = db_user.id, jti = %refresh_claims.jti, "Storing refresh token");

    if let Err(e) = store_refresh_token(pool.get_ref(), db_user.id, &refresh_claims).await {
        error!(error = %e, "Failed to store refresh token");
        return HttpResponse::InternalServerError().finish();
    }

    // 6️⃣ Update last_login_at (non-fatal)
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        warn!(error = %e, "Failed to update last_login_at");
    }

    email_cache::mark_taken(&db_user.email).await;
    info!("Login successful");

    HttpResponse::Ok().json(pair)
}

const REVOKE_UNUSED_REFRESH: &str =
    "UPDATE refresh_tokens SET revoked = TRUE WHERE id = ? AND revoked = FALSE";

/// The request that revoked the token is the one allowed to mint a new pair.
fn won_rotation(rows_affected: u64) -> bool {
    rows_affected == 1
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Missing, invalid or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let Some(token) = bearer(&req) else {
        return Ok(HttpResponse::Unauthorized().body("No token"));
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return Ok(HttpResponse::Unauthorized().finish()),
    };

    // 🔍 refresh token must exist and be unrevoked
    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ?",
    )
    .bind(&claims.jti)
    .fetch_optional(pool.get_ref())
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => return Ok(HttpResponse::Unauthorized().finish()),
    };

    // the role or employee link may have changed since the last login
    let current = sqlx::query_as::<_, UserSql>(
        "SELECT id, email, password, role_id, employee_id, is_active FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(current) = current.filter(|u| u.is_active) else {
        return Ok(HttpResponse::Unauthorized().finish());
    };

    // 🔥 revoke old refresh token; only one concurrent caller can flip it
    let revoked = sqlx::query(REVOKE_UNUSED_REFRESH)
        .bind(record_id)
        .execute(pool.get_ref())
        .await?;
    if !won_rotation(revoked.rows_affected()) {
        warn!(user_id, "Refresh token already rotated");
        return Ok(HttpResponse::Unauthorized().finish());
    }

    let subject = TokenSubject {
        user_id: current.id,
        email: current.email,
        role: current.role_id,
        employee_id: current.employee_id,
    };

    let (pair, new_claims) = match issue_pair(&subject, &config) {
        Ok(issued) => issued,
        Err(e) => {
            error!(error = %e, "Failed to sign tokens");
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    store_refresh_token(pool.get_ref(), user_id, &new_claims).await?;

    Ok(HttpResponse::Ok().json(pair))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Refresh token revoked (idempotent)")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> impl Responder {
    let Some(token) = bearer(&req) else {
        return HttpResponse::NoContent().finish();
    };

    // only refresh tokens can logout
    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        warn!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lazy_pool, test_config};
    use actix_web::{App, http::StatusCode};
    use actix_web::test::{TestRequest, call_service, init_service, read_body_json};

    #[test]
    fn only_the_first_revocation_rotates() {
        assert!(REVOKE_UNUSED_REFRESH.ends_with("AND revoked = FALSE"));
        assert!(won_rotation(1));
        // the other request of a concurrent pair sees the row already revoked
        assert!(!won_rotation(0));
    }

    #[actix_web::test]
    async fn register_rejects_invalid_form_before_touching_db() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .route("/auth/register", web::post().to(register)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "email": "not-an-email", "password": "short" }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = read_body_json(resp).await;
        assert!(body["errors"]["email"].is_string());
        assert!(body["errors"]["password"].is_string());
    }

    #[actix_web::test]
    async fn logout_without_token_is_still_no_content() {
        let config = test_config();
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config))
                .route("/auth/logout", web::post().to(logout)),
        )
        .await;

        let resp =
            call_service(&app, TestRequest::post().uri("/auth/logout").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
