use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::model::role::Role;
use crate::models::TokenType;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data};
use futures::future::{Ready, ready};
use sqlx::MySqlPool;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,

    /// Present only if this user was linked to an employee record at login
    pub employee_id: Option<u64>,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // auth_middleware already decoded the token for protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(actix_web::error::ErrorInternalServerError(
                    "Config missing",
                )));
            }
        };

        let claims = match verify_token(token, &config.jwt_secret) {
            Ok(c) if c.token_type == TokenType::Access => c,
            _ => return ready(Err(ErrorUnauthorized("Invalid token"))),
        };

        let role = match Role::from_id(claims.role) {
            Some(r) => r,
            None => return ready(Err(ErrorUnauthorized("Invalid role"))),
        };

        ready(Ok(AuthUser {
            user_id: claims.user_id,
            email: claims.sub,
            role,
            employee_id: claims.employee_id,
        }))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin only".to_string()))
        }
    }

    pub fn require_hr_or_admin(&self) -> Result<(), AppError> {
        if self.role.is_hr_or_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("HR/Admin only".to_string()))
        }
    }

    /// Which employee a read should be scoped to.
    ///
    /// HR and Admin may ask for anyone (or everyone, with `None`); everybody else
    /// only ever sees their own linked record.
    pub fn scope_employee(&self, requested: Option<u64>) -> Result<Option<u64>, AppError> {
        if self.role.is_hr_or_admin() {
            return Ok(requested);
        }
        let own = self.employee_id.ok_or_else(AppError::no_employee_profile)?;
        match requested {
            Some(id) if id != own => Err(AppError::Forbidden(
                "Cannot view another employee's records".to_string(),
            )),
            _ => Ok(Some(own)),
        }
    }
}

/// Resolves the session's user to its linked employee through the `users` table,
/// so links changed after login take effect immediately.
pub async fn resolve_employee_id(auth: &AuthUser, pool: &MySqlPool) -> Result<u64, AppError> {
    let linked = sqlx::query_scalar::<_, Option<u64>>(
        r#"
        SELECT u.employee_id
        FROM users u
        JOIN employees e ON e.id = u.employee_id
        WHERE u.id = ? AND u.is_active = TRUE AND e.is_deleted = FALSE
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?;

    linked.flatten().ok_or_else(AppError::no_employee_profile)
}

/// Employee a per-employee read targets: the requested one when the caller may
/// see it, otherwise the caller's own linked record.
pub async fn target_employee(
    auth: &AuthUser,
    pool: &MySqlPool,
    requested: Option<u64>,
) -> Result<u64, AppError> {
    match auth.scope_employee(requested) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => resolve_employee_id(auth, pool).await,
        // token issued before the account was linked
        Err(AppError::Forbidden(_)) if requested.is_none() => resolve_employee_id(auth, pool).await,
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "someone@company.com".into(),
            role,
            employee_id,
        }
    }

    #[test]
    fn hr_can_scope_to_anyone_or_everyone() {
        let hr = user(Role::Hr, None);
        assert_eq!(hr.scope_employee(Some(9)).unwrap(), Some(9));
        assert_eq!(hr.scope_employee(None).unwrap(), None);
    }

    #[test]
    fn employee_is_pinned_to_own_record() {
        let emp = user(Role::Employee, Some(5));
        assert_eq!(emp.scope_employee(None).unwrap(), Some(5));
        assert_eq!(emp.scope_employee(Some(5)).unwrap(), Some(5));
        assert!(matches!(emp.scope_employee(Some(6)), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn unlinked_employee_has_no_scope() {
        let emp = user(Role::Employee, None);
        assert!(matches!(emp.scope_employee(None), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn role_guards() {
        assert!(user(Role::Admin, None).require_admin().is_ok());
        assert!(user(Role::Hr, None).require_admin().is_err());
        assert!(user(Role::Hr, None).require_hr_or_admin().is_ok());
        assert!(user(Role::Employee, Some(1)).require_hr_or_admin().is_err());
    }
}
