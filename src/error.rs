use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;
use validator::ValidationErrors;

/// Field name -> first message for that field.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Display)]
pub enum AppError {
    #[display(fmt = "validation failed")]
    Validation(FieldErrors),

    /// Request is well formed but breaks a business rule (budget exceeded, wrong state, ...)
    #[display(fmt = "{}", _0)]
    BusinessRule(String),

    #[display(fmt = "{}", _0)]
    NotFound(String),

    #[display(fmt = "{}", _0)]
    Forbidden(String),

    #[display(fmt = "{}", _0)]
    Conflict(String),

    #[display(fmt = "database error: {}", _0)]
    Database(sqlx::Error),
}

impl AppError {
    pub fn field(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), message.to_string());
        AppError::Validation(errors)
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn no_employee_profile() -> Self {
        AppError::Forbidden("No employee profile linked to this account".to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .map(|e| match &e.message {
                        Some(m) => m.to_string(),
                        None => e.code.to_string(),
                    })
                    .unwrap_or_else(|| "invalid".to_string());
                (field.to_string(), message)
            })
            .collect();
        AppError::Validation(fields)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation(fields) => json!({ "success": false, "errors": fields }),
            AppError::Database(e) => {
                error!(error = %e, "Database error");
                json!({ "success": false, "error": "Internal Server Error" })
            }
            other => json!({ "success": false, "error": other.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Maps a MySQL duplicate-key failure to `Conflict`, anything else to `Database`.
pub fn conflict_on_duplicate(e: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23000") {
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::Database(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use validator::Validate;

    #[derive(Validate)]
    struct Form {
        #[validate(email(message = "must be a valid email"))]
        email: String,
    }

    #[actix_web::test]
    async fn validation_errors_render_field_map() {
        let form = Form { email: "nope".into() };
        let err: AppError = form.validate().unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"]["email"], "must be a valid email");
    }

    #[actix_web::test]
    async fn business_rule_carries_message() {
        let err = AppError::BusinessRule("Claim exceeds remaining budget".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Claim exceeds remaining budget");
    }

    #[test]
    fn row_not_found_is_a_database_error_not_a_conflict() {
        let err = conflict_on_duplicate(sqlx::Error::RowNotFound, "dup");
        assert!(matches!(err, AppError::Database(_)));
    }
}
