use crate::error::{AppError, FieldErrors};
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::MySqlPool;

/// SQL bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    Bool(bool),
    Date(NaiveDate),
    Null,
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Shape a partial-update value must have before it is bound.
#[derive(Clone, Copy)]
pub enum ColumnKind {
    /// Unsigned integer key
    Id,
    /// `YYYY-MM-DD`
    Date,
    /// Trimmed, non-empty, at most `max` characters
    Text { max: usize },
    /// String accepted by the predicate, e.g. a known status name
    Tag(fn(&str) -> bool),
}

/// Columns a partial update may touch, with whether NULL is accepted.
pub struct UpdatableColumn {
    pub name: &'static str,
    pub nullable: bool,
    pub kind: ColumnKind,
}

fn column_value(kind: ColumnKind, value: &Value) -> Result<SqlValue, String> {
    match (kind, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Id, v) => v
            .as_u64()
            .map(SqlValue::U64)
            .ok_or_else(|| "must be a non-negative integer id".to_string()),
        (ColumnKind::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| "must be a YYYY-MM-DD date".to_string()),
        (ColumnKind::Text { max }, Value::String(s)) => {
            let text = s.trim();
            if text.is_empty() || text.chars().count() > max {
                Err(format!("must be 1-{max} characters"))
            } else {
                Ok(SqlValue::String(text.to_string()))
            }
        }
        (ColumnKind::Tag(accepts), Value::String(s)) if accepts(s) => Ok(SqlValue::String(s.clone())),
        (ColumnKind::Tag(_), Value::String(_)) => Err("unknown value".to_string()),
        _ => Err("unsupported value type".to_string()),
    }
}

/// Build a dynamic `UPDATE table SET ... WHERE id_column = ? [AND extra_where]`
/// from a JSON object. Keys outside `allowed` are rejected, never interpolated.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[UpdatableColumn],
    id_column: &str,
    id_value: u64,
    extra_where: Option<&str>,
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::field("body", "Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(AppError::field("body", "No fields provided for update"));
    }

    let mut errors = FieldErrors::new();
    let mut columns = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let Some(column) = allowed.iter().find(|c| c.name == key.as_str()) else {
            errors.insert(key.clone(), "field cannot be updated".to_string());
            continue;
        };
        if value.is_null() && !column.nullable {
            errors.insert(key.clone(), "field cannot be null".to_string());
            continue;
        }
        match column_value(column.kind, value) {
            Ok(v) => {
                columns.push(format!("{} = ?", column.name));
                values.push(v);
            }
            Err(message) => {
                errors.insert(key.clone(), message);
            }
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        columns.join(", "),
        id_column
    );
    if let Some(extra) = extra_where {
        sql.push_str(" AND ");
        sql.push_str(extra);
    }

    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// Binds a sequence of `SqlValue`s, in order, onto any sqlx query builder
/// (`query`, `query_as`, `query_scalar`).
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::utils::db_utils::SqlValue::String(v) => query.bind(v),
                $crate::utils::db_utils::SqlValue::U64(v) => query.bind(v),
                $crate::utils::db_utils::SqlValue::Bool(v) => query.bind(v),
                $crate::utils::db_utils::SqlValue::Date(v) => query.bind(v),
                $crate::utils::db_utils::SqlValue::Null => query.bind(None::<String>),
            };
        }
        query
    }};
}
pub(crate) use bind_values;

pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let query = bind_values!(sqlx::query(&update.sql), update.values);
    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn is_known_status(s: &str) -> bool {
        matches!(s, "ACTIVE" | "RESIGNED")
    }

    const COLUMNS: [UpdatableColumn; 4] = [
        UpdatableColumn { name: "status", nullable: false, kind: ColumnKind::Tag(is_known_status) },
        UpdatableColumn { name: "hire_date", nullable: false, kind: ColumnKind::Date },
        UpdatableColumn { name: "position_id", nullable: true, kind: ColumnKind::Id },
        UpdatableColumn { name: "employee_code", nullable: false, kind: ColumnKind::Text { max: 30 } },
    ];

    #[test]
    fn builds_set_clause_and_binds_id_last() {
        let payload = json!({ "hire_date": "2026-01-05", "position_id": null });
        let update =
            build_update_sql("employees", &payload, &COLUMNS, "id", 9, Some("is_deleted = FALSE"))
                .unwrap();

        assert_eq!(
            update.sql,
            "UPDATE employees SET hire_date = ?, position_id = ? WHERE id = ? AND is_deleted = FALSE"
        );
        assert_eq!(
            update.values,
            vec![
                SqlValue::Date(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()),
                SqlValue::Null,
                SqlValue::U64(9),
            ]
        );
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let payload = json!({ "status": "ACTIVE", "is_deleted": false, "id = 1; --": 1 });
        match build_update_sql("employees", &payload, &COLUMNS, "id", 1, None) {
            Err(AppError::Validation(errors)) => {
                assert!(errors.contains_key("is_deleted"));
                assert!(errors.contains_key("id = 1; --"));
                assert!(!errors.contains_key("status"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn null_on_required_column_is_rejected() {
        let payload = json!({ "status": null });
        assert!(matches!(
            build_update_sql("employees", &payload, &COLUMNS, "id", 1, None),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn empty_or_non_object_payload_is_rejected() {
        assert!(build_update_sql("employees", &json!({}), &COLUMNS, "id", 1, None).is_err());
        assert!(build_update_sql("employees", &json!([1, 2]), &COLUMNS, "id", 1, None).is_err());
    }

    #[test]
    fn values_of_the_wrong_shape_are_rejected() {
        let payload = json!({
            "status": 7,
            "employee_code": "  ",
            "hire_date": "05/01/2026",
            "position_id": "three"
        });
        match build_update_sql("employees", &payload, &COLUMNS, "id", 1, None) {
            Err(AppError::Validation(errors)) => {
                for key in ["status", "employee_code", "hire_date", "position_id"] {
                    assert!(errors.contains_key(key), "{key} should be rejected");
                }
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected_and_text_is_trimmed() {
        assert!(build_update_sql("employees", &json!({ "status": "RETIRED" }), &COLUMNS, "id", 1, None).is_err());

        let update =
            build_update_sql("employees", &json!({ "employee_code": " EMP-9 " }), &COLUMNS, "id", 1, None)
                .unwrap();
        assert_eq!(update.values[0], SqlValue::String("EMP-9".into()));
    }
}
