//! Direct Postgres table backend.
//!
//! Rows cross the boundary as JSON: reads return `to_jsonb(t)` (or a
//! `jsonb_build_object` of the selected columns) and writes go through
//! `jsonb_populate_record`, so one code path serves all six tables and the
//! column types stay the schema's business. Filters compare `to_jsonb`
//! of the column against a bound JSON value.
//!
//! Table names come from [`Table`]; every column name is checked against
//! [`validate_ident`] before it is spliced into SQL. Values are always
//! bound parameters.

use async_trait::async_trait;
use crm_backend_client::{Filter, Order, Query};
use crm_core::Table;
use serde_json::Value;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row};

use super::{StoreError, TableBackend};

/// [`TableBackend`] over a `sqlx` Postgres pool.
#[derive(Debug, Clone)]
pub struct PgTables {
    pool: PgPool,
}

impl PgTables {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_rows(
        &self,
        mut qb: QueryBuilder<'static, Postgres>,
    ) -> Result<Vec<Value>, StoreError> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| -> Result<Value, StoreError> { Ok(r.try_get::<Json<Value>, _>(0)?.0) })
            .collect()
    }
}

/// Accept lowercase snake_case identifiers only.
pub fn validate_ident(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = name.len() <= 63
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Escape LIKE metacharacters so `needle` matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) -> Result<(), StoreError> {
    match filter {
        Filter::Eq(c, Value::Null) => {
            qb.push(format!("t.\"{}\" IS NULL", validate_ident(c)?));
        }
        Filter::Eq(c, v) => {
            qb.push(format!("to_jsonb(t.\"{}\") = ", validate_ident(c)?));
            qb.push_bind(Json(v.clone()));
        }
        Filter::Contains(c, needle) => {
            qb.push(format!("t.\"{}\"::text ILIKE ", validate_ident(c)?));
            qb.push_bind(like_pattern(needle));
        }
        Filter::In(c, values) => {
            let c = validate_ident(c)?;
            if values.is_empty() {
                qb.push("FALSE");
                return Ok(());
            }
            qb.push(format!("to_jsonb(t.\"{c}\") IN ("));
            let mut list = qb.separated(", ");
            for v in values {
                list.push_bind(Json(v.clone()));
            }
            qb.push(")");
        }
        Filter::Gte(c, v) => {
            qb.push(format!("to_jsonb(t.\"{}\") >= ", validate_ident(c)?));
            qb.push_bind(Json(v.clone()));
        }
        Filter::Lt(c, v) => {
            qb.push(format!("to_jsonb(t.\"{}\") < ", validate_ident(c)?));
            qb.push_bind(Json(v.clone()));
        }
        Filter::Or(inner) => {
            if inner.is_empty() {
                qb.push("FALSE");
                return Ok(());
            }
            qb.push("(");
            for (i, f) in inner.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_filter(qb, f)?;
            }
            qb.push(")");
        }
    }
    Ok(())
}

fn push_where(qb: &mut QueryBuilder<'static, Postgres>, query: &Query) -> Result<(), StoreError> {
    for (i, f) in query.filters().iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        push_filter(qb, f)?;
    }
    Ok(())
}

fn projection(query: &Query) -> Result<String, StoreError> {
    let Some(columns) = query.columns() else {
        return Ok("to_jsonb(t)".into());
    };
    let pairs = columns
        .iter()
        .map(|c| validate_ident(c).map(|c| format!("'{c}', t.\"{c}\"")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("jsonb_build_object({})", pairs.join(", ")))
}

pub(crate) fn select_sql(table: Table, query: &Query) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {table} AS t", projection(query)?));
    push_where(&mut qb, query)?;
    if let Some((column, order)) = query.ordering() {
        let direction = match order {
            Order::Asc => "ASC NULLS LAST",
            Order::Desc => "DESC NULLS FIRST",
        };
        qb.push(format!(" ORDER BY t.\"{}\" {direction}", validate_ident(column)?));
    }
    if let Some(n) = query.row_limit() {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(n).unwrap_or(i64::MAX));
    }
    Ok(qb)
}

fn object_columns(row: &Value) -> Result<Vec<&str>, StoreError> {
    let Some(obj) = row.as_object() else {
        return Err(StoreError::Rejected("row must be a JSON object".into()));
    };
    obj.keys().map(|k| validate_ident(k)).collect()
}

pub(crate) fn insert_sql(table: Table, row: &Value) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let columns = object_columns(row)?
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
    ));
    qb.push_bind(Json(row.clone()));
    qb.push(") RETURNING to_jsonb(t)");
    Ok(qb)
}

pub(crate) fn update_sql(
    table: Table,
    query: &Query,
    patch: &Value,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let assignments = object_columns(patch)?
        .iter()
        .map(|c| format!("\"{c}\" = r.\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let mut qb = QueryBuilder::new(format!(
        "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, "
    ));
    qb.push_bind(Json(patch.clone()));
    qb.push(") AS r");
    push_where(&mut qb, query)?;
    qb.push(" RETURNING to_jsonb(t)");
    Ok(qb)
}

pub(crate) fn delete_sql(table: Table, query: &Query) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {table} AS t"));
    push_where(&mut qb, query)?;
    qb.push(" RETURNING to_jsonb(t)");
    Ok(qb)
}

pub(crate) fn count_sql(table: Table, query: &Query) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} AS t"));
    push_where(&mut qb, query)?;
    Ok(qb)
}

#[async_trait]
impl TableBackend for PgTables {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.fetch_rows(select_sql(table, query)?).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        self.fetch_rows(insert_sql(table, &row)?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Rejected(format!("insert into {table} returned no row")))
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        if patch.as_object().is_some_and(|o| o.is_empty()) {
            return self.select(table, query).await;
        }
        self.fetch_rows(update_sql(table, query, &patch)?).await
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.fetch_rows(delete_sql(table, query)?).await
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64, StoreError> {
        let mut qb = count_sql(table, query)?;
        let n: i64 = qb.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_renders_filters_order_and_limit() {
        let query = Query::new()
            .eq("status", "lead")
            .search(&["first_name", "email"], "ada")
            .order_by("created_at", Order::Desc)
            .limit(10);
        let qb = select_sql(Table::Contacts, &query).unwrap();
        assert_eq!(
            qb.sql(),
            "SELECT to_jsonb(t) FROM contacts AS t WHERE to_jsonb(t.\"status\") = $1 \
             AND (t.\"first_name\"::text ILIKE $2 OR t.\"email\"::text ILIKE $3) \
             ORDER BY t.\"created_at\" DESC NULLS FIRST LIMIT $4"
        );
    }

    #[test]
    fn select_projects_named_columns() {
        let query = Query::new().select("id,user_type,role").eq("id", "x");
        let qb = select_sql(Table::Profiles, &query).unwrap();
        assert!(qb.sql().starts_with(
            "SELECT jsonb_build_object('id', t.\"id\", 'user_type', t.\"user_type\", 'role', t.\"role\") FROM profiles"
        ));
    }

    #[test]
    fn null_eq_and_empty_in() {
        let query = Query::new()
            .eq("role", Value::Null)
            .in_list("id", Vec::<String>::new());
        let qb = select_sql(Table::Profiles, &query).unwrap();
        assert!(qb.sql().ends_with("WHERE t.\"role\" IS NULL AND FALSE"));
    }

    #[test]
    fn insert_lists_only_given_columns() {
        let qb = insert_sql(Table::Companies, &json!({"name": "Acme", "size": "1-10"})).unwrap();
        assert_eq!(
            qb.sql(),
            "INSERT INTO companies AS t (\"name\", \"size\") SELECT \"name\", \"size\" \
             FROM jsonb_populate_record(NULL::companies, $1) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn update_binds_patch_before_filters() {
        let id = uuid::Uuid::nil();
        let qb = update_sql(Table::Deals, &Query::by_id(id), &json!({"stage": "won"})).unwrap();
        assert_eq!(
            qb.sql(),
            "UPDATE deals AS t SET \"stage\" = r.\"stage\" FROM jsonb_populate_record(NULL::deals, $1) AS r \
             WHERE to_jsonb(t.\"id\") = $2 RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn hostile_column_names_rejected() {
        let query = Query::new().eq("id; DROP TABLE profiles", "x");
        assert!(matches!(
            select_sql(Table::Profiles, &query),
            Err(StoreError::InvalidIdentifier(_))
        ));
        assert!(insert_sql(Table::Tasks, &json!({"Title": "x"})).is_err());
        assert!(validate_ident("related_to_id").is_ok());
        assert!(validate_ident("").is_err());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
