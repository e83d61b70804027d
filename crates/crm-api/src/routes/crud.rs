//! # Shared CRUD Plumbing
//!
//! List parameters, form-to-row conversion, patch merging, and the
//! status-change activity log used by the four entity route modules.

use crm_backend_client::{Order, Query};
use crm_core::{
    merge_patch, parse_form, ActivityType, EntityForm, Profile, Record, RelatedToType, Table,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::AppError;
use crate::repo::Repo;
use crate::routes::activities::{self, NewActivity};

/// Largest page a list endpoint returns.
pub const MAX_LIST_LIMIT: usize = 500;

// ── List parameters ─────────────────────────────────────────────────────────

/// Search, sort, and paging parameters shared by every list endpoint.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Case-insensitive substring matched against the entity's text columns.
    pub search: Option<String>,
    /// Column to order by. Defaults to `created_at`.
    pub sort: Option<String>,
    /// `asc` or `desc` (default).
    pub order: Option<String>,
    /// Page size, at most 500.
    pub limit: Option<usize>,
}

impl ListParams {
    /// Build the base query for `table`, rejecting unknown sort columns and
    /// directions.
    pub fn to_query(&self, table: Table) -> Result<Query, AppError> {
        let sort = match self.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => "created_at",
            Some(column) => table
                .sort_columns()
                .iter()
                .copied()
                .find(|c| *c == column)
                .ok_or_else(|| AppError::BadRequest(format!("cannot sort {table} by '{column}'")))?,
        };
        let order = match self.order.as_deref().map(str::trim) {
            None | Some("") | Some("desc") => Order::Desc,
            Some("asc") => Order::Asc,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "order must be 'asc' or 'desc', got '{other}'"
                )))
            }
        };
        let limit = self.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

        let mut query = Query::new().order_by(sort, order).limit(limit);
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.search(table.search_columns(), needle);
        }
        Ok(query)
    }
}

/// Add `column = value` when a filter parameter is present.
pub fn filter_eq(query: Query, column: &str, value: Option<impl ToString>) -> Query {
    match value {
        Some(v) => query.eq(column, v.to_string()),
        None => query,
    }
}

// ── Responses ───────────────────────────────────────────────────────────────

/// Body returned by every DELETE endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

impl DeleteResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Author shown next to activities and messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreatorRef {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
}

impl From<&Profile> for CreatorRef {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id,
            full_name: p.full_name.clone(),
            email: p.email.clone(),
        }
    }
}

// ── Forms ───────────────────────────────────────────────────────────────────

/// Serialize a validated form into the column map it writes.
pub fn form_columns<F: EntityForm>(form: &F) -> Result<Map<String, Value>, AppError> {
    match serde_json::to_value(form) {
        Ok(Value::Object(columns)) => Ok(columns),
        Ok(_) => Err(AppError::Internal("form did not serialize to an object".into())),
        Err(e) => Err(AppError::Internal(format!("form serialization failed: {e}"))),
    }
}

/// Validate a create body into its form.
pub fn parse_create<F: EntityForm>(body: Value) -> Result<F, AppError> {
    Ok(parse_form::<F>(body)?)
}

/// Insert a validated form tagged with its creator.
pub async fn insert_form<F: EntityForm>(
    repo: Repo<'_>,
    form: &F,
    created_by: Uuid,
) -> Result<F::Record, AppError> {
    let mut row = form_columns(form)?;
    row.insert("created_by".into(), Value::String(created_by.to_string()));
    Ok(repo.insert::<F::Record>(Value::Object(row)).await?)
}

/// Load the stored record and lay `patch` over it. Returns the record as
/// it was and the merged, validated form.
pub async fn load_merged<F: EntityForm>(
    repo: Repo<'_>,
    id: Uuid,
    patch: &Value,
    what: &str,
) -> Result<(F::Record, F), AppError> {
    let current = find_or_404::<F::Record>(repo, id, what).await?;
    let form = merge_patch::<F>(&current, patch)?;
    Ok((current, form))
}

/// Write `columns` to the record with `id`.
pub async fn write_columns<T: Record>(
    repo: Repo<'_>,
    id: Uuid,
    columns: Map<String, Value>,
    what: &str,
) -> Result<T, AppError> {
    repo.update::<T>(id, Value::Object(columns))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{what} not found")))
}

pub async fn find_or_404<T: Record>(repo: Repo<'_>, id: Uuid, what: &str) -> Result<T, AppError> {
    repo.find::<T>(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{what} not found")))
}

/// Delete the row with `id`, 404 when there was none.
pub async fn delete_or_404(
    repo: Repo<'_>,
    table: Table,
    id: Uuid,
    what: &str,
) -> Result<DeleteResponse, AppError> {
    if repo.delete(table, id).await? {
        Ok(DeleteResponse::ok())
    } else {
        Err(AppError::NotFound(format!("{what} not found")))
    }
}

// ── Status changes ──────────────────────────────────────────────────────────

/// Record a `status_change` activity for a record whose status moved from
/// `from` to `to`. A failed write is logged and does not fail the request.
pub async fn log_status_change(
    repo: Repo<'_>,
    related_to_type: RelatedToType,
    related_to_id: Uuid,
    subject: &str,
    from: &str,
    to: &str,
    actor: Uuid,
) {
    let entry = NewActivity {
        activity_type: ActivityType::StatusChange,
        title: format!("{subject} moved to {to}"),
        description: Some(format!("Status changed from {from} to {to}")),
        related_to_type: Some(related_to_type),
        related_to_id: Some(related_to_id),
    };
    if let Err(e) = activities::record(repo, &entry, actor).await {
        tracing::warn!(
            related_to_type = %related_to_type,
            related_to_id = %related_to_id,
            error = %e,
            "failed to record status change activity"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_backend_client::Filter;

    fn params(sort: Option<&str>, order: Option<&str>, limit: Option<usize>) -> ListParams {
        ListParams {
            search: None,
            sort: sort.map(String::from),
            order: order.map(String::from),
            limit,
        }
    }

    #[test]
    fn defaults_to_newest_first_capped() {
        let query = ListParams::default().to_query(Table::Contacts).unwrap();
        assert_eq!(query.ordering(), Some(("created_at", Order::Desc)));
        assert_eq!(query.row_limit(), Some(MAX_LIST_LIMIT));
    }

    #[test]
    fn limit_is_clamped() {
        let query = params(None, None, Some(10_000)).to_query(Table::Deals).unwrap();
        assert_eq!(query.row_limit(), Some(MAX_LIST_LIMIT));
        let query = params(None, None, Some(0)).to_query(Table::Deals).unwrap();
        assert_eq!(query.row_limit(), Some(1));
    }

    #[test]
    fn unknown_sort_column_rejected() {
        let err = params(Some("password"), None, None)
            .to_query(Table::Contacts)
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn bad_order_rejected() {
        assert!(params(Some("value"), Some("up"), None).to_query(Table::Deals).is_err());
        let query = params(Some("value"), Some("asc"), None).to_query(Table::Deals).unwrap();
        assert_eq!(query.ordering(), Some(("value", Order::Asc)));
    }

    #[test]
    fn search_spans_entity_columns() {
        let query = ListParams {
            search: Some("acme".into()),
            ..Default::default()
        }
        .to_query(Table::Companies)
        .unwrap();
        let Some(Filter::Or(inner)) = query.filters().first() else {
            panic!("expected a disjunction, got {:?}", query.filters());
        };
        assert_eq!(inner.len(), Table::Companies.search_columns().len());
    }

    #[test]
    fn blank_search_adds_no_filter() {
        let query = ListParams {
            search: Some("   ".into()),
            ..Default::default()
        }
        .to_query(Table::Tasks)
        .unwrap();
        assert!(query.filters().is_empty());
    }
}
