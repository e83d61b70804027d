//! # Companies API
//!
//! ## Endpoints
//!
//! - `GET /api/companies`: list with search, sort, and filters
//! - `POST /api/companies`: create
//! - `GET /api/companies/:id`: get, with contact and deal counts
//! - `PATCH /api/companies/:id`: partial update
//! - `DELETE /api/companies/:id`: delete

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use crm_backend_client::Query as RowQuery;
use crm_core::{Action, Company, CompanyForm, CompanySize, EntityKind, Permission, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_object, extract_query};
use crate::routes::crud::{self, filter_eq, DeleteResponse, ListParams};
use crate::state::AppState;

const WHAT: &str = "Company";

fn permission(action: Action) -> Permission {
    Permission::for_entity(EntityKind::Company, action)
}

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CompanyFilter {
    /// Exact industry name.
    pub industry: Option<String>,
    pub size: Option<CompanySize>,
}

/// A company with the number of records attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompanyDetail {
    #[serde(flatten)]
    pub company: Company,
    pub contact_count: u64,
    pub deal_count: u64,
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/:id",
            get(get_company).patch(update_company).delete(delete_company),
        )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/companies: List companies.
#[utoipa::path(
    get,
    path = "/api/companies",
    params(ListParams, CompanyFilter),
    responses(
        (status = 200, description = "Companies", body = Vec<Company>),
        (status = 400, description = "Bad list parameters", body = crate::error::ErrorBody),
        (status = 403, description = "Missing companies.view", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
async fn list_companies(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
    filter: Result<Query<CompanyFilter>, QueryRejection>,
) -> Result<Json<Vec<Company>>, AppError> {
    caller.require(permission(Action::View))?;
    let params = extract_query(params)?;
    let filter = extract_query(filter)?;

    let mut query = params.to_query(Table::Companies)?;
    query = filter_eq(query, "industry", filter.industry.filter(|i| !i.trim().is_empty()));
    query = filter_eq(query, "size", filter.size);

    Ok(Json(state.repo().select::<Company>(&query).await?))
}

/// POST /api/companies: Create a company.
#[utoipa::path(
    post,
    path = "/api/companies",
    request_body = CompanyForm,
    responses(
        (status = 201, description = "Company created", body = Company),
        (status = 400, description = "Malformed body", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
async fn create_company(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Company>), AppError> {
    caller.require(permission(Action::Create))?;
    let form: CompanyForm = crud::parse_create(extract_object(body)?)?;
    let company = crud::insert_form(state.repo(), &form, caller.id()).await?;
    tracing::info!(company_id = %company.id, "company created");
    Ok((axum::http::StatusCode::CREATED, Json(company)))
}

/// GET /api/companies/:id: Get a company.
#[utoipa::path(
    get,
    path = "/api/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company found", body = CompanyDetail),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
async fn get_company(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<CompanyDetail>, AppError> {
    caller.require(permission(Action::View))?;
    let repo = state.repo();
    let company = crud::find_or_404::<Company>(repo, id, WHAT).await?;
    let by_company = RowQuery::new().eq("company_id", id.to_string());
    let contact_count = repo.count(Table::Contacts, &by_company).await?;
    let deal_count = repo.count(Table::Deals, &by_company).await?;
    Ok(Json(CompanyDetail {
        company,
        contact_count,
        deal_count,
    }))
}

/// PATCH /api/companies/:id: Update a company.
#[utoipa::path(
    patch,
    path = "/api/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    request_body = CompanyForm,
    responses(
        (status = 200, description = "Company updated", body = Company),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
async fn update_company(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Company>, AppError> {
    caller.require(permission(Action::Edit))?;
    let patch = extract_object(body)?;
    let repo = state.repo();
    let (_, form) = crud::load_merged::<CompanyForm>(repo, id, &patch, WHAT).await?;
    let company = crud::write_columns(repo, id, crud::form_columns(&form)?, WHAT).await?;
    Ok(Json(company))
}

/// DELETE /api/companies/:id: Delete a company.
#[utoipa::path(
    delete,
    path = "/api/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company deleted", body = DeleteResponse),
        (status = 404, description = "Company not found", body = crate::error::ErrorBody),
    ),
    tag = "companies"
)]
async fn delete_company(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    caller.require(permission(Action::Delete))?;
    let deleted = crud::delete_or_404(state.repo(), Table::Companies, id, WHAT).await?;
    tracing::info!(company_id = %id, "company deleted");
    Ok(Json(deleted))
}
