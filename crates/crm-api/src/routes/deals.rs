//! # Deals API
//!
//! ## Endpoints
//!
//! - `GET /api/deals`: list with search, sort, and filters
//! - `POST /api/deals`: create; the owner defaults to the caller
//! - `GET /api/deals/:id`: get, with company and contact
//! - `PATCH /api/deals/:id`: partial update; stage moves are logged
//! - `DELETE /api/deals/:id`: delete

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use crm_core::{
    Action, Company, CompanyRef, Contact, ContactRef, Deal, DealForm, DealStage, EntityKind,
    Permission, RelatedToType, Table,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_object, extract_query};
use crate::repo::Repo;
use crate::routes::crud::{self, filter_eq, DeleteResponse, ListParams};
use crate::state::AppState;

const WHAT: &str = "Deal";

fn permission(action: Action) -> Permission {
    Permission::for_entity(EntityKind::Deal, action)
}

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DealFilter {
    pub stage: Option<DealStage>,
    pub company_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

/// A deal with its company and contact.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DealView {
    #[serde(flatten)]
    pub deal: Deal,
    pub company: Option<CompanyRef>,
    pub contact: Option<ContactRef>,
}

/// Attach company and contact summaries, two queries for the whole list.
pub async fn with_parties(repo: Repo<'_>, deals: Vec<Deal>) -> Result<Vec<DealView>, AppError> {
    let companies = repo
        .refs::<Company, CompanyRef>(deals.iter().filter_map(|d| d.company_id))
        .await?;
    let contacts = repo
        .refs::<Contact, ContactRef>(deals.iter().filter_map(|d| d.contact_id))
        .await?;
    Ok(deals
        .into_iter()
        .map(|deal| DealView {
            company: deal.company_id.and_then(|id| companies.get(&id).cloned()),
            contact: deal.contact_id.and_then(|id| contacts.get(&id).cloned()),
            deal,
        })
        .collect())
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/deals", get(list_deals).post(create_deal))
        .route(
            "/api/deals/:id",
            get(get_deal).patch(update_deal).delete(delete_deal),
        )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/deals: List deals.
#[utoipa::path(
    get,
    path = "/api/deals",
    params(ListParams, DealFilter),
    responses(
        (status = 200, description = "Deals with company and contact", body = Vec<DealView>),
        (status = 400, description = "Bad list parameters", body = crate::error::ErrorBody),
        (status = 403, description = "Missing deals.view", body = crate::error::ErrorBody),
    ),
    tag = "deals"
)]
async fn list_deals(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
    filter: Result<Query<DealFilter>, QueryRejection>,
) -> Result<Json<Vec<DealView>>, AppError> {
    caller.require(permission(Action::View))?;
    let params = extract_query(params)?;
    let filter = extract_query(filter)?;

    let mut query = params.to_query(Table::Deals)?;
    query = filter_eq(query, "stage", filter.stage);
    query = filter_eq(query, "company_id", filter.company_id);
    query = filter_eq(query, "contact_id", filter.contact_id);
    query = filter_eq(query, "owner_id", filter.owner_id);

    let repo = state.repo();
    let deals = repo.select::<Deal>(&query).await?;
    Ok(Json(with_parties(repo, deals).await?))
}

/// POST /api/deals: Create a deal.
#[utoipa::path(
    post,
    path = "/api/deals",
    request_body = DealForm,
    responses(
        (status = 201, description = "Deal created", body = Deal),
        (status = 400, description = "Malformed body", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "deals"
)]
async fn create_deal(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Deal>), AppError> {
    caller.require(permission(Action::Create))?;
    let mut form: DealForm = crud::parse_create(extract_object(body)?)?;
    form.owner_id.get_or_insert(caller.id());
    let deal = crud::insert_form(state.repo(), &form, caller.id()).await?;
    tracing::info!(deal_id = %deal.id, stage = %deal.stage, "deal created");
    Ok((axum::http::StatusCode::CREATED, Json(deal)))
}

/// GET /api/deals/:id: Get a deal.
#[utoipa::path(
    get,
    path = "/api/deals/{id}",
    params(("id" = Uuid, Path, description = "Deal ID")),
    responses(
        (status = 200, description = "Deal found", body = DealView),
        (status = 404, description = "Deal not found", body = crate::error::ErrorBody),
    ),
    tag = "deals"
)]
async fn get_deal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DealView>, AppError> {
    caller.require(permission(Action::View))?;
    let repo = state.repo();
    let deal = crud::find_or_404::<Deal>(repo, id, WHAT).await?;
    let company = repo.one_ref::<Company, CompanyRef>(deal.company_id).await?;
    let contact = repo.one_ref::<Contact, ContactRef>(deal.contact_id).await?;
    Ok(Json(DealView {
        deal,
        company,
        contact,
    }))
}

/// PATCH /api/deals/:id: Update a deal.
#[utoipa::path(
    patch,
    path = "/api/deals/{id}",
    params(("id" = Uuid, Path, description = "Deal ID")),
    request_body = DealForm,
    responses(
        (status = 200, description = "Deal updated", body = Deal),
        (status = 404, description = "Deal not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "deals"
)]
async fn update_deal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Deal>, AppError> {
    caller.require(permission(Action::Edit))?;
    let patch = extract_object(body)?;
    let repo = state.repo();

    let (before, form) = crud::load_merged::<DealForm>(repo, id, &patch, WHAT).await?;
    let deal: Deal = crud::write_columns(repo, id, crud::form_columns(&form)?, WHAT).await?;

    if before.stage != deal.stage {
        tracing::info!(deal_id = %id, from = %before.stage, to = %deal.stage, "deal stage changed");
        crud::log_status_change(
            repo,
            RelatedToType::Deal,
            id,
            &deal.title,
            before.stage.label(),
            deal.stage.label(),
            caller.id(),
        )
        .await;
    }
    Ok(Json(deal))
}

/// DELETE /api/deals/:id: Delete a deal.
#[utoipa::path(
    delete,
    path = "/api/deals/{id}",
    params(("id" = Uuid, Path, description = "Deal ID")),
    responses(
        (status = 200, description = "Deal deleted", body = DeleteResponse),
        (status = 404, description = "Deal not found", body = crate::error::ErrorBody),
    ),
    tag = "deals"
)]
async fn delete_deal(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    caller.require(permission(Action::Delete))?;
    let deleted = crud::delete_or_404(state.repo(), Table::Deals, id, WHAT).await?;
    tracing::info!(deal_id = %id, "deal deleted");
    Ok(Json(deleted))
}
