//! # Contacts API
//!
//! ## Endpoints
//!
//! - `GET /api/contacts`: list with search, sort, and filters
//! - `POST /api/contacts`: create
//! - `GET /api/contacts/:id`: get, with company
//! - `PATCH /api/contacts/:id`: partial update
//! - `DELETE /api/contacts/:id`: delete
//!
//! Duplicate emails are accepted. A status change is written to the
//! activity log.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use crm_core::{
    Action, Company, CompanyRef, Contact, ContactForm, ContactStatus, EntityKind, Permission,
    RelatedToType, Table,
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

const WHAT: &str = "Contact";

fn permission(action: Action) -> Permission {
    Permission::for_entity(EntityKind::Contact, action)
}

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContactFilter {
    pub status: Option<ContactStatus>,
    pub company_id: Option<Uuid>,
}

/// A contact with its company.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContactView {
    #[serde(flatten)]
    pub contact: Contact,
    pub company: Option<CompanyRef>,
}

async fn with_companies(repo: Repo<'_>, contacts: Vec<Contact>) -> Result<Vec<ContactView>, AppError> {
    let companies = repo
        .refs::<Company, CompanyRef>(contacts.iter().filter_map(|c| c.company_id))
        .await?;
    Ok(contacts
        .into_iter()
        .map(|contact| ContactView {
            company: contact.company_id.and_then(|id| companies.get(&id).cloned()),
            contact,
        })
        .collect())
}

async fn view(repo: Repo<'_>, contact: Contact) -> Result<ContactView, AppError> {
    let company = repo.one_ref::<Company, CompanyRef>(contact.company_id).await?;
    Ok(ContactView { contact, company })
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route(
            "/api/contacts/:id",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/contacts: List contacts.
#[utoipa::path(
    get,
    path = "/api/contacts",
    params(ListParams, ContactFilter),
    responses(
        (status = 200, description = "Contacts with their company", body = Vec<ContactView>),
        (status = 400, description = "Bad list parameters", body = crate::error::ErrorBody),
        (status = 403, description = "Missing contacts.view", body = crate::error::ErrorBody),
    ),
    tag = "contacts"
)]
async fn list_contacts(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
    filter: Result<Query<ContactFilter>, QueryRejection>,
) -> Result<Json<Vec<ContactView>>, AppError> {
    caller.require(permission(Action::View))?;
    let params = extract_query(params)?;
    let filter = extract_query(filter)?;

    let mut query = params.to_query(Table::Contacts)?;
    query = filter_eq(query, "status", filter.status);
    query = filter_eq(query, "company_id", filter.company_id);

    let repo = state.repo();
    let contacts = repo.select::<Contact>(&query).await?;
    Ok(Json(with_companies(repo, contacts).await?))
}

/// POST /api/contacts: Create a contact.
#[utoipa::path(
    post,
    path = "/api/contacts",
    request_body = ContactForm,
    responses(
        (status = 201, description = "Contact created", body = Contact),
        (status = 400, description = "Malformed body", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "contacts"
)]
async fn create_contact(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Contact>), AppError> {
    caller.require(permission(Action::Create))?;
    let form: ContactForm = crud::parse_create(extract_object(body)?)?;
    let contact = crud::insert_form(state.repo(), &form, caller.id()).await?;
    tracing::info!(contact_id = %contact.id, "contact created");
    Ok((axum::http::StatusCode::CREATED, Json(contact)))
}

/// GET /api/contacts/:id: Get a contact.
#[utoipa::path(
    get,
    path = "/api/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact ID")),
    responses(
        (status = 200, description = "Contact found", body = ContactView),
        (status = 404, description = "Contact not found", body = crate::error::ErrorBody),
    ),
    tag = "contacts"
)]
async fn get_contact(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ContactView>, AppError> {
    caller.require(permission(Action::View))?;
    let repo = state.repo();
    let contact = crud::find_or_404::<Contact>(repo, id, WHAT).await?;
    Ok(Json(view(repo, contact).await?))
}

/// PATCH /api/contacts/:id: Update a contact.
#[utoipa::path(
    patch,
    path = "/api/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact ID")),
    request_body = ContactForm,
    responses(
        (status = 200, description = "Contact updated", body = Contact),
        (status = 404, description = "Contact not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "contacts"
)]
async fn update_contact(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Contact>, AppError> {
    caller.require(permission(Action::Edit))?;
    let patch = extract_object(body)?;
    let repo = state.repo();

    let (before, form) = crud::load_merged::<ContactForm>(repo, id, &patch, WHAT).await?;
    let contact: Contact = crud::write_columns(repo, id, crud::form_columns(&form)?, WHAT).await?;

    if before.status != contact.status {
        crud::log_status_change(
            repo,
            RelatedToType::Contact,
            id,
            &contact.full_name(),
            before.status.label(),
            contact.status.label(),
            caller.id(),
        )
        .await;
    }
    Ok(Json(contact))
}

/// DELETE /api/contacts/:id: Delete a contact.
#[utoipa::path(
    delete,
    path = "/api/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact ID")),
    responses(
        (status = 200, description = "Contact deleted", body = DeleteResponse),
        (status = 404, description = "Contact not found", body = crate::error::ErrorBody),
    ),
    tag = "contacts"
)]
async fn delete_contact(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    caller.require(permission(Action::Delete))?;
    let deleted = crud::delete_or_404(state.repo(), Table::Contacts, id, WHAT).await?;
    tracing::info!(contact_id = %id, "contact deleted");
    Ok(Json(deleted))
}
