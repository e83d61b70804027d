//! # Customer Portal
//!
//! Views for customer accounts. A customer sees the contact record linked
//! to their account, matched by `contacts.user_id` or, for contacts created
//! before the account existed, by email. Everything else hangs off that
//! contact.
//!
//! ## Endpoints
//!
//! - `GET /portal`: overview
//! - `GET /portal/deals`: the customer's deals
//! - `GET /portal/profile`: account, contact, and company
//! - `POST /portal/messages`: leave a message for the team

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use crm_backend_client::{Filter, Order, Query};
use crm_core::{Activity, ActivityType, Company, Contact, Deal, DealTotals, Profile, RelatedToType};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::repo::Repo;
use crate::routes::activities::{self, NewActivity};
use crate::routes::crud::MAX_LIST_LIMIT;
use crate::state::AppState;

/// Activities shown on the overview.
const RECENT_ACTIVITIES: usize = 5;

/// Title of activities created from portal messages.
pub const CUSTOMER_MESSAGE_TITLE: &str = "Customer Message";

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct PortalOverview {
    pub display_name: String,
    pub profile: Option<Profile>,
    /// `None` until staff link a contact to this account.
    pub contact: Option<Contact>,
    pub deal_totals: DealTotals,
    pub deals: Vec<Deal>,
    pub recent_activities: Vec<Activity>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PortalProfile {
    pub profile: Option<Profile>,
    pub contact: Option<Contact>,
    pub company: Option<Company>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PortalMessage {
    pub message: String,
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/portal", get(overview))
        .route("/portal/deals", get(deals))
        .route("/portal/profile", get(profile))
        .route("/portal/messages", post(send_message))
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The contact linked to the caller's account, if any.
pub async fn matched_contact(repo: Repo<'_>, caller: &Caller) -> Result<Option<Contact>, AppError> {
    let mut matchers = vec![Filter::Eq("user_id".into(), caller.id().to_string().into())];
    if let Some(email) = caller.session.email().filter(|e| !e.is_empty()) {
        matchers.push(Filter::Eq("email".into(), email.into()));
    }
    let query = Query::new()
        .any_of(matchers)
        .order_by("created_at", Order::Asc)
        .limit(1);
    Ok(repo.select::<Contact>(&query).await?.into_iter().next())
}

async fn contact_deals(repo: Repo<'_>, contact: Option<&Contact>) -> Result<Vec<Deal>, AppError> {
    let Some(contact) = contact else {
        return Ok(Vec::new());
    };
    let query = Query::new()
        .eq("contact_id", contact.id.to_string())
        .order_by("created_at", Order::Desc)
        .limit(MAX_LIST_LIMIT);
    Ok(repo.select::<Deal>(&query).await?)
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /portal: Customer overview.
#[utoipa::path(
    get,
    path = "/portal",
    responses(
        (status = 200, description = "Overview of the customer's records", body = PortalOverview),
        (status = 307, description = "Not signed in"),
    ),
    tag = "portal"
)]
async fn overview(State(state): State<AppState>, caller: Caller) -> Result<Json<PortalOverview>, AppError> {
    let repo = state.repo();
    let contact = matched_contact(repo, &caller).await?;
    let deals = contact_deals(repo, contact.as_ref()).await?;

    let recent_activities = match &contact {
        Some(c) => {
            let query = Query::new()
                .eq("related_to_id", c.id.to_string())
                .order_by("created_at", Order::Desc)
                .limit(RECENT_ACTIVITIES);
            repo.select::<Activity>(&query).await?
        }
        None => Vec::new(),
    };

    Ok(Json(PortalOverview {
        display_name: caller.display_name(),
        deal_totals: DealTotals::from_deals(&deals),
        profile: caller.profile,
        contact,
        deals,
        recent_activities,
    }))
}

/// GET /portal/deals: The customer's deals, newest first.
#[utoipa::path(
    get,
    path = "/portal/deals",
    responses(
        (status = 200, description = "Deals linked to the customer's contact", body = Vec<Deal>),
    ),
    tag = "portal"
)]
async fn deals(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<Deal>>, AppError> {
    let repo = state.repo();
    let contact = matched_contact(repo, &caller).await?;
    Ok(Json(contact_deals(repo, contact.as_ref()).await?))
}

/// GET /portal/profile: Account, contact, and company.
#[utoipa::path(
    get,
    path = "/portal/profile",
    responses(
        (status = 200, description = "Customer profile", body = PortalProfile),
    ),
    tag = "portal"
)]
async fn profile(State(state): State<AppState>, caller: Caller) -> Result<Json<PortalProfile>, AppError> {
    let repo = state.repo();
    let contact = matched_contact(repo, &caller).await?;
    let company = match contact.as_ref().and_then(|c| c.company_id) {
        Some(id) => repo.find::<Company>(id).await?,
        None => None,
    };
    Ok(Json(PortalProfile {
        profile: caller.profile,
        contact,
        company,
    }))
}

/// POST /portal/messages: Send a message to the team.
#[utoipa::path(
    post,
    path = "/portal/messages",
    request_body = PortalMessage,
    responses(
        (status = 201, description = "Message recorded as a note", body = Activity),
        (status = 422, description = "Empty message", body = crate::error::ErrorBody),
    ),
    tag = "portal"
)]
async fn send_message(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<PortalMessage>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Activity>), AppError> {
    let message = extract_json(body)?.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::Validation {
            message: "Message is required".into(),
            field: Some("message"),
        });
    }

    let repo = state.repo();
    let contact = matched_contact(repo, &caller).await?;
    let entry = NewActivity {
        activity_type: ActivityType::Note,
        title: CUSTOMER_MESSAGE_TITLE.to_string(),
        description: Some(message),
        related_to_type: contact.as_ref().map(|_| RelatedToType::Contact),
        related_to_id: contact.as_ref().map(|c| c.id),
    };
    let activity = activities::record(repo, &entry, caller.id()).await?;
    tracing::info!(activity_id = %activity.id, user_id = %caller.id(), "customer message recorded");
    Ok((axum::http::StatusCode::CREATED, Json(activity)))
}
