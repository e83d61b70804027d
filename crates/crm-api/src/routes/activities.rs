//! # Activities API
//!
//! The activity log: notes, calls, emails, meetings, and automatic
//! status-change entries, each optionally pinned to a contact, company,
//! deal, or task. Staff only.
//!
//! ## Endpoints
//!
//! - `GET /api/activities`: latest entries, optionally for one record
//! - `POST /api/activities`: add an entry

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use crm_core::{Activity, ActivityType, Profile, RelatedToType, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_query};
use crate::repo::Repo;
use crate::routes::crud::{filter_eq, CreatorRef, MAX_LIST_LIMIT};
use crate::state::AppState;
use crate::store::StoreError;

/// Default page size of the activity feed.
pub const DEFAULT_FEED_LIMIT: usize = 50;

// ── DTOs ────────────────────────────────────────────────────────────

/// A new log entry. The author is the caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub related_to_type: Option<RelatedToType>,
    #[serde(default)]
    pub related_to_id: Option<Uuid>,
}

/// Feed filter.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityFilter {
    pub related_to_type: Option<RelatedToType>,
    pub related_to_id: Option<Uuid>,
    pub activity_type: Option<ActivityType>,
    /// Page size, default 50, at most 500.
    pub limit: Option<usize>,
}

/// An activity with its author.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityView {
    #[serde(flatten)]
    pub activity: Activity,
    pub creator: Option<CreatorRef>,
}

// ── Shared ──────────────────────────────────────────────────────────

/// Write a log entry authored by `created_by`.
pub async fn record(
    repo: Repo<'_>,
    entry: &NewActivity,
    created_by: Uuid,
) -> Result<Activity, StoreError> {
    let mut row = match serde_json::to_value(entry)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    row.insert("created_by".into(), Value::String(created_by.to_string()));
    repo.insert::<Activity>(Value::Object(row)).await
}

/// Latest activities matching `filter`, newest first.
pub async fn feed(repo: Repo<'_>, filter: &ActivityFilter) -> Result<Vec<ActivityView>, StoreError> {
    let limit = filter
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let mut query = crm_backend_client::Query::new()
        .order_by("created_at", crm_backend_client::Order::Desc)
        .limit(limit);
    query = filter_eq(query, "related_to_type", filter.related_to_type);
    query = filter_eq(query, "related_to_id", filter.related_to_id);
    query = filter_eq(query, "activity_type", filter.activity_type);
    let activities = repo.select::<Activity>(&query).await?;
    with_creators(repo, activities).await
}

/// Attach each activity's author.
pub async fn with_creators(
    repo: Repo<'_>,
    activities: Vec<Activity>,
) -> Result<Vec<ActivityView>, StoreError> {
    let creators = repo
        .refs::<Profile, CreatorRef>(activities.iter().filter_map(|a| a.created_by))
        .await?;
    Ok(activities
        .into_iter()
        .map(|activity| ActivityView {
            creator: activity.created_by.and_then(|id| creators.get(&id).cloned()),
            activity,
        })
        .collect())
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new().route("/api/activities", get(list_activities).post(create_activity))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/activities: Latest activities.
#[utoipa::path(
    get,
    path = "/api/activities",
    params(ActivityFilter),
    responses(
        (status = 200, description = "Activities, newest first", body = Vec<ActivityView>),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
        (status = 403, description = "Not a staff account", body = crate::error::ErrorBody),
    ),
    tag = "activities"
)]
async fn list_activities(
    State(state): State<AppState>,
    caller: Caller,
    filter: Result<Query<ActivityFilter>, QueryRejection>,
) -> Result<Json<Vec<ActivityView>>, AppError> {
    caller.require_staff()?;
    let filter = extract_query(filter)?;
    Ok(Json(feed(state.repo(), &filter).await?))
}

/// POST /api/activities: Log an activity.
#[utoipa::path(
    post,
    path = "/api/activities",
    request_body = NewActivity,
    responses(
        (status = 201, description = "Activity recorded", body = Activity),
        (status = 400, description = "Malformed body", body = crate::error::ErrorBody),
        (status = 422, description = "Missing title", body = crate::error::ErrorBody),
    ),
    tag = "activities"
)]
async fn create_activity(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<NewActivity>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Activity>), AppError> {
    caller.require_staff()?;
    let mut entry = extract_json(body)?;
    entry.title = entry.title.trim().to_string();
    if entry.title.is_empty() {
        return Err(ValidationError::Required {
            field: "title",
            label: "Title",
        }
        .into());
    }
    entry.description = entry.description.filter(|d| !d.trim().is_empty());

    let activity = record(state.repo(), &entry, caller.id()).await?;
    tracing::info!(activity_id = %activity.id, activity_type = %activity.activity_type, "activity recorded");
    Ok((axum::http::StatusCode::CREATED, Json(activity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTables;
    use serde_json::json;

    #[tokio::test]
    async fn feed_filters_by_record_and_attaches_creator() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let author: Profile = repo
            .insert(json!({"email": "sam@example.com", "full_name": "Sam", "user_type": "staff", "role": "manager"}))
            .await
            .unwrap();
        let deal_id = Uuid::new_v4();
        let on_deal = NewActivity {
            activity_type: ActivityType::Call,
            title: "Intro call".into(),
            description: None,
            related_to_type: Some(RelatedToType::Deal),
            related_to_id: Some(deal_id),
        };
        record(repo, &on_deal, author.id).await.unwrap();
        record(
            repo,
            &NewActivity {
                related_to_id: Some(Uuid::new_v4()),
                ..on_deal.clone()
            },
            author.id,
        )
        .await
        .unwrap();

        let filter = ActivityFilter {
            related_to_type: Some(RelatedToType::Deal),
            related_to_id: Some(deal_id),
            ..Default::default()
        };
        let views = feed(repo, &filter).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].activity.title, "Intro call");
        assert_eq!(views[0].creator.as_ref().unwrap().full_name.as_deref(), Some("Sam"));
    }

    #[tokio::test]
    async fn feed_respects_limit() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let entry = NewActivity {
            activity_type: ActivityType::Note,
            title: "n".into(),
            description: None,
            related_to_type: None,
            related_to_id: None,
        };
        for _ in 0..5 {
            record(repo, &entry, Uuid::new_v4()).await.unwrap();
        }
        let filter = ActivityFilter {
            limit: Some(3),
            ..Default::default()
        };
        let views = feed(repo, &filter).await.unwrap();
        assert_eq!(views.len(), 3);
        assert!(views.iter().all(|v| v.creator.is_none()));
    }
}
