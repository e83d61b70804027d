//! # Backoffice Views
//!
//! JSON view models for the staff area. Every path here sits behind the
//! area gate, which has already checked the caller is staff and holds the
//! permission for the path. Handlers only narrow what they show, e.g.
//! search skips entities the caller cannot view.
//!
//! ## Endpoints
//!
//! - `GET /backoffice`: dashboard
//! - `GET /backoffice/deals/pipeline`: pipeline board
//! - `GET /backoffice/activities`: activity feed
//! - `GET /backoffice/calendar?month=YYYY-MM`: tasks due in a month
//! - `GET /backoffice/reports`: breakdowns by stage, status, industry
//! - `GET /backoffice/search?q=`: cross-entity search
//! - `GET /backoffice/settings`: caller's profile and permissions
//! - `GET /backoffice/settings/users`: staff directory

use std::collections::BTreeMap;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate, Utc};
use crm_backend_client::{Order, Query as RowQuery};
use crm_core::{
    Action, Company, CompanyRef, Contact, ContactRef, ContactStatus, Deal, DealRef, DealStage,
    DealTotals, EntityKind, Permission, PipelineBoard, Profile, Role, Table, Task, TaskStatus,
    UserType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::repo::Repo;
use crate::routes::activities::{self, ActivityFilter, ActivityView};
use crate::routes::crud::MAX_LIST_LIMIT;
use crate::state::AppState;

/// Activities shown on the dashboard.
const DASHBOARD_ACTIVITIES: usize = 5;
/// Open tasks assigned to the caller shown on the dashboard.
const DASHBOARD_TASKS: usize = 5;
/// Hits per entity in search.
const SEARCH_LIMIT: usize = 10;

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct EntityCounts {
    pub contacts: u64,
    pub companies: u64,
    pub deals: u64,
    pub tasks: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Dashboard {
    pub greeting_name: String,
    pub counts: EntityCounts,
    pub open_tasks: u64,
    pub deal_totals: DealTotals,
    /// Open tasks assigned to the caller, soonest due first.
    pub my_tasks: Vec<Task>,
    pub recent_activities: Vec<ActivityView>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CalendarParams {
    /// `YYYY-MM`; the current month when omitted.
    pub month: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalendarDay {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalendarMonth {
    /// `YYYY-MM`.
    pub month: String,
    /// Days with at least one task due, in date order.
    pub days: Vec<CalendarDay>,
}

/// One bucket of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Bucket {
    pub key: String,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StageSummary {
    pub stage: DealStage,
    pub label: String,
    pub count: usize,
    pub total_value: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Reports {
    pub deal_totals: DealTotals,
    pub deals_by_stage: Vec<StageSummary>,
    pub contacts_by_status: Vec<Bucket>,
    pub tasks_by_status: Vec<Bucket>,
    pub companies_by_industry: Vec<Bucket>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskHit {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SearchResults {
    pub query: String,
    pub contacts: Vec<ContactRef>,
    pub companies: Vec<CompanyRef>,
    pub deals: Vec<DealRef>,
    pub tasks: Vec<TaskHit>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Settings {
    pub profile: Option<Profile>,
    pub email: Option<String>,
    pub user_type: UserType,
    pub role: Option<Role>,
    pub role_label: Option<String>,
    pub role_description: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StaffMember {
    #[serde(flatten)]
    pub profile: Profile,
    pub role_label: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StaffDirectory {
    pub users: Vec<StaffMember>,
    /// Number of staff administrators; the last one cannot be demoted.
    pub admin_count: usize,
    pub roles: Vec<RoleOption>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleOption {
    pub role: Role,
    pub label: String,
    pub description: String,
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/backoffice", get(dashboard))
        .route("/backoffice/deals/pipeline", get(pipeline))
        .route("/backoffice/activities", get(activity_feed))
        .route("/backoffice/calendar", get(calendar))
        .route("/backoffice/reports", get(reports))
        .route("/backoffice/search", get(search))
        .route("/backoffice/settings", get(settings))
        .route("/backoffice/settings/users", get(staff_directory))
}

// ── Helpers ─────────────────────────────────────────────────────────

fn all_rows() -> RowQuery {
    RowQuery::new()
        .order_by("created_at", Order::Desc)
        .limit(MAX_LIST_LIMIT)
}

async fn count_by<T: Copy + ToString>(
    repo: Repo<'_>,
    table: Table,
    column: &str,
    values: &[T],
    label: impl Fn(T) -> &'static str,
) -> Result<Vec<Bucket>, AppError> {
    let mut buckets = Vec::with_capacity(values.len());
    for &value in values {
        let count = repo
            .count(table, &RowQuery::new().eq(column, value.to_string()))
            .await?;
        buckets.push(Bucket {
            key: value.to_string(),
            label: label(value).to_string(),
            count,
        });
    }
    Ok(buckets)
}

/// Industries with their company counts, most common first. Companies
/// without an industry are grouped under "Unspecified".
fn industry_buckets(rows: &[Value]) -> Vec<Bucket> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows {
        let industry = row
            .get("industry")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unspecified");
        *counts.entry(industry.to_string()).or_default() += 1;
    }
    let mut buckets: Vec<Bucket> = counts
        .into_iter()
        .map(|(key, count)| Bucket {
            label: key.clone(),
            key,
            count,
        })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    buckets
}

/// First day of `YYYY-MM`, and of the month after it.
fn month_bounds(month: &str) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d").ok()?;
    let end = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)?
    };
    Some((start, end))
}

fn group_by_day(tasks: Vec<Task>) -> Vec<CalendarDay> {
    let mut days: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        if let Some(due) = task.due_date {
            days.entry(due).or_default().push(task);
        }
    }
    days.into_iter()
        .map(|(date, tasks)| CalendarDay { date, tasks })
        .collect()
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /backoffice: Dashboard.
#[utoipa::path(
    get,
    path = "/backoffice",
    responses(
        (status = 200, description = "Dashboard figures", body = Dashboard),
        (status = 307, description = "Not signed in, or not staff"),
    ),
    tag = "backoffice"
)]
async fn dashboard(State(state): State<AppState>, caller: Caller) -> Result<Json<Dashboard>, AppError> {
    let repo = state.repo();
    let everything = RowQuery::new();
    let counts = EntityCounts {
        contacts: repo.count(Table::Contacts, &everything).await?,
        companies: repo.count(Table::Companies, &everything).await?,
        deals: repo.count(Table::Deals, &everything).await?,
        tasks: repo.count(Table::Tasks, &everything).await?,
    };

    let open_statuses = [TaskStatus::Todo, TaskStatus::InProgress].map(|s| s.as_str());
    let open_tasks = repo
        .count(Table::Tasks, &RowQuery::new().in_list("status", open_statuses))
        .await?;
    let my_tasks = repo
        .select::<Task>(
            &RowQuery::new()
                .eq("assigned_to", caller.id().to_string())
                .in_list("status", open_statuses)
                .order_by("due_date", Order::Asc)
                .limit(DASHBOARD_TASKS),
        )
        .await?;

    let deals = repo.select::<Deal>(&all_rows()).await?;
    let recent = ActivityFilter {
        limit: Some(DASHBOARD_ACTIVITIES),
        ..Default::default()
    };

    Ok(Json(Dashboard {
        greeting_name: caller.display_name(),
        counts,
        open_tasks,
        deal_totals: DealTotals::from_deals(&deals),
        my_tasks,
        recent_activities: activities::feed(repo, &recent).await?,
    }))
}

/// GET /backoffice/deals/pipeline: Deals grouped by stage.
#[utoipa::path(
    get,
    path = "/backoffice/deals/pipeline",
    responses(
        (status = 200, description = "Six stage columns with counts and totals", body = PipelineBoard),
    ),
    tag = "backoffice"
)]
async fn pipeline(State(state): State<AppState>) -> Result<Json<PipelineBoard>, AppError> {
    let deals = state.repo().select::<Deal>(&all_rows()).await?;
    Ok(Json(PipelineBoard::from_deals(deals)))
}

/// GET /backoffice/activities: Activity feed.
#[utoipa::path(
    get,
    path = "/backoffice/activities",
    params(ActivityFilter),
    responses(
        (status = 200, description = "Latest activities with authors", body = Vec<ActivityView>),
    ),
    tag = "backoffice"
)]
async fn activity_feed(
    State(state): State<AppState>,
    filter: Result<Query<ActivityFilter>, QueryRejection>,
) -> Result<Json<Vec<ActivityView>>, AppError> {
    let filter = extract_query(filter)?;
    Ok(Json(activities::feed(state.repo(), &filter).await?))
}

/// GET /backoffice/calendar: Tasks due in a month.
#[utoipa::path(
    get,
    path = "/backoffice/calendar",
    params(CalendarParams),
    responses(
        (status = 200, description = "Tasks grouped by due date", body = CalendarMonth),
        (status = 400, description = "Month is not YYYY-MM", body = crate::error::ErrorBody),
    ),
    tag = "backoffice"
)]
async fn calendar(
    State(state): State<AppState>,
    params: Result<Query<CalendarParams>, QueryRejection>,
) -> Result<Json<CalendarMonth>, AppError> {
    let params = extract_query(params)?;
    let month = params
        .month
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| Utc::now().format("%Y-%m").to_string());
    let (start, end) = month_bounds(&month)
        .ok_or_else(|| AppError::BadRequest(format!("month must be YYYY-MM, got '{month}'")))?;

    let query = RowQuery::new()
        .gte("due_date", start.to_string())
        .lt("due_date", end.to_string())
        .order_by("due_date", Order::Asc)
        .limit(MAX_LIST_LIMIT);
    let tasks = state.repo().select::<Task>(&query).await?;
    Ok(Json(CalendarMonth {
        month: start.format("%Y-%m").to_string(),
        days: group_by_day(tasks),
    }))
}

/// GET /backoffice/reports: Breakdowns for the reports page.
#[utoipa::path(
    get,
    path = "/backoffice/reports",
    responses(
        (status = 200, description = "Report figures", body = Reports),
    ),
    tag = "backoffice"
)]
async fn reports(State(state): State<AppState>) -> Result<Json<Reports>, AppError> {
    let repo = state.repo();
    let board = PipelineBoard::from_deals(repo.select::<Deal>(&all_rows()).await?);
    let deals_by_stage = board
        .stages
        .iter()
        .map(|column| StageSummary {
            stage: column.stage,
            label: column.label.to_string(),
            count: column.count,
            total_value: column.total_value,
        })
        .collect();

    let contacts_by_status = count_by(
        repo,
        Table::Contacts,
        "status",
        ContactStatus::ALL,
        |s| s.label(),
    )
    .await?;
    let tasks_by_status =
        count_by(repo, Table::Tasks, "status", TaskStatus::ALL, |s| s.label()).await?;

    let company_rows = repo
        .tables()
        .select(Table::Companies, &all_rows().select("id,industry,created_at"))
        .await?;

    Ok(Json(Reports {
        deal_totals: board.totals,
        deals_by_stage,
        contacts_by_status,
        tasks_by_status,
        companies_by_industry: industry_buckets(&company_rows),
    }))
}

/// GET /backoffice/search: Search the entities the caller can view.
#[utoipa::path(
    get,
    path = "/backoffice/search",
    params(SearchParams),
    responses(
        (status = 200, description = "Matches per entity", body = SearchResults),
    ),
    tag = "backoffice"
)]
async fn search(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResults>, AppError> {
    let needle = extract_query(params)?
        .q
        .map(|q| q.trim().to_string())
        .unwrap_or_default();
    let mut results = SearchResults {
        query: needle.clone(),
        ..Default::default()
    };
    if needle.is_empty() {
        return Ok(Json(results));
    }

    let repo = state.repo();
    let can_view = |kind| caller.has(Permission::for_entity(kind, Action::View));
    let query_for = |table: Table| {
        RowQuery::new()
            .search(table.search_columns(), &needle)
            .order_by("created_at", Order::Desc)
            .limit(SEARCH_LIMIT)
    };

    if can_view(EntityKind::Contact) {
        let hits = repo.select::<Contact>(&query_for(Table::Contacts)).await?;
        results.contacts = hits.iter().map(ContactRef::from).collect();
    }
    if can_view(EntityKind::Company) {
        let hits = repo.select::<Company>(&query_for(Table::Companies)).await?;
        results.companies = hits.iter().map(CompanyRef::from).collect();
    }
    if can_view(EntityKind::Deal) {
        let hits = repo.select::<Deal>(&query_for(Table::Deals)).await?;
        results.deals = hits.iter().map(DealRef::from).collect();
    }
    if can_view(EntityKind::Task) {
        let hits = repo.select::<Task>(&query_for(Table::Tasks)).await?;
        results.tasks = hits
            .into_iter()
            .map(|t| TaskHit {
                id: t.id,
                title: t.title,
                status: t.status,
            })
            .collect();
    }
    Ok(Json(results))
}

/// GET /backoffice/settings: The caller's profile and permissions.
#[utoipa::path(
    get,
    path = "/backoffice/settings",
    responses(
        (status = 200, description = "Profile and role details", body = Settings),
    ),
    tag = "backoffice"
)]
async fn settings(caller: Caller) -> Json<Settings> {
    let role = caller.role();
    Json(Settings {
        email: caller.session.email().map(String::from),
        user_type: caller.user_type(),
        role,
        role_label: role.map(|r| r.label().to_string()),
        role_description: role.map(|r| r.description().to_string()),
        permissions: role
            .map(|r| crm_core::role_permissions(r).into_iter().map(String::from).collect())
            .unwrap_or_default(),
        profile: caller.profile,
    })
}

/// GET /backoffice/settings/users: Staff directory.
#[utoipa::path(
    get,
    path = "/backoffice/settings/users",
    responses(
        (status = 200, description = "Staff accounts with role labels", body = StaffDirectory),
        (status = 403, description = "Missing users.manage", body = crate::error::ErrorBody),
    ),
    tag = "backoffice"
)]
async fn staff_directory(State(state): State<AppState>) -> Result<Json<StaffDirectory>, AppError> {
    let query = RowQuery::new()
        .eq("user_type", UserType::Staff.as_str())
        .order_by("created_at", Order::Desc)
        .limit(MAX_LIST_LIMIT);
    let profiles = state.repo().select::<Profile>(&query).await?;
    let admin_count = profiles
        .iter()
        .filter(|p| p.role == Some(Role::Admin))
        .count();
    Ok(Json(StaffDirectory {
        users: profiles
            .into_iter()
            .map(|profile| StaffMember {
                role_label: profile.role.map(|r| r.label().to_string()),
                profile,
            })
            .collect(),
        admin_count,
        roles: Role::ALL
            .iter()
            .map(|&role| RoleOption {
                role,
                label: role.label().to_string(),
                description: role.description().to_string(),
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn month_bounds_roll_over_december() {
        let (start, end) = month_bounds("2025-12").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert!(month_bounds("2025-13").is_none());
        assert!(month_bounds("December").is_none());
    }

    #[test]
    fn industries_ranked_with_unspecified_bucket() {
        let rows = vec![
            json!({"industry": "Retail"}),
            json!({"industry": "Software"}),
            json!({"industry": "Software"}),
            json!({"industry": null}),
            json!({"industry": "  "}),
        ];
        let buckets = industry_buckets(&rows);
        assert_eq!(buckets[0].key, "Software");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].key, "Unspecified");
        assert_eq!(buckets[1].count, 2);
        assert_eq!(buckets[2].key, "Retail");
    }
}
