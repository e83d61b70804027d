//! # Tasks API
//!
//! ## Endpoints
//!
//! - `GET /api/tasks`: list with search, sort, and filters
//! - `POST /api/tasks`: create
//! - `GET /api/tasks/:id`: get, with the related record and assignee
//! - `PATCH /api/tasks/:id`: partial update
//! - `DELETE /api/tasks/:id`: delete
//!
//! `completed_at` is maintained here: set when a task enters `completed`,
//! cleared when it leaves.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use crm_core::{
    Action, Company, CompanyRef, Contact, ContactRef, Deal, DealRef, EntityKind, Permission,
    Profile, RelatedToType, Table, Task, TaskForm, TaskPriority, TaskStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_object, extract_query};
use crate::repo::Repo;
use crate::routes::crud::{self, filter_eq, CreatorRef, DeleteResponse, ListParams};
use crate::state::AppState;

const WHAT: &str = "Task";

fn permission(action: Action) -> Permission {
    Permission::for_entity(EntityKind::Task, action)
}

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<Uuid>,
    pub related_to_type: Option<RelatedToType>,
    pub related_to_id: Option<Uuid>,
}

/// A task with its assignee and, for a single task, the record it is about.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub assignee: Option<CreatorRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<CompanyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal: Option<DealRef>,
}

impl TaskView {
    fn bare(task: Task, assignee: Option<CreatorRef>) -> Self {
        Self {
            task,
            assignee,
            contact: None,
            company: None,
            deal: None,
        }
    }
}

/// `completed_at` for a task moving from `before` to `after`. `None` means
/// leave the column alone.
fn completion_change(before: Option<TaskStatus>, after: TaskStatus) -> Option<Value> {
    let was_completed = before == Some(TaskStatus::Completed);
    match (was_completed, after == TaskStatus::Completed) {
        (false, true) => Some(Value::String(Utc::now().to_rfc3339())),
        (true, false) => Some(Value::Null),
        _ => None,
    }
}

fn task_columns(form: &TaskForm, before: Option<TaskStatus>) -> Result<Map<String, Value>, AppError> {
    let mut columns = crud::form_columns(form)?;
    if let Some(completed_at) = completion_change(before, form.status) {
        columns.insert("completed_at".into(), completed_at);
    }
    Ok(columns)
}

async fn related_view(repo: Repo<'_>, task: Task) -> Result<TaskView, AppError> {
    let assignee = repo.one_ref::<Profile, CreatorRef>(task.assigned_to).await?;
    let related_id = task.related_to_id;
    let related_type = task.related_to_type;
    let mut view = TaskView::bare(task, assignee);
    match related_type {
        Some(RelatedToType::Contact) => {
            view.contact = repo.one_ref::<Contact, ContactRef>(related_id).await?;
        }
        Some(RelatedToType::Company) => {
            view.company = repo.one_ref::<Company, CompanyRef>(related_id).await?;
        }
        Some(RelatedToType::Deal) => {
            view.deal = repo.one_ref::<Deal, DealRef>(related_id).await?;
        }
        Some(RelatedToType::Task) | None => {}
    }
    Ok(view)
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /api/tasks: List tasks.
#[utoipa::path(
    get,
    path = "/api/tasks",
    params(ListParams, TaskFilter),
    responses(
        (status = 200, description = "Tasks with their assignee", body = Vec<TaskView>),
        (status = 400, description = "Bad list parameters", body = crate::error::ErrorBody),
        (status = 403, description = "Missing tasks.view", body = crate::error::ErrorBody),
    ),
    tag = "tasks"
)]
async fn list_tasks(
    State(state): State<AppState>,
    caller: Caller,
    params: Result<Query<ListParams>, QueryRejection>,
    filter: Result<Query<TaskFilter>, QueryRejection>,
) -> Result<Json<Vec<TaskView>>, AppError> {
    caller.require(permission(Action::View))?;
    let params = extract_query(params)?;
    let filter = extract_query(filter)?;

    let mut query = params.to_query(Table::Tasks)?;
    query = filter_eq(query, "status", filter.status);
    query = filter_eq(query, "priority", filter.priority);
    query = filter_eq(query, "assigned_to", filter.assigned_to);
    query = filter_eq(query, "related_to_type", filter.related_to_type);
    query = filter_eq(query, "related_to_id", filter.related_to_id);

    let repo = state.repo();
    let tasks = repo.select::<Task>(&query).await?;
    let assignees = repo
        .refs::<Profile, CreatorRef>(tasks.iter().filter_map(|t| t.assigned_to))
        .await?;
    Ok(Json(
        tasks
            .into_iter()
            .map(|task| {
                let assignee = task.assigned_to.and_then(|id| assignees.get(&id).cloned());
                TaskView::bare(task, assignee)
            })
            .collect(),
    ))
}

/// POST /api/tasks: Create a task.
#[utoipa::path(
    post,
    path = "/api/tasks",
    request_body = TaskForm,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Malformed body", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "tasks"
)]
async fn create_task(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<Task>), AppError> {
    caller.require(permission(Action::Create))?;
    let form: TaskForm = crud::parse_create(extract_object(body)?)?;
    let mut row = task_columns(&form, None)?;
    row.insert("created_by".into(), Value::String(caller.id().to_string()));
    let task: Task = state.repo().insert(Value::Object(row)).await?;
    tracing::info!(task_id = %task.id, "task created");
    Ok((axum::http::StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks/:id: Get a task.
#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task found", body = TaskView),
        (status = 404, description = "Task not found", body = crate::error::ErrorBody),
    ),
    tag = "tasks"
)]
async fn get_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskView>, AppError> {
    caller.require(permission(Action::View))?;
    let repo = state.repo();
    let task = crud::find_or_404::<Task>(repo, id, WHAT).await?;
    Ok(Json(related_view(repo, task).await?))
}

/// PATCH /api/tasks/:id: Update a task.
#[utoipa::path(
    patch,
    path = "/api/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    request_body = TaskForm,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 404, description = "Task not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "tasks"
)]
async fn update_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Task>, AppError> {
    caller.require(permission(Action::Edit))?;
    let patch = extract_object(body)?;
    let repo = state.repo();
    let (before, form) = crud::load_merged::<TaskForm>(repo, id, &patch, WHAT).await?;
    let columns = task_columns(&form, Some(before.status))?;
    let task = crud::write_columns(repo, id, columns, WHAT).await?;
    Ok(Json(task))
}

/// DELETE /api/tasks/:id: Delete a task.
#[utoipa::path(
    delete,
    path = "/api/tasks/{id}",
    params(("id" = Uuid, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task deleted", body = DeleteResponse),
        (status = 404, description = "Task not found", body = crate::error::ErrorBody),
    ),
    tag = "tasks"
)]
async fn delete_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    caller.require(permission(Action::Delete))?;
    let deleted = crud::delete_or_404(state.repo(), Table::Tasks, id, WHAT).await?;
    tracing::info!(task_id = %id, "task deleted");
    Ok(Json(deleted))
}
