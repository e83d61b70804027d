//! # User Management
//!
//! Staff accounts are created through the auth backend's sign-up with
//! `user_type = staff` and a role in the user metadata; the backend's
//! profile trigger then creates the profile row, which this module waits
//! for.
//!
//! ## Endpoints
//!
//! - `POST /api/users`: create a staff account (`users.manage`)
//! - `PATCH /api/users/:id`: rename; changing the role needs admin
//! - `DELETE /api/users/:id`: delete an account (`users.manage`, not self)
//! - `PUT /api/users/:id/role`: change role (`users.manage`)
//!
//! Demoting the last staff administrator is refused with 409.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{patch, post, put};
use axum::{Json, Router};
use crm_backend_client::{Query, SignUpRequest};
use crm_core::validation::is_valid_email;
use crm_core::{Permission, Profile, Role, Table, UserType, ValidationError};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::repo::Repo;
use crate::routes::crud::DeleteResponse;
use crate::state::AppState;

/// Message returned when a demotion would leave no administrator.
pub const LAST_ADMIN_MESSAGE: &str =
    "Cannot change the role of the last administrator. Please assign another admin first.";

/// Message returned when staff creation gives up waiting for the profile.
pub const PROFILE_TIMEOUT_MESSAGE: &str = "Profile creation timed out. Please refresh the page.";

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateStaffRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateStaffResponse {
    pub user_id: Uuid,
    pub profile: Profile,
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", post(create_staff_user))
        .route("/api/users/:id", patch(update_user).delete(delete_user))
        .route("/api/users/:id/role", put(update_role))
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Throwaway password for a new staff account. The user sets their own
/// through the confirmation email.
fn initial_password() -> Zeroizing<String> {
    let mut bytes = [0u8; 9];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Zeroizing::new(format!("{hex}A1!"))
}

/// Refuse to take the admin role away from the last staff administrator.
async fn ensure_not_last_admin(repo: Repo<'_>, target: &Profile, new_role: Role) -> Result<(), AppError> {
    if target.role != Some(Role::Admin) || new_role == Role::Admin {
        return Ok(());
    }
    let admins = Query::new()
        .eq("role", Role::Admin.as_str())
        .eq("user_type", UserType::Staff.as_str());
    let count = repo.count(Table::Profiles, &admins).await?;
    if count <= 1 {
        tracing::warn!(user_id = %target.id, "refused to demote the last administrator");
        return Err(AppError::Conflict(LAST_ADMIN_MESSAGE.into()));
    }
    Ok(())
}

async fn find_profile(repo: Repo<'_>, id: Uuid) -> Result<Profile, AppError> {
    repo.find::<Profile>(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

async fn write_profile(repo: Repo<'_>, id: Uuid, columns: Map<String, Value>) -> Result<Profile, AppError> {
    repo.update::<Profile>(id, Value::Object(columns))
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// Poll `profiles` until the row for `id` exists or the attempts run out.
async fn wait_for_profile(state: &AppState, id: Uuid) -> Result<Profile, AppError> {
    let poll = state.config.profile_poll;
    for attempt in 1..=poll.attempts {
        tokio::time::sleep(poll.interval).await;
        if let Some(profile) = state.repo().find::<Profile>(id).await? {
            tracing::debug!(user_id = %id, attempt, "profile row available");
            return Ok(profile);
        }
    }
    tracing::error!(user_id = %id, attempts = poll.attempts, "profile was not created in time");
    Err(AppError::ServiceUnavailable(PROFILE_TIMEOUT_MESSAGE.into()))
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /api/users: Create a staff account.
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateStaffRequest,
    responses(
        (status = 201, description = "Staff account created", body = CreateStaffResponse),
        (status = 403, description = "Missing users.manage", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid email or name", body = crate::error::ErrorBody),
        (status = 503, description = "Profile row did not appear in time", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn create_staff_user(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateStaffRequest>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<CreateStaffResponse>), AppError> {
    caller.require(Permission::UsersManage)?;
    let req = extract_json(body)?;
    let email = req.email.trim().to_string();
    let full_name = req.full_name.trim().to_string();
    if !is_valid_email(&email) {
        return Err(ValidationError::InvalidEmail {
            field: "email",
            value: email,
        }
        .into());
    }
    if full_name.is_empty() {
        return Err(ValidationError::Required {
            field: "full_name",
            label: "Full name",
        }
        .into());
    }

    let password = initial_password();
    let request = SignUpRequest {
        email: email.clone(),
        password: password.to_string(),
        data: json!({
            "full_name": full_name,
            "user_type": UserType::Staff.as_str(),
            "role": req.role.as_str(),
        }),
        redirect_to: Some(state.config.login_redirect()),
    };
    let user_id = state.auth.sign_up(&request).await?.user().id;
    tracing::info!(user_id = %user_id, role = %req.role, "staff user signed up");

    let profile = wait_for_profile(&state, user_id).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreateStaffResponse {
            user_id,
            profile,
            message: format!(
                "Staff account created successfully! An email has been sent to {email} to set their password."
            ),
        }),
    ))
}

/// PATCH /api/users/:id: Update a user's name and, for admins, role.
#[utoipa::path(
    patch,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Profile updated", body = Profile),
        (status = 403, description = "Not an admin and not the user", body = crate::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
        (status = 409, description = "Would demote the last admin", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<Profile>, AppError> {
    if !caller.is_admin() && caller.id() != id {
        return Err(AppError::Forbidden("Only admins can update other users".into()));
    }
    let req = extract_json(body)?;
    let repo = state.repo();
    let target = find_profile(repo, id).await?;

    let mut columns = Map::new();
    if let Some(name) = req.full_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "full_name",
                label: "Full name",
            }
            .into());
        }
        columns.insert("full_name".into(), json!(name));
    }
    if let Some(role) = req.role.filter(|r| target.role != Some(*r)) {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("Only admins can change user roles".into()));
        }
        ensure_not_last_admin(repo, &target, role).await?;
        columns.insert("role".into(), json!(role));
    }
    if columns.is_empty() {
        return Ok(Json(target));
    }
    Ok(Json(write_profile(repo, id, columns).await?))
}

/// PUT /api/users/:id/role: Change a user's role.
#[utoipa::path(
    put,
    path = "/api/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Profile),
        (status = 403, description = "Missing users.manage", body = crate::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
        (status = 409, description = "Would demote the last admin", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn update_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<Profile>, AppError> {
    caller.require(Permission::UsersManage)?;
    let UpdateRoleRequest { role } = extract_json(body)?;
    let repo = state.repo();
    let target = find_profile(repo, id).await?;
    ensure_not_last_admin(repo, &target, role).await?;

    let mut columns = Map::new();
    columns.insert("role".into(), json!(role));
    let profile = write_profile(repo, id, columns).await?;
    tracing::info!(user_id = %id, role = %role, changed_by = %caller.id(), "user role changed");
    Ok(Json(profile))
}

/// DELETE /api/users/:id: Delete a user account.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = DeleteResponse),
        (status = 400, description = "Tried to delete own account", body = crate::error::ErrorBody),
        (status = 403, description = "Missing users.manage", body = crate::error::ErrorBody),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn delete_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    if caller.id() == id {
        return Err(AppError::BadRequest("You cannot delete your own account".into()));
    }
    caller.require(Permission::UsersManage)?;
    state.auth.delete_user(id).await?;
    tracing::info!(user_id = %id, deleted_by = %caller.id(), "user deleted");
    Ok(Json(DeleteResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_password_is_random_and_complex() {
        let a = initial_password();
        let b = initial_password();
        assert_ne!(*a, *b);
        assert!(a.ends_with("A1!"));
        assert_eq!(a.len(), 21);
    }
}
