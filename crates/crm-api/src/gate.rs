//! # Area Gate Middleware
//!
//! Runs in front of every `/backoffice*` and `/portal*` request, after the
//! session middleware. Reads the caller's `user_type` and `role`, asks
//! [`evaluate_gate`] what to do, and turns the decision into a response:
//!
//! | Decision | Response |
//! |----------|----------|
//! | Allow | handler runs |
//! | AllowDegraded | WARN log, handler runs |
//! | Login | 307 to `/auth/login?redirectTo=<path>` |
//! | Redirect | 307 to the caller's area |
//! | Forbidden | 403 JSON error |

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use crm_backend_client::Query;
use crm_core::{evaluate_gate, Area, GateDecision, ProfileLookup, Role, Table, UserType};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::SessionUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::store::TableBackend;

/// Columns the gate reads from `profiles`.
const GATE_COLUMNS: &str = "id,user_type,role";

#[derive(Debug, Deserialize)]
struct GateRow {
    #[serde(default)]
    user_type: Option<UserType>,
    #[serde(default)]
    role: Option<Role>,
}

/// Read the gate's view of a profile, classifying failures instead of
/// returning them.
pub async fn lookup_profile(tables: &dyn TableBackend, user_id: Uuid) -> ProfileLookup {
    let query = Query::by_id(user_id).select(GATE_COLUMNS);
    let rows = match tables.select(Table::Profiles, &query).await {
        Ok(rows) => rows,
        Err(e) if e.is_missing_column() => return ProfileLookup::MigrationPending,
        Err(e) if e.is_policy_recursion() => return ProfileLookup::PolicyRecursion,
        Err(e) => return ProfileLookup::Failed(e.to_string()),
    };
    match rows.into_iter().next() {
        None => ProfileLookup::Missing,
        Some(row) => match serde_json::from_value::<GateRow>(row) {
            Ok(GateRow { user_type, role }) => ProfileLookup::Found { user_type, role },
            Err(e) => ProfileLookup::Failed(format!("unreadable profile row: {e}")),
        },
    }
}

/// `/auth/login?redirectTo=<path>` with the path form-url-encoded.
pub fn login_location(return_to: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
    format!("/auth/login?redirectTo={encoded}")
}

/// Gate middleware for the backoffice and portal areas.
pub async fn area_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if Area::of_path(&path).is_none() {
        return next.run(request).await;
    }

    let user_id = request.extensions().get::<SessionUser>().map(SessionUser::id);
    let lookup = match user_id {
        Some(id) => Some(lookup_profile(state.tables.as_ref(), id).await),
        None => None,
    };

    match evaluate_gate(&path, lookup.as_ref(), state.config.separation_enabled) {
        GateDecision::Allow => next.run(request).await,
        GateDecision::AllowDegraded { reason } => {
            tracing::warn!(path = %path, reason = %reason, "area gate failing open");
            next.run(request).await
        }
        GateDecision::Login { return_to } => {
            tracing::debug!(path = %path, "no session, redirecting to login");
            Redirect::temporary(&login_location(&return_to)).into_response()
        }
        GateDecision::Redirect { location } => {
            tracing::debug!(path = %path, location, "redirecting to caller's area");
            Redirect::temporary(location).into_response()
        }
        GateDecision::Forbidden { permission } => {
            AppError::Forbidden(format!("permission '{permission}' required")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTables;
    use serde_json::json;

    #[test]
    fn login_location_encodes_path() {
        assert_eq!(
            login_location("/backoffice/contacts"),
            "/auth/login?redirectTo=%2Fbackoffice%2Fcontacts"
        );
    }

    #[tokio::test]
    async fn lookup_found() {
        let tables = MemoryTables::new();
        let id = Uuid::new_v4();
        tables
            .insert(
                Table::Profiles,
                json!({"id": id, "email": "a@b.co", "user_type": "staff", "role": "viewer"}),
            )
            .await
            .unwrap();
        assert_eq!(
            lookup_profile(&tables, id).await,
            ProfileLookup::Found {
                user_type: Some(UserType::Staff),
                role: Some(Role::Viewer)
            }
        );
    }

    #[tokio::test]
    async fn lookup_missing_row() {
        let tables = MemoryTables::new();
        assert_eq!(
            lookup_profile(&tables, Uuid::new_v4()).await,
            ProfileLookup::Missing
        );
    }

    #[tokio::test]
    async fn lookup_missing_column_is_migration_pending() {
        let tables = MemoryTables::new();
        let id = Uuid::new_v4();
        tables
            .insert(Table::Profiles, json!({"id": id, "email": "a@b.co", "user_type": "staff"}))
            .await
            .unwrap();
        tables.drop_column(Table::Profiles, "user_type");
        assert_eq!(
            lookup_profile(&tables, id).await,
            ProfileLookup::MigrationPending
        );
    }

    #[tokio::test]
    async fn lookup_null_user_type_is_found_without_type() {
        let tables = MemoryTables::new();
        let id = Uuid::new_v4();
        tables
            .insert(Table::Profiles, json!({"id": id, "email": "a@b.co", "user_type": null}))
            .await
            .unwrap();
        assert_eq!(
            lookup_profile(&tables, id).await,
            ProfileLookup::Found {
                user_type: None,
                role: None
            }
        );
    }
}
