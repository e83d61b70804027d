//! # Table and Auth Backends
//!
//! Handlers never talk to a concrete database. They go through two traits:
//!
//! - [`TableBackend`]: select/insert/update/delete/count over the six CRM
//!   tables, driven by a [`Query`].
//! - [`AuthBackend`]: resolve tokens, sign in/up/out, delete users.
//!
//! ## Implementations
//!
//! | Module | Tables | Auth |
//! |--------|--------|------|
//! | [`hosted`] | hosted REST endpoints | hosted auth service |
//! | [`postgres`] | direct `sqlx` Postgres pool | (hosted or in-memory) |
//! | [`memory`] | `parking_lot` in-memory stores | in-memory users and tokens |
//!
//! All three return [`StoreError`], which classifies the failures the API
//! layer reacts to: missing columns and policy recursion (the area gate
//! fails open on these), invalid credentials, and client-caused rejections.

pub mod hosted;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::Utc;
use crm_backend_client::{AuthUser, BackendError, Query, Session, SignUpRequest, SignUpResponse};
use crm_core::Table;
use serde_json::Value;
use uuid::Uuid;

pub use hosted::HostedBackend;
pub use memory::{MemoryAuth, MemoryBackend, MemoryTables, Store};
pub use postgres::PgTables;

/// Row storage for the CRM tables.
#[async_trait]
pub trait TableBackend: Send + Sync + 'static {
    /// Short name for logs and readiness output.
    fn name(&self) -> &'static str;

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError>;

    /// Apply `patch` to every row matching `query`; returns the updated rows.
    async fn update(&self, table: Table, query: &Query, patch: Value)
        -> Result<Vec<Value>, StoreError>;

    /// Delete every row matching `query`; returns the deleted rows.
    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, table: Table, query: &Query) -> Result<u64, StoreError>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// User accounts and sessions.
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    /// Resolve an access token. Unknown or expired tokens yield `Ok(None)`.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, StoreError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError>;

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpResponse, StoreError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), StoreError>;

    /// Remove the user account. The user's profile goes with it.
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Failures from any table or auth backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The query named a column the table does not have.
    #[error("column {table}.{column} does not exist")]
    MissingColumn { table: Table, column: String },

    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// The request was refused because of something the caller sent, e.g.
    /// an already registered email.
    #[error("{0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid column name: {0:?}")]
    InvalidIdentifier(String),

    #[error("row serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SQLSTATE of a Postgres error, if `err` carries one.
fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

impl StoreError {
    /// A referenced column is absent (SQLSTATE `42703` or its message).
    pub fn is_missing_column(&self) -> bool {
        match self {
            Self::MissingColumn { .. } => true,
            Self::Backend(e) => e.is_missing_column(),
            Self::Database(e) => sqlstate(e).as_deref() == Some("42703"),
            _ => false,
        }
    }

    /// A row-level security policy recursed (SQLSTATE `42P17`).
    pub fn is_policy_recursion(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_policy_recursion(),
            Self::Database(e) => sqlstate(e).as_deref() == Some("42P17"),
            _ => false,
        }
    }

    /// The backend refused the write because of a uniqueness constraint.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Backend(e) => e.status() == Some(409) || e.code() == Some("23505"),
            Self::Database(e) => sqlstate(e).as_deref() == Some("23505"),
            _ => false,
        }
    }

    /// Message safe to return to the client when the failure is the
    /// client's fault: constraint violations, bad input values, rejected
    /// sign-ups. `None` for server-side failures.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::Rejected(msg) => Some(msg.clone()),
            Self::InvalidCredentials => Some(self.to_string()),
            Self::Backend(e) if e.is_client_error() && !e.is_missing_column() => {
                e.api_message().map(String::from)
            }
            // Class 22 (data exception) and 23 (integrity constraint).
            Self::Database(sqlx::Error::Database(db)) => {
                let code = db.code();
                code.as_deref()
                    .is_some_and(|c| c.starts_with("22") || c.starts_with("23"))
                    .then(|| db.message().to_string())
            }
            _ => None,
        }
    }
}

/// Fill in the generated columns of a new row: `id` when absent, and the
/// timestamps the table carries.
pub fn stamp_new_row(table: Table, row: &mut Value) {
    let Some(obj) = row.as_object_mut() else {
        return;
    };
    let now = Value::String(Utc::now().to_rfc3339());
    if !obj.get("id").is_some_and(|v| !v.is_null()) {
        obj.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    obj.entry("created_at").or_insert_with(|| now.clone());
    if table.has_updated_at() {
        obj.entry("updated_at").or_insert(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamp_fills_id_and_timestamps() {
        let mut row = json!({"name": "Acme"});
        stamp_new_row(Table::Companies, &mut row);
        assert!(row["id"].as_str().unwrap().parse::<Uuid>().is_ok());
        assert!(row["created_at"].is_string());
        assert!(row["updated_at"].is_string());
    }

    #[test]
    fn stamp_keeps_existing_id_and_skips_updated_at_for_activities() {
        let id = Uuid::new_v4();
        let mut row = json!({"id": id.to_string(), "title": "x"});
        stamp_new_row(Table::Activities, &mut row);
        assert_eq!(row["id"], id.to_string());
        assert!(row.get("updated_at").is_none());
    }

    #[test]
    fn missing_column_is_classified() {
        let err = StoreError::MissingColumn {
            table: Table::Profiles,
            column: "user_type".into(),
        };
        assert!(err.is_missing_column());
        assert!(!err.is_policy_recursion());
        assert_eq!(err.to_string(), "column profiles.user_type does not exist");
    }

    #[test]
    fn backend_client_errors_surface_their_message() {
        let err = StoreError::Backend(BackendError::Api {
            endpoint: "POST /rest/v1/contacts".into(),
            status: 409,
            code: Some("23505".into()),
            message: "duplicate key value".into(),
        });
        assert!(err.is_conflict());
        assert_eq!(err.client_message().as_deref(), Some("duplicate key value"));
    }

    #[test]
    fn server_errors_have_no_client_message() {
        let err = StoreError::Backend(BackendError::Api {
            endpoint: "GET /rest/v1/deals".into(),
            status: 500,
            code: None,
            message: "boom".into(),
        });
        assert!(err.client_message().is_none());
    }
}
