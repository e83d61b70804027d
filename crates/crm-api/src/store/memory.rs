//! In-memory table and auth backends.
//!
//! Used for development without a database and by the integration tests.
//! Rows are kept as JSON objects in one [`Store`] per table and queried
//! with the same [`Query`] semantics the hosted backend applies.
//!
//! [`MemoryAuth`] emulates the database side of sign-up: a new user gets a
//! `profiles` row built from the sign-up metadata, and deleting a user
//! removes the profile. The profile step can be switched off to exercise
//! the "profile not created yet" path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use crm_backend_client::{AuthUser, Query, Session, SignUpRequest, SignUpResponse};
use crm_core::Table;
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};
use serde_json::{json, Map, Value};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{stamp_new_row, AuthBackend, StoreError, TableBackend};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// The lock is `parking_lot` and never held across `.await` points.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(id)?;
        f(entry);
        Some(entry.clone())
    }

    /// Apply `f` to every record under a single write lock.
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut T)) {
        self.data.write().values_mut().for_each(|v| f(v));
    }

    /// Remove every record `matches` selects; returns the removed records.
    pub fn remove_where(&self, mut matches: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut guard = self.data.write();
        let ids: Vec<Uuid> = guard
            .iter()
            .filter(|(_, v)| matches(v))
            .map(|(k, _)| *k)
            .collect();
        ids.iter().filter_map(|id| guard.remove(id)).collect()
    }

    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Tables -------------------------------------------------------------------

/// In-memory [`TableBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    profiles: Store<Value>,
    companies: Store<Value>,
    contacts: Store<Value>,
    deals: Store<Value>,
    tasks: Store<Value>,
    activities: Store<Value>,
    /// Columns treated as absent, to reproduce a schema that is behind
    /// the code.
    dropped: Arc<RwLock<HashSet<(Table, String)>>>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, table: Table) -> &Store<Value> {
        match table {
            Table::Profiles => &self.profiles,
            Table::Companies => &self.companies,
            Table::Contacts => &self.contacts,
            Table::Deals => &self.deals,
            Table::Tasks => &self.tasks,
            Table::Activities => &self.activities,
        }
    }

    /// Make `column` disappear from `table`: existing values are removed
    /// and any later query naming it fails with a missing-column error.
    pub fn drop_column(&self, table: Table, column: &str) {
        self.dropped.write().insert((table, column.to_string()));
        self.store(table).for_each_mut(|row| {
            if let Some(obj) = row.as_object_mut() {
                obj.remove(column);
            }
        });
    }

    /// Number of rows currently in `table`.
    pub fn row_count(&self, table: Table) -> usize {
        self.store(table).len()
    }

    fn check_columns<'a>(
        &self,
        table: Table,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), StoreError> {
        let dropped = self.dropped.read();
        if dropped.is_empty() {
            return Ok(());
        }
        for column in columns {
            if dropped.contains(&(table, column.to_string())) {
                return Err(StoreError::MissingColumn {
                    table,
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn row_id(row: &Value) -> Result<Uuid, StoreError> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Rejected("row id must be a UUID".into()))
}

fn object_keys(value: &Value) -> Vec<&str> {
    value
        .as_object()
        .map(|o| o.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

#[async_trait]
impl TableBackend for MemoryTables {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check_columns(table, query.referenced_columns())?;
        Ok(query.apply(self.store(table).list()))
    }

    async fn insert(&self, table: Table, mut row: Value) -> Result<Value, StoreError> {
        if !row.is_object() {
            return Err(StoreError::Rejected("row must be a JSON object".into()));
        }
        self.check_columns(table, object_keys(&row))?;
        stamp_new_row(table, &mut row);
        let id = row_id(&row)?;
        let store = self.store(table);
        if store.get(&id).is_some() {
            return Err(StoreError::Rejected(format!(
                "duplicate key value violates unique constraint \"{table}_pkey\""
            )));
        }
        store.insert(id, row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_columns(table, query.referenced_columns())?;
        self.check_columns(table, object_keys(&patch))?;
        let Some(patch) = patch.as_object() else {
            return Err(StoreError::Rejected("patch must be a JSON object".into()));
        };
        let store = self.store(table);
        let targets: Vec<Uuid> = store
            .list()
            .iter()
            .filter(|r| query.matches(r))
            .filter_map(|r| row_id(r).ok())
            .collect();
        Ok(targets
            .iter()
            .filter_map(|id| {
                store.update(id, |row| {
                    if let Some(obj) = row.as_object_mut() {
                        for (k, v) in patch {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                })
            })
            .collect())
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check_columns(table, query.referenced_columns())?;
        Ok(self.store(table).remove_where(|row| query.matches(row)))
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64, StoreError> {
        self.check_columns(table, query.referenced_columns())?;
        let n = self
            .store(table)
            .list()
            .iter()
            .filter(|r| query.matches(r))
            .count();
        Ok(n as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// -- Auth ---------------------------------------------------------------------

#[derive(Clone)]
struct MemoryUser {
    user: AuthUser,
    password: Zeroizing<String>,
}

impl std::fmt::Debug for MemoryUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUser")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

const MIN_PASSWORD_LEN: usize = 6;

/// In-memory [`AuthBackend`] with opaque random access tokens.
#[derive(Clone)]
pub struct MemoryAuth {
    tables: Arc<dyn TableBackend>,
    users: Store<MemoryUser>,
    sessions: Arc<RwLock<HashMap<String, Uuid>>>,
    create_profiles: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuth")
            .field("tables", &self.tables.name())
            .field("users", &self.users.len())
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl MemoryAuth {
    /// Auth whose sign-ups create profiles in `tables`.
    pub fn new(tables: Arc<dyn TableBackend>) -> Self {
        Self {
            tables,
            users: Store::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            create_profiles: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Turn profile creation on sign-up on or off.
    pub fn set_profile_creation(&self, enabled: bool) {
        self.create_profiles.store(enabled, Ordering::SeqCst);
    }

    /// Register a user and return a signed-in session for it.
    pub async fn seed_user(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<Session, StoreError> {
        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            data: metadata,
            redirect_to: None,
        };
        match self.sign_up(&request).await? {
            SignUpResponse::Session(session) => Ok(session),
            SignUpResponse::User(_) => self.sign_in(email, password).await,
        }
    }

    fn open_session(&self, user: &AuthUser) -> Session {
        let token = new_token();
        self.sessions.write().insert(token.clone(), user.id);
        Session {
            access_token: token,
            token_type: Some("bearer".into()),
            expires_in: None,
            refresh_token: None,
            user: user.clone(),
        }
    }

    fn find_by_email(&self, email: &str) -> Option<MemoryUser> {
        self.users.list().into_iter().find(|u| {
            u.user
                .email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
    }
}

/// 32 random bytes, hex encoded.
fn new_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The profile row the sign-up trigger derives from user metadata. The
/// user type defaults to customer.
fn profile_row(user: &AuthUser) -> Value {
    let meta = user.user_metadata.as_object().cloned().unwrap_or_default();
    let text = |key: &str| {
        meta.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let mut row = Map::new();
    row.insert("id".into(), json!(user.id));
    row.insert("email".into(), json!(user.email.clone().unwrap_or_default()));
    row.insert("full_name".into(), json!(text("full_name")));
    row.insert("avatar_url".into(), Value::Null);
    row.insert("role".into(), json!(text("role")));
    row.insert(
        "user_type".into(),
        json!(text("user_type").unwrap_or_else(|| "customer".into())),
    );
    Value::Object(row)
}

#[async_trait]
impl AuthBackend for MemoryAuth {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, StoreError> {
        let id = self.sessions.read().get(access_token).copied();
        Ok(id.and_then(|id| self.users.get(&id)).map(|u| u.user))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        match self.find_by_email(email.trim()) {
            Some(u) if u.password.as_str() == password => Ok(self.open_session(&u.user)),
            _ => Err(StoreError::InvalidCredentials),
        }
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpResponse, StoreError> {
        let email = request.email.trim();
        if self.find_by_email(email).is_some() {
            return Err(StoreError::Rejected("User already registered".into()));
        }
        if request.password.len() < MIN_PASSWORD_LEN {
            return Err(StoreError::Rejected(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters."
            )));
        }

        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_ascii_lowercase()),
            user_metadata: request.data.clone(),
            created_at: Some(Utc::now()),
        };
        self.users.insert(
            user.id,
            MemoryUser {
                user: user.clone(),
                password: Zeroizing::new(request.password.clone()),
            },
        );

        if self.create_profiles.load(Ordering::SeqCst) {
            self.tables.insert(Table::Profiles, profile_row(&user)).await?;
        }

        Ok(SignUpResponse::Session(self.open_session(&user)))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), StoreError> {
        self.sessions.write().remove(access_token);
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        if self.users.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        self.sessions.write().retain(|_, uid| *uid != id);
        self.tables.delete(Table::Profiles, &Query::by_id(id)).await?;
        Ok(())
    }
}

// -- Bundle -------------------------------------------------------------------

/// Memory tables plus the auth backend that writes profiles into them.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    pub tables: MemoryTables,
    pub auth: MemoryAuth,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let tables = MemoryTables::new();
        Self {
            auth: MemoryAuth::new(Arc::new(tables.clone())),
            tables,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_backend_client::Order;

    #[tokio::test]
    async fn insert_then_select_with_filters() {
        let tables = MemoryTables::new();
        tables
            .insert(Table::Contacts, json!({"first_name": "Ada", "status": "lead"}))
            .await
            .unwrap();
        tables
            .insert(Table::Contacts, json!({"first_name": "Bob", "status": "active"}))
            .await
            .unwrap();

        let leads = tables
            .select(Table::Contacts, &Query::new().eq("status", "lead"))
            .await
            .unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0]["first_name"], "Ada");
        assert_eq!(tables.count(Table::Contacts, &Query::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_and_delete_return_affected_rows() {
        let tables = MemoryTables::new();
        let row = tables
            .insert(Table::Tasks, json!({"title": "Call", "status": "todo"}))
            .await
            .unwrap();
        let id: Uuid = row["id"].as_str().unwrap().parse().unwrap();

        let updated = tables
            .update(Table::Tasks, &Query::by_id(id), json!({"status": "completed"}))
            .await
            .unwrap();
        assert_eq!(updated[0]["status"], "completed");
        assert_eq!(updated[0]["title"], "Call");

        let deleted = tables.delete(Table::Tasks, &Query::by_id(id)).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(tables.delete(Table::Tasks, &Query::by_id(id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_column_fails_queries_naming_it() {
        let tables = MemoryTables::new();
        tables
            .insert(Table::Profiles, json!({"email": "a@x.io", "user_type": "staff"}))
            .await
            .unwrap();
        tables.drop_column(Table::Profiles, "user_type");

        let err = tables
            .select(Table::Profiles, &Query::new().select("id,user_type,role"))
            .await
            .unwrap_err();
        assert!(err.is_missing_column());

        let rows = tables.select(Table::Profiles, &Query::new()).await.unwrap();
        assert!(rows[0].get("user_type").is_none());
    }

    #[tokio::test]
    async fn ordering_and_limit() {
        let tables = MemoryTables::new();
        for (i, title) in ["a", "b", "c"].iter().enumerate() {
            tables
                .insert(Table::Deals, json!({"title": title, "value": i as f64 * 10.0}))
                .await
                .unwrap();
        }
        let top = tables
            .select(
                Table::Deals,
                &Query::new().order_by("value", Order::Desc).limit(2),
            )
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0]["title"], "c");
    }

    #[tokio::test]
    async fn sign_up_creates_profile_and_session() {
        let backend = MemoryBackend::new();
        let session = backend
            .auth
            .seed_user("Ada@Example.com", "secret1", json!({"full_name": "Ada"}))
            .await
            .unwrap();

        let user = backend.auth.get_user(&session.access_token).await.unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));

        let profiles = backend
            .tables
            .select(Table::Profiles, &Query::by_id(user.id))
            .await
            .unwrap();
        assert_eq!(profiles[0]["user_type"], "customer");
        assert_eq!(profiles[0]["full_name"], "Ada");
    }

    #[tokio::test]
    async fn duplicate_sign_up_rejected() {
        let backend = MemoryBackend::new();
        backend.auth.seed_user("a@x.io", "secret1", json!({})).await.unwrap();
        let err = backend
            .auth
            .seed_user("A@X.io", "secret2", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let backend = MemoryBackend::new();
        backend.auth.seed_user("a@x.io", "secret1", json!({})).await.unwrap();
        assert!(backend.auth.sign_in("a@x.io", "secret1").await.is_ok());
        assert!(matches!(
            backend.auth.sign_in("a@x.io", "nope").await,
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn delete_user_removes_profile_and_sessions() {
        let backend = MemoryBackend::new();
        let session = backend.auth.seed_user("a@x.io", "secret1", json!({})).await.unwrap();
        backend.auth.delete_user(session.user.id).await.unwrap();

        assert!(backend.auth.get_user(&session.access_token).await.unwrap().is_none());
        assert_eq!(backend.tables.row_count(Table::Profiles), 0);
    }

    #[tokio::test]
    async fn profile_creation_can_be_disabled() {
        let backend = MemoryBackend::new();
        backend.auth.set_profile_creation(false);
        backend.auth.seed_user("a@x.io", "secret1", json!({})).await.unwrap();
        assert_eq!(backend.tables.row_count(Table::Profiles), 0);
    }
}
