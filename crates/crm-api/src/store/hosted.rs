//! Hosted backend: tables and auth through [`BackendClient`].

use async_trait::async_trait;
use crm_backend_client::{
    AuthUser, BackendClient, BackendError, Query, Session, SignUpRequest, SignUpResponse,
};
use crm_core::Table;
use serde_json::Value;
use uuid::Uuid;

use super::{AuthBackend, StoreError, TableBackend};

/// [`TableBackend`] and [`AuthBackend`] over the hosted REST and auth
/// endpoints.
#[derive(Debug, Clone)]
pub struct HostedBackend {
    client: BackendClient,
}

impl HostedBackend {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Fails unless a service role key is configured for table calls.
    pub fn check_tables(&self) -> Result<(), BackendError> {
        self.client.tables().map(|_| ())
    }
}

#[async_trait]
impl TableBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        Ok(self.client.tables()?.select(table.as_str(), query).await?)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        Ok(self.client.tables()?.insert(table.as_str(), &row).await?)
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .client
            .tables()?
            .update(table.as_str(), query, &patch)
            .await?)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        Ok(self.client.tables()?.delete(table.as_str(), query).await?)
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64, StoreError> {
        Ok(self.client.tables()?.count(table.as_str(), query).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .tables()?
            .count(Table::Profiles.as_str(), &Query::new().limit(1))
            .await?;
        Ok(())
    }
}

/// The auth service answers a failed password grant with 400 and one of
/// these codes.
fn is_bad_credentials(err: &BackendError) -> bool {
    err.status() == Some(400)
        && matches!(err.code(), Some("invalid_grant" | "invalid_credentials"))
}

#[async_trait]
impl AuthBackend for HostedBackend {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, StoreError> {
        Ok(self.client.auth().get_user(access_token).await?)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        self.client
            .auth()
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                if is_bad_credentials(&e) {
                    StoreError::InvalidCredentials
                } else {
                    e.into()
                }
            })
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpResponse, StoreError> {
        Ok(self.client.auth().sign_up(request).await?)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), StoreError> {
        Ok(self.client.auth().sign_out(access_token).await?)
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        self.client
            .auth()
            .admin_delete_user(id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    StoreError::NotFound(format!("user {id}"))
                } else {
                    e.into()
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>) -> BackendError {
        BackendError::Api {
            endpoint: "POST /auth/v1/token".into(),
            status,
            code: code.map(String::from),
            message: "Invalid login credentials".into(),
        }
    }

    fn hosted(service_key: Option<&str>) -> HostedBackend {
        let mut config =
            crm_backend_client::BackendConfig::local_mock("http://127.0.0.1:1", "anon").unwrap();
        if let Some(key) = service_key {
            config = config.with_service_role_key(key);
        }
        HostedBackend::new(BackendClient::new(config).unwrap())
    }

    #[test]
    fn tables_need_service_role_key() {
        assert!(matches!(
            hosted(None).check_tables(),
            Err(BackendError::MissingServiceKey { .. })
        ));
        assert!(hosted(Some("service")).check_tables().is_ok());
    }

    #[tokio::test]
    async fn table_calls_without_service_role_key_fail() {
        let err = hosted(None)
            .select(Table::Profiles, &Query::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend(BackendError::MissingServiceKey { .. })
        ));
    }

    #[test]
    fn bad_credentials_recognized() {
        assert!(is_bad_credentials(&api(400, Some("invalid_grant"))));
        assert!(is_bad_credentials(&api(400, Some("invalid_credentials"))));
        assert!(!is_bad_credentials(&api(400, Some("email_not_confirmed"))));
        assert!(!is_bad_credentials(&api(500, Some("invalid_grant"))));
    }
}
