//! # crm-backend-client -- Typed Rust client for the hosted CRM backend
//!
//! The CRM keeps its data in a hosted relational backend that also provides
//! authentication. This crate gives typed access to both halves:
//! - **Tables** via the REST endpoints under `/rest/v1`
//! - **Auth** via the user/session endpoints under `/auth/v1`
//!
//! Every request carries the project's anonymous key in the `apikey`
//! header. Table calls authenticate with the service role key and are
//! unavailable without one. Reads, counts, and deletes by id are replayed
//! with backoff after a transport failure; writes are sent once. Error
//! responses surface as [`BackendError::Api`] with the backend's code and
//! message.

pub mod auth;
pub mod config;
pub mod error;
pub mod query;
pub(crate) mod retry;
pub mod tables;

pub use auth::{AuthClient, AuthUser, Session, SignUpRequest, SignUpResponse};
pub use config::{BackendConfig, ConfigError};
pub use error::BackendError;
pub use query::{Filter, Order, Query};
pub use tables::TableClient;

use std::time::Duration;

/// Top-level backend client. Holds the table and auth sub-clients.
#[derive(Debug, Clone)]
pub struct BackendClient {
    tables: Option<TableClient>,
    auth: AuthClient,
}

impl BackendClient {
    /// Create a new backend client from configuration.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                let mut apikey = reqwest::header::HeaderValue::from_str(config.anon_key.as_str())
                    .map_err(|_| BackendError::Config(ConfigError::InvalidKey))?;
                apikey.set_sensitive(true);
                headers.insert("apikey", apikey);
                headers
            })
            .build()
            .map_err(|e| BackendError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;

        let base_url = config.url.as_str().trim_end_matches('/').to_string();
        let tables = config
            .service_role_key
            .clone()
            .map(|key| TableClient::new(http.clone(), base_url.clone(), key));

        Ok(Self {
            tables,
            auth: AuthClient::new(
                http,
                base_url,
                config.anon_key.clone(),
                config.service_role_key.clone(),
            ),
        })
    }

    /// Access the table REST client.
    ///
    /// Fails with [`BackendError::MissingServiceKey`] when no service role
    /// key is configured.
    pub fn tables(&self) -> Result<&TableClient, BackendError> {
        self.tables
            .as_ref()
            .ok_or_else(|| BackendError::MissingServiceKey {
                endpoint: "/rest/v1".into(),
            })
    }

    /// Access the auth client.
    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }
}
