//! Typed client for the hosted auth service.
//!
//! Base path: `/auth/v1`
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET    | `/auth/v1/user` | Resolve an access token to its user |
//! | POST   | `/auth/v1/token?grant_type=password` | Password sign-in |
//! | POST   | `/auth/v1/signup?redirect_to=..` | Register, with metadata |
//! | POST   | `/auth/v1/logout` | Revoke the session |
//! | DELETE | `/auth/v1/admin/users/{id}` | Delete a user (service role key) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::BackendError;
use crate::retry::{send, Replay};

const AUTH_PREFIX: &str = "auth/v1";

/// An authenticated user as the auth service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Metadata supplied at sign-up (`full_name`, `user_type`, `role`).
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A signed-in session.
///
/// Custom `Debug` redacts both tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .finish()
    }
}

/// Registration request.
#[derive(Clone, Serialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Stored as the user's metadata; the profile trigger reads it.
    pub data: serde_json::Value,
    /// Where the confirmation email links back to.
    #[serde(skip)]
    pub redirect_to: Option<String>,
}

impl std::fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("data", &self.data)
            .field("redirect_to", &self.redirect_to)
            .finish()
    }
}

/// Sign-up returns a session when email confirmation is off, and the bare
/// user when a confirmation email was sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(Session),
    User(AuthUser),
}

impl SignUpResponse {
    pub fn user(&self) -> &AuthUser {
        match self {
            Self::Session(s) => &s.user,
            Self::User(u) => u,
        }
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

/// Client for the auth service.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: Zeroizing<String>,
    service_role_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AuthClient {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: String,
        anon_key: Zeroizing<String>,
        service_role_key: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            http,
            base_url,
            anon_key,
            service_role_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{AUTH_PREFIX}/{path}", self.base_url)
    }

    /// Resolve an access token to its user. Invalid or expired tokens
    /// yield `Ok(None)`.
    ///
    /// Calls `GET {base_url}/auth/v1/user`.
    pub async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>, BackendError> {
        let endpoint = format!("GET /{AUTH_PREFIX}/user");
        let url = self.url("user");

        let resp = send(&endpoint, Replay::Backoff, || {
            self.http.get(&url).bearer_auth(access_token).send()
        })
        .await?;

        if matches!(
            resp.status(),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BackendError::from_response(&endpoint, resp).await);
        }

        resp.json().await.map(Some).map_err(|e| BackendError::Deserialization {
            endpoint,
            source: e,
        })
    }

    /// Sign in with email and password.
    ///
    /// Calls `POST {base_url}/auth/v1/token?grant_type=password`.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let endpoint = format!("POST /{AUTH_PREFIX}/token");
        let url = self.url("token");
        let body = PasswordGrant { email, password };

        let resp = send(&endpoint, Replay::Never, || {
            self.http
                .post(&url)
                .bearer_auth(self.anon_key.as_str())
                .query(&[("grant_type", "password")])
                .json(&body)
                .send()
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BackendError::from_response(&endpoint, resp).await);
        }

        resp.json().await.map_err(|e| BackendError::Deserialization {
            endpoint,
            source: e,
        })
    }

    /// Register a new user. Sent once, never replayed: a replay after a
    /// slow success answers "User already registered".
    ///
    /// Calls `POST {base_url}/auth/v1/signup`.
    pub async fn sign_up(&self, req: &SignUpRequest) -> Result<SignUpResponse, BackendError> {
        let endpoint = format!("POST /{AUTH_PREFIX}/signup");
        let url = self.url("signup");
        let params: Vec<(&str, &str)> = req
            .redirect_to
            .as_deref()
            .map(|r| vec![("redirect_to", r)])
            .unwrap_or_default();

        let resp = send(&endpoint, Replay::Never, || {
            self.http
                .post(&url)
                .bearer_auth(self.anon_key.as_str())
                .query(&params)
                .json(req)
                .send()
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BackendError::from_response(&endpoint, resp).await);
        }

        resp.json().await.map_err(|e| BackendError::Deserialization {
            endpoint,
            source: e,
        })
    }

    /// Revoke the session behind `access_token`.
    ///
    /// Calls `POST {base_url}/auth/v1/logout`.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let endpoint = format!("POST /{AUTH_PREFIX}/logout");
        let url = self.url("logout");

        let resp = send(&endpoint, Replay::Never, || {
            self.http.post(&url).bearer_auth(access_token).send()
        })
        .await?;

        // An already-invalid token is as good as signed out.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        Err(BackendError::from_response(&endpoint, resp).await)
    }

    /// Delete a user. Requires the service role key.
    ///
    /// Calls `DELETE {base_url}/auth/v1/admin/users/{id}`.
    pub async fn admin_delete_user(&self, id: Uuid) -> Result<(), BackendError> {
        let endpoint = format!("DELETE /{AUTH_PREFIX}/admin/users/{id}");
        let Some(key) = self.service_role_key.as_ref() else {
            return Err(BackendError::MissingServiceKey { endpoint });
        };
        let url = self.url(&format!("admin/users/{id}"));

        let resp = send(&endpoint, Replay::Backoff, || {
            self.http.delete(&url).bearer_auth(key.as_str()).send()
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BackendError::from_response(&endpoint, resp).await);
        }
        Ok(())
    }
}
