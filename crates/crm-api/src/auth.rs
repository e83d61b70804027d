//! # Session Resolution & Caller Identity
//!
//! The session middleware resolves the access token on every request and
//! injects a [`SessionUser`] into the request extensions. It never rejects:
//! public routes ignore the session, the area gate redirects, and API
//! handlers reject through their extractors.
//!
//! ## Token Sources
//!
//! ```text
//! Authorization: Bearer <access_token>
//! Cookie: crm-access-token=<access_token>
//! ```
//!
//! The header wins when both are present.
//!
//! ## Extractors
//!
//! - [`SessionUser`]: any authenticated account, 401 otherwise.
//! - [`Caller`]: the session plus the account's profile row, with the
//!   permission checks handlers use.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use crm_backend_client::AuthUser;
use crm_core::{has_permission, Permission, Profile, Role, UserType};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Cookie carrying the access token for browser sessions.
pub const ACCESS_TOKEN_COOKIE: &str = "crm-access-token";

// ── SessionUser ─────────────────────────────────────────────────────────────

/// The authenticated account behind the request.
///
/// Custom `Debug` redacts the access token.
#[derive(Clone)]
pub struct SessionUser {
    pub user: AuthUser,
    pub access_token: String,
}

impl std::fmt::Debug for SessionUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUser")
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl SessionUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionUser>()
            .cloned()
            .ok_or_else(AppError::unauthorized)
    }
}

// ── Caller ──────────────────────────────────────────────────────────────────

/// Authenticated caller with their profile.
///
/// A missing profile row is not an error; the caller is then treated as a
/// customer without a role.
#[derive(Debug, Clone)]
pub struct Caller {
    pub session: SessionUser,
    pub profile: Option<Profile>,
}

impl Caller {
    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn user_type(&self) -> UserType {
        self.profile
            .as_ref()
            .map(Profile::kind)
            .unwrap_or(UserType::Customer)
    }

    pub fn is_staff(&self) -> bool {
        self.user_type().is_staff()
    }

    /// The caller's role. Customers have none, whatever their row says.
    pub fn role(&self) -> Option<Role> {
        if self.is_staff() {
            self.profile.as_ref().and_then(|p| p.role)
        } else {
            None
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.role().is_some_and(|r| has_permission(r, permission))
    }

    /// Name shown on activities and messages.
    pub fn display_name(&self) -> String {
        match &self.profile {
            Some(p) => p.display_name().to_string(),
            None => self.session.email().unwrap_or_default().to_string(),
        }
    }

    /// Returns 403 Forbidden unless the caller holds `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "permission '{permission}' required"
            )))
        }
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden("staff account required".into()))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = SessionUser::from_request_parts(parts, state).await?;
        let profile = state.repo().find::<Profile>(session.id()).await?;
        Ok(Self { session, profile })
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Read the access token from the `Authorization` header or the session
/// cookie.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve the request's session and inject [`SessionUser`] when valid.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = access_token(request.headers()) {
        match state.auth.get_user(&token).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(SessionUser {
                    user,
                    access_token: token,
                });
            }
            Ok(None) => tracing::debug!("access token not recognized"),
            Err(e) => tracing::warn!(error = %e, "session lookup failed, continuing unauthenticated"),
        }
    }
    next.run(request).await
}

/// `Set-Cookie` value that stores `token` for browser sessions.
pub fn session_cookie(token: &str) -> String {
    format!("{ACCESS_TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{ACCESS_TOKEN_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
