//! # Session Routes
//!
//! Public endpoints that open and close sessions. A successful login or a
//! sign-up that returns a session sets the `crm-access-token` cookie and
//! also returns the token for API clients.
//!
//! ## Endpoints
//!
//! - `POST /auth/login`
//! - `POST /auth/sign-up`: customer accounts only
//! - `POST /auth/logout`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use crm_backend_client::{SignUpRequest, SignUpResponse};
use crm_core::validation::is_valid_email;
use crm_core::{Area, Profile, Role, UserType, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{clear_session_cookie, session_cookie, SessionUser};
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    #[schema(format = Password)]
    pub password: String,
    /// Path to continue to after login, as passed to `/auth/login?redirectTo=`.
    #[serde(default, alias = "redirectTo")]
    pub redirect_to: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SignUpForm {
    pub email: String,
    #[schema(format = Password)]
    pub password: String,
    pub full_name: String,
}

/// The signed-in account and where to send it.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub user_type: UserType,
    pub role: Option<Role>,
    pub access_token: Option<String>,
    pub redirect_to: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
}

// ── Router ──────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/logout", post(logout))
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Accept only same-site absolute paths as post-login destinations.
pub fn safe_redirect(target: Option<&str>) -> Option<&str> {
    target
        .map(str::trim)
        .filter(|t| t.starts_with('/') && !t.starts_with("//") && !t.contains('\\'))
}

fn with_cookie(status: StatusCode, cookie: Option<String>, body: impl Serialize) -> Response {
    let body = Json(body);
    match cookie {
        Some(cookie) => (status, [(header::SET_COOKIE, cookie)], body).into_response(),
        None => (status, body).into_response(),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /auth/login: Sign in with email and password.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = SessionInfo),
        (status = 401, description = "Invalid login credentials", body = crate::error::ErrorBody),
    ),
    tag = "session"
)]
async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    let session = state.auth.sign_in(req.email.trim(), &req.password).await?;
    let profile = match state.repo().find::<Profile>(session.user.id).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(user_id = %session.user.id, error = %e, "profile lookup after login failed");
            None
        }
    };
    let user_type = profile.as_ref().map(Profile::kind).unwrap_or(UserType::Customer);
    let redirect_to = safe_redirect(req.redirect_to.as_deref())
        .unwrap_or(Area::for_user_type(user_type).home())
        .to_string();

    tracing::info!(user_id = %session.user.id, user_type = %user_type, "signed in");
    let info = SessionInfo {
        user_id: session.user.id,
        email: session.user.email.clone(),
        user_type,
        role: profile
            .and_then(|p| p.role)
            .filter(|_| user_type.is_staff()),
        access_token: Some(session.access_token.clone()),
        redirect_to,
    };
    Ok(with_cookie(
        StatusCode::OK,
        Some(session_cookie(&session.access_token)),
        info,
    ))
}

/// POST /auth/sign-up: Register a customer account.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpForm,
    responses(
        (status = 201, description = "Account created", body = SessionInfo),
        (status = 400, description = "Rejected by the auth service", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid email or name", body = crate::error::ErrorBody),
    ),
    tag = "session"
)]
async fn sign_up(
    State(state): State<AppState>,
    body: Result<Json<SignUpForm>, JsonRejection>,
) -> Result<Response, AppError> {
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

    let request = SignUpRequest {
        email,
        password: req.password,
        data: json!({
            "full_name": full_name,
            "user_type": UserType::Customer.as_str(),
        }),
        redirect_to: Some(format!("{}{}", state.config.site_url, Area::Portal.home())),
    };
    let response = state.auth.sign_up(&request).await?;
    let user = response.user().clone();
    tracing::info!(user_id = %user.id, "customer signed up");

    let access_token = match &response {
        SignUpResponse::Session(s) => Some(s.access_token.clone()),
        SignUpResponse::User(_) => None,
    };
    let info = SessionInfo {
        user_id: user.id,
        email: user.email,
        user_type: UserType::Customer,
        role: None,
        redirect_to: if access_token.is_some() {
            Area::Portal.home().to_string()
        } else {
            "/auth/sign-up-success".to_string()
        },
        access_token: access_token.clone(),
    };
    Ok(with_cookie(
        StatusCode::CREATED,
        access_token.as_deref().map(session_cookie),
        info,
    ))
}

/// POST /auth/logout: End the current session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Signed out; session cookie cleared", body = LogoutResponse),
    ),
    tag = "session"
)]
async fn logout(State(state): State<AppState>, user: Option<SessionUser>) -> Response {
    if let Some(user) = user {
        if let Err(e) = state.auth.sign_out(&user.access_token).await {
            tracing::warn!(user_id = %user.id(), error = %e, "sign out failed, clearing cookie anyway");
        } else {
            tracing::info!(user_id = %user.id(), "signed out");
        }
    }
    with_cookie(
        StatusCode::OK,
        Some(clear_session_cookie()),
        LogoutResponse { success: true },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_paths_are_followed() {
        assert_eq!(safe_redirect(Some("/backoffice/deals")), Some("/backoffice/deals"));
        assert_eq!(safe_redirect(Some("//evil.example")), None);
        assert_eq!(safe_redirect(Some("https://evil.example")), None);
        assert_eq!(safe_redirect(Some("/\\evil")), None);
        assert_eq!(safe_redirect(None), None);
    }
}
