//! # crm-api: Axum API Services for the CRM
//!
//! Serves the staff backoffice, the customer portal, and the REST API
//! behind both, over a pluggable table backend (hosted REST, direct
//! Postgres, or in-memory) and auth backend (hosted or in-memory).
//!
//! ## API Surface
//!
//! | Prefix | Module | Access |
//! |--------|--------|--------|
//! | `/auth/*` | [`routes::session`] | public |
//! | `/api/contacts`, `/api/companies`, `/api/deals`, `/api/tasks` | [`routes::contacts`] etc. | staff, per-entity permissions |
//! | `/api/activities` | [`routes::activities`] | staff |
//! | `/api/upload-avatar` | [`routes::avatar`] | any session |
//! | `/api/users/*` | [`routes::users`] | `users.manage` / self |
//! | `/backoffice*` | [`routes::backoffice`] | area gate: staff + route permission |
//! | `/portal*` | [`routes::portal`] | area gate: any session |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → SessionMiddleware → AreaGate → Handler
//! ```
//!
//! The session middleware only attaches the caller; rejection happens in
//! the area gate (redirects) or in handler extractors (401 JSON).
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gate;
pub mod middleware;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod state;
pub mod store;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the middleware stack so
/// they stay cheap and never touch the session backend.
pub fn app(state: AppState) -> Router {
    let metrics = ApiMetrics::new();

    let api = Router::new()
        .merge(routes::session::router())
        .merge(routes::contacts::router())
        .merge(routes::companies::router())
        .merge(routes::deals::router())
        .merge(routes::tasks::router())
        .merge(routes::activities::router())
        .merge(routes::avatar::router())
        .merge(routes::users::router())
        .merge(routes::backoffice::router())
        .merge(routes::portal::router())
        .merge(openapi::router())
        .route("/metrics", get(middleware::metrics::metrics_handler))
        .layer(from_fn_with_state(state.clone(), gate::area_gate))
        .layer(from_fn_with_state(state.clone(), auth::session_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(metrics))
        .with_state(state.clone());

    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .with_state(state);

    Router::new().merge(health).merge(api)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 when the table backend answers, 503 otherwise.
async fn readiness(State(state): State<AppState>) -> Response {
    match state.tables.ping().await {
        Ok(()) => "ready".into_response(),
        Err(e) => {
            tracing::warn!(backend = state.tables.name(), error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "table backend unreachable").into_response()
        }
    }
}
