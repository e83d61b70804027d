//! # crm-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the CRM.
//! Binds to configurable port (default 8080).
//!
//! Table backend, in order of preference: `DATABASE_URL` (direct
//! Postgres), `BACKEND_URL` (hosted REST, which requires
//! `BACKEND_SERVICE_ROLE_KEY`), in-memory. Auth uses the hosted backend
//! when configured, in-memory otherwise.

use std::sync::Arc;

use crm_api::state::{AppConfig, AppState};
use crm_api::store::{AuthBackend, HostedBackend, MemoryAuth, MemoryTables, PgTables, TableBackend};
use crm_backend_client::{BackendClient, BackendConfig};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Seed an admin account into in-memory auth from
/// `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_PASSWORD`.
async fn bootstrap_admin(auth: &MemoryAuth) {
    let (Ok(email), Ok(password)) = (
        std::env::var("BOOTSTRAP_ADMIN_EMAIL"),
        std::env::var("BOOTSTRAP_ADMIN_PASSWORD"),
    ) else {
        return;
    };
    let metadata = json!({
        "full_name": "Administrator",
        "user_type": "staff",
        "role": "admin",
    });
    match auth.seed_user(&email, &password, metadata).await {
        Ok(session) => tracing::info!(user_id = %session.user.id, "bootstrap admin created"),
        Err(e) => tracing::warn!("Bootstrap admin not created: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AppConfig::from_env();
    let port = config.port;

    // Direct database mode (optional).
    let db_pool = crm_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    // Hosted backend (optional).
    let hosted = match BackendConfig::from_env() {
        Ok(backend_config) => {
            tracing::info!("Hosted backend configured");
            match BackendClient::new(backend_config) {
                Ok(client) => Some(HostedBackend::new(client)),
                Err(e) => {
                    tracing::error!("Failed to create backend client: {e}");
                    return Err(e.into());
                }
            }
        }
        Err(e) => {
            tracing::warn!("Hosted backend not configured: {e}. Falling back to local storage.");
            None
        }
    };

    let tables: Arc<dyn TableBackend> = match (db_pool, &hosted) {
        (Some(pool), _) => Arc::new(PgTables::new(pool)),
        (None, Some(hosted)) => {
            hosted.check_tables().map_err(|e| {
                tracing::error!(
                    "Hosted tables need BACKEND_SERVICE_ROLE_KEY (or set DATABASE_URL): {e}"
                );
                e
            })?;
            Arc::new(hosted.clone())
        }
        (None, None) => {
            tracing::warn!("No DATABASE_URL or BACKEND_URL: using in-memory tables, data is lost on restart");
            Arc::new(MemoryTables::new())
        }
    };

    let auth: Arc<dyn AuthBackend> = match hosted {
        Some(hosted) => Arc::new(hosted),
        None => {
            tracing::warn!("Using in-memory auth: sessions are lost on restart");
            let auth = MemoryAuth::new(tables.clone());
            bootstrap_admin(&auth).await;
            Arc::new(auth)
        }
    };

    tracing::info!(
        tables = tables.name(),
        separation = config.separation_enabled,
        "backends selected"
    );
    let state = AppState::with_backends(config, tables, auth);
    let app = crm_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("CRM API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
