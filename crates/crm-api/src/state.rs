//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! AppState holds the two storage seams and the service configuration:
//! - **tables**: row storage for profiles, companies, contacts, deals,
//!   tasks, and activities ([`TableBackend`]).
//! - **auth**: accounts and sessions ([`AuthBackend`]).
//!
//! Both are trait objects so the same router runs over the hosted backend,
//! a direct Postgres pool, or the in-memory stores used in development and
//! tests.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{AuthBackend, MemoryBackend, TableBackend};

/// Default origin used in email redirect links.
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";

/// How long staff creation waits for the new user's profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePoll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ProfilePoll {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(500),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Redirect staff out of the portal (`ENABLE_USER_TYPE_SEPARATION=true`).
    pub separation_enabled: bool,
    /// Public origin of the application, for links in auth emails.
    pub site_url: String,
    pub profile_poll: ProfilePoll,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            separation_enabled: false,
            site_url: DEFAULT_SITE_URL.to_string(),
            profile_poll: ProfilePoll::default(),
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to
    /// [`AppConfig::default`] for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let separation_enabled = var("ENABLE_USER_TYPE_SEPARATION").as_deref() == Some("true");
        let site_url = var("SITE_URL")
            .or_else(|| var("DEV_REDIRECT_URL"))
            .filter(|u| !u.trim().is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.site_url);
        Self {
            port,
            separation_enabled,
            site_url,
            profile_poll: defaults.profile_poll,
        }
    }

    /// Link sent in confirmation emails for new staff accounts.
    pub fn login_redirect(&self) -> String {
        format!("{}/auth/login", self.site_url)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub tables: Arc<dyn TableBackend>,
    pub auth: Arc<dyn AuthBackend>,
    pub config: AppConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tables", &self.tables.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_memory(AppConfig::default(), &MemoryBackend::new())
    }

    pub fn with_backends(
        config: AppConfig,
        tables: Arc<dyn TableBackend>,
        auth: Arc<dyn AuthBackend>,
    ) -> Self {
        Self {
            tables,
            auth,
            config,
        }
    }

    /// State over an existing in-memory backend. The caller keeps its own
    /// handle to seed users and inspect rows.
    pub fn with_memory(config: AppConfig, backend: &MemoryBackend) -> Self {
        Self::with_backends(
            config,
            Arc::new(backend.tables.clone()),
            Arc::new(backend.auth.clone()),
        )
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.port, 8080);
        assert!(!config.separation_enabled);
        assert_eq!(config.site_url, DEFAULT_SITE_URL);
        assert_eq!(config.profile_poll.attempts, 10);
    }

    #[test]
    fn separation_needs_exact_true() {
        let on = AppConfig::from_lookup(lookup(&[("ENABLE_USER_TYPE_SEPARATION", "true")]));
        let off = AppConfig::from_lookup(lookup(&[("ENABLE_USER_TYPE_SEPARATION", "1")]));
        assert!(on.separation_enabled);
        assert!(!off.separation_enabled);
    }

    #[test]
    fn site_url_falls_back_to_dev_redirect() {
        let config = AppConfig::from_lookup(lookup(&[("DEV_REDIRECT_URL", "http://dev.local:4000/")]));
        assert_eq!(config.login_redirect(), "http://dev.local:4000/auth/login");

        let config = AppConfig::from_lookup(lookup(&[
            ("SITE_URL", "https://crm.example.com"),
            ("DEV_REDIRECT_URL", "http://dev.local:4000"),
        ]));
        assert_eq!(config.site_url, "https://crm.example.com");
    }

    #[test]
    fn bad_port_uses_default() {
        let config = AppConfig::from_lookup(lookup(&[("PORT", "http")]));
        assert_eq!(config.port, 8080);
    }
}
