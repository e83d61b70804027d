//! Backend client configuration.
//!
//! One base URL serves both the table REST endpoints (`/rest/v1`) and the
//! auth service (`/auth/v1`). The anonymous key is required. The service
//! role key is needed for table calls and for admin operations such as
//! deleting users; without it the client serves auth only.

use url::Url;
use zeroize::Zeroizing;

/// Configuration for connecting to the hosted backend.
///
/// Custom `Debug` implementation redacts both keys to prevent credential
/// leakage in log output.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.example.co`.
    pub url: Url,
    /// Public anonymous key, sent as `apikey` on every request.
    pub anon_key: Zeroizing<String>,
    /// Privileged key for table calls and admin endpoints. Optional.
    pub service_role_key: Option<Zeroizing<String>>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `BACKEND_URL` (required)
    /// - `BACKEND_ANON_KEY` (required)
    /// - `BACKEND_SERVICE_ROLE_KEY` (optional)
    /// - `BACKEND_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = std::env::var("BACKEND_URL").map_err(|_| ConfigError::MissingUrl)?;
        let url = parse_url("BACKEND_URL", &raw_url)?;
        let anon_key = std::env::var("BACKEND_ANON_KEY").map_err(|_| ConfigError::MissingKey)?;

        Ok(Self {
            url,
            anon_key: Zeroizing::new(anon_key),
            service_role_key: std::env::var("BACKEND_SERVICE_ROLE_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .map(Zeroizing::new),
            timeout_secs: std::env::var("BACKEND_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        })
    }

    /// Configuration pointing at a local mock server (for testing).
    pub fn local_mock(base_url: &str, anon_key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            url: parse_url("base_url", base_url)?,
            anon_key: Zeroizing::new(anon_key.to_string()),
            service_role_key: None,
            timeout_secs: 5,
        })
    }

    /// Builder-style setter for the service role key.
    pub fn with_service_role_key(mut self, key: &str) -> Self {
        self.service_role_key = Some(Zeroizing::new(key.to_string()));
        self
    }
}

fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BACKEND_URL environment variable is required")]
    MissingUrl,
    #[error("BACKEND_ANON_KEY environment variable is required")]
    MissingKey,
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("key contains characters not allowed in an HTTP header")]
    InvalidKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mock_builds_valid_config() {
        let cfg = BackendConfig::local_mock("http://127.0.0.1:9000", "anon").unwrap();
        assert_eq!(cfg.anon_key.as_str(), "anon");
        assert_eq!(cfg.timeout_secs, 5);
        assert!(cfg.service_role_key.is_none());
        assert_eq!(cfg.url.as_str(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn debug_redacts_keys() {
        let cfg = BackendConfig::local_mock("http://127.0.0.1:9000", "super-secret-anon")
            .unwrap()
            .with_service_role_key("super-secret-service");
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            BackendConfig::local_mock("not a url", "anon"),
            Err(ConfigError::InvalidUrl(..))
        ));
    }
}
