//! Backend client error types.

use serde::Deserialize;

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    /// The backend returned a non-2xx status.
    #[error("backend {endpoint} returned {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        /// Backend error code, e.g. a Postgres SQLSTATE like `42703`.
        code: Option<String>,
        message: String,
    },
    /// Response deserialization failed.
    #[error("failed to deserialize response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        source: reqwest::Error,
    },
    /// A 2xx response that does not have the expected shape.
    #[error("unexpected response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
    /// Admin endpoint called without a service role key.
    #[error("{endpoint} requires BACKEND_SERVICE_ROLE_KEY")]
    MissingServiceKey { endpoint: String },
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),
}

impl BackendError {
    /// HTTP status of an [`Api`](Self::Api) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The backend message of an [`Api`](Self::Api) error.
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Self::Api { message, .. } => Some(message),
            _ => None,
        }
    }

    /// A query referenced a column that does not exist (SQLSTATE `42703`).
    pub fn is_missing_column(&self) -> bool {
        if self.code() == Some("42703") {
            return true;
        }
        self.api_message().is_some_and(|m| {
            let m = m.to_ascii_lowercase();
            m.contains("column") && m.contains("does not exist")
        })
    }

    /// Row-level security policy recursed (SQLSTATE `42P17`).
    pub fn is_policy_recursion(&self) -> bool {
        self.code() == Some("42P17")
            || self
                .api_message()
                .is_some_and(|m| m.to_ascii_lowercase().contains("infinite recursion"))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The backend rejected the request as the caller's fault (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// Convert an unsuccessful response into an [`Api`](Self::Api) error,
    /// pulling code and message out of the body when it is JSON.
    pub(crate) async fn from_response(endpoint: &str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        Self::Api {
            endpoint: endpoint.to_string(),
            status,
            code,
            message,
        }
    }
}

/// Error bodies differ between the table and auth services:
///
/// ```text
/// {"code":"42703","message":"column profiles.user_type does not exist",...}
/// {"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}
/// {"error":"invalid_grant","error_description":"Invalid login credentials"}
/// ```
#[derive(Debug, Default, Deserialize)]
struct RawErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_error_body(body: &str) -> (Option<String>, String) {
    let Ok(raw) = serde_json::from_str::<RawErrorBody>(body) else {
        return (None, body.trim().to_string());
    };
    let code = raw.error_code.or_else(|| match raw.code {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    });
    let message = raw
        .message
        .or(raw.msg)
        .or(raw.error_description)
        .or(raw.error.clone())
        .unwrap_or_else(|| body.trim().to_string());
    (code.or(raw.error), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: Option<&str>, message: &str) -> BackendError {
        BackendError::Api {
            endpoint: "GET /rest/v1/profiles".into(),
            status,
            code: code.map(String::from),
            message: message.into(),
        }
    }

    #[test]
    fn parses_table_error_body() {
        let (code, message) = parse_error_body(
            r#"{"code":"42703","details":null,"hint":null,"message":"column profiles.user_type does not exist"}"#,
        );
        assert_eq!(code.as_deref(), Some("42703"));
        assert_eq!(message, "column profiles.user_type does not exist");
    }

    #[test]
    fn parses_auth_error_bodies() {
        let (code, message) = parse_error_body(
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(code.as_deref(), Some("invalid_credentials"));
        assert_eq!(message, "Invalid login credentials");

        let (code, message) = parse_error_body(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(code.as_deref(), Some("invalid_grant"));
        assert_eq!(message, "Invalid login credentials");
    }

    #[test]
    fn non_json_body_becomes_message() {
        let (code, message) = parse_error_body("  upstream timeout \n");
        assert!(code.is_none());
        assert_eq!(message, "upstream timeout");
    }

    #[test]
    fn classifies_missing_column() {
        assert!(api(400, Some("42703"), "whatever").is_missing_column());
        assert!(api(400, None, "column \"user_type\" does not exist").is_missing_column());
        assert!(!api(400, Some("23505"), "duplicate key").is_missing_column());
    }

    #[test]
    fn classifies_policy_recursion() {
        assert!(api(500, Some("42P17"), "x").is_policy_recursion());
        assert!(api(500, None, "infinite recursion detected in policy").is_policy_recursion());
    }

    #[test]
    fn client_error_range() {
        assert!(api(409, None, "conflict").is_client_error());
        assert!(!api(503, None, "down").is_client_error());
        assert!(api(404, None, "missing").is_not_found());
    }
}
