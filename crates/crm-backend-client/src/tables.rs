//! Typed client for the table REST endpoints.
//!
//! Base path: `/rest/v1`
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET    | `/rest/v1/{table}?select=..&filters` | Select rows |
//! | POST   | `/rest/v1/{table}` | Insert a row, returning it |
//! | PATCH  | `/rest/v1/{table}?filters` | Update matching rows, returning them |
//! | DELETE | `/rest/v1/{table}?filters` | Delete matching rows, returning them |
//! | HEAD   | `/rest/v1/{table}?filters` | Exact count via `Content-Range` |
//!
//! Requests authenticate with the service role key; row access is decided
//! by the API layer. The anonymous key is never used for table calls.

use reqwest::header::{HeaderValue, CONTENT_RANGE};
use reqwest::Method;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::BackendError;
use crate::query::Query;
use crate::retry::{send, Replay};

const REST_PREFIX: &str = "rest/v1";

const PREFER: &str = "Prefer";
const RETURN_REPRESENTATION: &str = "return=representation";
const COUNT_EXACT: &str = "count=exact";

/// Client for the table REST endpoints.
#[derive(Clone)]
pub struct TableClient {
    http: reqwest::Client,
    base_url: String,
    key: Zeroizing<String>,
}

impl std::fmt::Debug for TableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableClient")
            .field("base_url", &self.base_url)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TableClient {
    pub(crate) fn new(http: reqwest::Client, base_url: String, key: Zeroizing<String>) -> Self {
        Self {
            http,
            base_url,
            key,
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{REST_PREFIX}/{table}", self.base_url)
    }

    fn request(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(table))
            .bearer_auth(self.key.as_str())
    }

    /// Send `method` to `table`, returning the response when it is a 2xx.
    async fn call(
        &self,
        method: Method,
        table: &str,
        query: &Query,
        params: &[(String, String)],
        prefer: Option<&'static str>,
        body: Option<&Value>,
    ) -> Result<(String, reqwest::Response), BackendError> {
        let endpoint = format!("{method} /{REST_PREFIX}/{table}");
        let replay = Replay::for_table(&method, query);

        let resp = send(&endpoint, replay, || {
            let mut req = self.request(method.clone(), table).query(params);
            if let Some(prefer) = prefer {
                req = req.header(PREFER, HeaderValue::from_static(prefer));
            }
            match body {
                Some(body) => req.json(body).send(),
                None => req.send(),
            }
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BackendError::from_response(&endpoint, resp).await);
        }
        Ok((endpoint, resp))
    }

    async fn rows(
        &self,
        method: Method,
        table: &str,
        query: &Query,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Vec<Value>, BackendError> {
        let prefer = (method != Method::GET).then_some(RETURN_REPRESENTATION);
        let (endpoint, resp) = self
            .call(method, table, query, params, prefer, body)
            .await?;
        resp.json().await.map_err(|e| BackendError::Deserialization {
            endpoint,
            source: e,
        })
    }

    /// Select rows matching `query`.
    ///
    /// Calls `GET {base_url}/rest/v1/{table}`.
    pub async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.rows(Method::GET, table, query, &query.to_pairs(), None)
            .await
    }

    /// Insert one row and return it as stored. Sent once, never replayed.
    ///
    /// Calls `POST {base_url}/rest/v1/{table}`.
    pub async fn insert(&self, table: &str, row: &Value) -> Result<Value, BackendError> {
        let mut rows = self
            .rows(Method::POST, table, &Query::new(), &[], Some(row))
            .await?;
        if rows.is_empty() {
            return Err(BackendError::InvalidResponse {
                endpoint: format!("POST /{REST_PREFIX}/{table}"),
                reason: "insert returned no representation".into(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    /// Apply `patch` to every row matching `query`; returns the updated
    /// rows. Sent once, never replayed.
    ///
    /// Calls `PATCH {base_url}/rest/v1/{table}`.
    pub async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: &Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.rows(Method::PATCH, table, query, &query.filter_pairs(), Some(patch))
            .await
    }

    /// Delete every row matching `query`; returns the deleted rows.
    /// Replayed on transport failure only when `query` names a single id.
    ///
    /// Calls `DELETE {base_url}/rest/v1/{table}`.
    pub async fn delete(&self, table: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.rows(Method::DELETE, table, query, &query.filter_pairs(), None)
            .await
    }

    /// Exact number of rows matching `query`.
    ///
    /// Calls `HEAD {base_url}/rest/v1/{table}` and reads the total from
    /// `Content-Range: 0-24/312` (or `*/0` when empty).
    pub async fn count(&self, table: &str, query: &Query) -> Result<u64, BackendError> {
        let mut params = query.filter_pairs();
        params.push(("select".into(), "id".into()));
        let (endpoint, resp) = self
            .call(Method::HEAD, table, query, &params, Some(COUNT_EXACT), None)
            .await?;

        let range = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        parse_content_range_total(range).ok_or_else(|| BackendError::InvalidResponse {
            endpoint,
            reason: format!("missing or malformed Content-Range: {range:?}"),
        })
    }
}

/// Total from a `Content-Range` value such as `0-24/312` or `*/0`.
fn parse_content_range_total(raw: &str) -> Option<u64> {
    raw.rsplit_once('/')?.1.trim().parse().ok()
}
