//! Transport-failure handling for backend calls.
//!
//! A call is replayed only when a second delivery leaves the backend as
//! one delivery would: row selects, exact counts, token lookups, and
//! deletes that name a single id. Inserts, updates, sign-in, sign-up, and
//! logout go out once. A timeout on one of those is reported as
//! [`BackendError::Http`]; the backend may still have applied it.
//!
//! Responses of any status are returned as-is. Only transport errors
//! (connect failures, timeouts) are considered for replay.

use std::future::Future;
use std::time::Duration;

use reqwest::Method;

use crate::error::BackendError;
use crate::query::Query;

/// Pause before each replay of a [`Replay::Backoff`] call.
const BACKOFF_MS: [u64; 3] = [200, 400, 800];

/// Whether a call may be sent again after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Replay {
    /// Replay after each pause in [`BACKOFF_MS`].
    Backoff,
    /// Send exactly once.
    Never,
}

impl Replay {
    /// Policy for a table REST call.
    pub(crate) fn for_table(method: &Method, query: &Query) -> Self {
        match *method {
            Method::GET | Method::HEAD => Self::Backoff,
            Method::DELETE if query.targets_single_id() => Self::Backoff,
            _ => Self::Never,
        }
    }

    fn pauses(self) -> &'static [u64] {
        match self {
            Self::Backoff => &BACKOFF_MS,
            Self::Never => &[],
        }
    }
}

/// Send the request built by `build`, replaying transport failures as
/// `replay` allows.
///
/// `build` creates a fresh request on each call.
pub(crate) async fn send<F, Fut>(
    endpoint: &str,
    replay: Replay,
    build: F,
) -> Result<reqwest::Response, BackendError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut pauses = replay.pauses().iter();
    loop {
        let source = match build().await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };
        let Some(&ms) = pauses.next() else {
            if replay == Replay::Never {
                tracing::warn!(endpoint, error = %source, "backend call failed, not replayed");
            }
            return Err(BackendError::Http {
                endpoint: endpoint.to_string(),
                source,
            });
        };
        tracing::warn!(endpoint, pause_ms = ms, error = %source, "backend transport failure, replaying");
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn calls_to_closed_port(replay: Replay) -> (usize, Result<reqwest::Response, BackendError>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let result = send("GET /rest/v1/contacts", replay, || {
            counter.fetch_add(1, Ordering::SeqCst);
            client.get("http://127.0.0.1:1/").send()
        })
        .await;
        (calls.load(Ordering::SeqCst), result)
    }

    #[tokio::test]
    async fn backoff_replays_every_pause() {
        let (calls, result) = calls_to_closed_port(Replay::Backoff).await;
        assert!(matches!(result, Err(BackendError::Http { .. })));
        assert_eq!(calls, BACKOFF_MS.len() + 1);
    }

    #[tokio::test]
    async fn never_sends_once() {
        let (calls, result) = calls_to_closed_port(Replay::Never).await;
        assert!(matches!(result, Err(BackendError::Http { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn table_policy_by_method() {
        let id = uuid::Uuid::new_v4();
        let by_status = Query::new().eq("status", "lead");

        assert_eq!(Replay::for_table(&Method::GET, &by_status), Replay::Backoff);
        assert_eq!(Replay::for_table(&Method::HEAD, &by_status), Replay::Backoff);
        assert_eq!(Replay::for_table(&Method::DELETE, &Query::by_id(id)), Replay::Backoff);
        assert_eq!(Replay::for_table(&Method::DELETE, &by_status), Replay::Never);
        assert_eq!(Replay::for_table(&Method::POST, &Query::new()), Replay::Never);
        assert_eq!(Replay::for_table(&Method::PATCH, &Query::by_id(id)), Replay::Never);
    }
}
