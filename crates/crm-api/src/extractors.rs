//! # Request Body Extraction
//!
//! Handlers take bodies as `Result<Json<T>, JsonRejection>` so that
//! malformed JSON maps to [`AppError::BadRequest`] instead of axum's plain
//! text rejection.
//!
//! Query strings get the same treatment through [`extract_query`].
//!
//! Entity create/update handlers take the body as a raw JSON value and hand
//! it to the domain forms ([`crm_core::parse_form`], [`crm_core::merge_patch`]),
//! which own field defaults and validation.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::Json;
use serde_json::Value;

use crate::error::AppError;

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
///     // use req...
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body that must be an object.
pub fn extract_object(result: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    let value = extract_json(result)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(AppError::BadRequest("request body must be a JSON object".into()))
    }
}

/// Extract query-string parameters, mapping parse errors (unknown
/// enumeration values, malformed ids) to [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequestParts;
    use axum::http::Request;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Params {
        limit: Option<usize>,
    }

    async fn query_of(uri: &str) -> Result<Params, AppError> {
        let (mut parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        extract_query(Query::<Params>::from_request_parts(&mut parts, &()).await)
    }

    #[tokio::test]
    async fn query_parses() {
        assert_eq!(query_of("/x?limit=5").await.unwrap().limit, Some(5));
    }

    #[tokio::test]
    async fn bad_query_is_bad_request() {
        let err = query_of("/x?limit=many").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn non_object_body_rejected() {
        let err = extract_object(Ok(Json(serde_json::json!([1, 2])))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
