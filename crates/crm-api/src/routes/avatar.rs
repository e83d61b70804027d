//! # Avatar Upload
//!
//! `POST /api/upload-avatar` takes a multipart form with a `file` field,
//! checks it is an image of at most 2 MiB, and stores it inline on the
//! caller's profile as a `data:` URL. Nothing is written until both checks
//! pass; the size check runs while the upload streams in.

use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use crm_core::avatar::{to_data_url, validate_avatar, AvatarError, MAX_AVATAR_BYTES};
use crm_core::Profile;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::SessionUser;
use crate::error::AppError;
use crate::state::AppState;

/// Request bodies may exceed the avatar limit so oversized files reach the
/// size check instead of failing as a truncated body.
const UPLOAD_BODY_LIMIT: usize = MAX_AVATAR_BYTES * 5;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvatarResponse {
    /// The stored `data:` URL.
    pub avatar_url: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/upload-avatar",
        post(upload_avatar).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
    )
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::BadRequest(err.body_text())
}

/// Read the `file` field. `None` when the form has no such field.
async fn read_file(multipart: &mut Multipart) -> Result<Option<(String, Vec<u8>)>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        validate_avatar(content_type.as_deref(), 0)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            bytes.extend_from_slice(&chunk);
            validate_avatar(content_type.as_deref(), bytes.len())?;
        }
        return Ok(Some((content_type.unwrap_or_default(), bytes)));
    }
    Ok(None)
}

/// POST /api/upload-avatar: Replace the caller's avatar.
#[utoipa::path(
    post,
    path = "/api/upload-avatar",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Form with a `file` image field"),
    responses(
        (status = 200, description = "Avatar stored", body = AvatarResponse),
        (status = 400, description = "No file, not an image, or larger than 2MB", body = crate::error::ErrorBody),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
    ),
    tag = "profile"
)]
async fn upload_avatar(
    State(state): State<AppState>,
    user: SessionUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AvatarResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (content_type, bytes) = read_file(&mut multipart)
        .await?
        .ok_or(AvatarError::Missing)?;

    let avatar_url = to_data_url(&content_type, &bytes);
    state
        .repo()
        .update::<Profile>(user.id(), json!({ "avatar_url": avatar_url }))
        .await?
        .ok_or_else(|| AppError::NotFound("Profile not found".into()))?;

    tracing::info!(user_id = %user.id(), bytes = bytes.len(), "avatar updated");
    Ok(Json(AvatarResponse { avatar_url }))
}
