//! Avatar upload checks and data-URL encoding.
//!
//! Avatars are stored inline on the profile as `data:<mime>;base64,<...>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Largest accepted avatar, in bytes (2 MiB).
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvatarError {
    #[error("No file provided")]
    Missing,
    #[error("Invalid file type. Please upload an image.")]
    NotAnImage,
    #[error("File too large. Maximum size is 2MB.")]
    TooLarge,
}

/// Check an upload's declared content type and size. Runs before anything
/// is written.
pub fn validate_avatar(content_type: Option<&str>, len: usize) -> Result<(), AvatarError> {
    let is_image = content_type
        .map(|ct| ct.trim().to_ascii_lowercase())
        .is_some_and(|ct| ct.starts_with("image/"));
    if !is_image {
        return Err(AvatarError::NotAnImage);
    }
    if len > MAX_AVATAR_BYTES {
        return Err(AvatarError::TooLarge);
    }
    Ok(())
}

/// Encode `bytes` as a `data:` URL with the given MIME type.
pub fn to_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type.trim(), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_small_image() {
        assert_eq!(validate_avatar(Some("image/png"), 1024), Ok(()));
        assert_eq!(validate_avatar(Some("image/jpeg"), MAX_AVATAR_BYTES), Ok(()));
    }

    #[test]
    fn rejects_non_image() {
        assert_eq!(
            validate_avatar(Some("application/pdf"), 10),
            Err(AvatarError::NotAnImage)
        );
        assert_eq!(validate_avatar(None, 10), Err(AvatarError::NotAnImage));
    }

    #[test]
    fn rejects_three_megabytes() {
        assert_eq!(
            validate_avatar(Some("image/png"), 3 * 1024 * 1024),
            Err(AvatarError::TooLarge)
        );
        assert_eq!(
            AvatarError::TooLarge.to_string(),
            "File too large. Maximum size is 2MB."
        );
    }

    #[test]
    fn data_url_shape() {
        assert_eq!(to_data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
    }
}
