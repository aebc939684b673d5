//! Upload validation.
//!
//! Everything here runs before any storage I/O: a rejected upload never
//! touches the connection pool.

use flowshelf_common::{mime, Error, Result};

use crate::config::ImagesConfig;

/// Size and type limits applied to every upload.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

impl UploadLimits {
    /// Build limits from the `[images]` config section.
    pub fn from_config(config: &ImagesConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            allowed_mime_types: config
                .allowed_mime_types
                .iter()
                .map(|m| mime::normalize(m))
                .collect(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from_config(&ImagesConfig::default())
    }
}

/// Check an upload against the limits.
///
/// Returns the normalized mime type to store on success.
///
/// # Errors
///
/// * `Error::Validation` - empty buffer, payload over the size limit, or a
///   declared mime type outside the allow-list
pub fn validate_upload(bytes: &[u8], declared_mime: &str, limits: &UploadLimits) -> Result<String> {
    if bytes.is_empty() {
        return Err(Error::validation("Upload is empty"));
    }

    if bytes.len() as u64 > limits.max_upload_bytes {
        return Err(Error::validation(format!(
            "Upload is {} bytes, limit is {} bytes",
            bytes.len(),
            limits.max_upload_bytes
        )));
    }

    let normalized = mime::normalize(declared_mime);
    if !limits.allowed_mime_types.iter().any(|m| *m == normalized) {
        return Err(Error::validation(format!(
            "Mime type {:?} is not allowed",
            declared_mime
        )));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn limits() -> UploadLimits {
        UploadLimits {
            max_upload_bytes: 10,
            allowed_mime_types: vec!["image/png".to_string(), "image/svg+xml".to_string()],
        }
    }

    #[test]
    fn test_accepts_allowed_upload() {
        let mime = validate_upload(b"12345", "image/png", &limits()).unwrap();
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_normalizes_declared_mime() {
        let mime = validate_upload(b"<svg/>", "Image/SVG+XML; charset=utf-8", &limits()).unwrap();
        assert_eq!(mime, "image/svg+xml");
    }

    #[test]
    fn test_rejects_empty() {
        assert_matches!(
            validate_upload(b"", "image/png", &limits()),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_rejects_oversized() {
        assert_matches!(
            validate_upload(&[0u8; 11], "image/png", &limits()),
            Err(Error::Validation(msg)) if msg.contains("limit")
        );
    }

    #[test]
    fn test_accepts_exact_limit() {
        assert!(validate_upload(&[0u8; 10], "image/png", &limits()).is_ok());
    }

    #[test]
    fn test_rejects_disallowed_mime() {
        assert_matches!(
            validate_upload(b"%PDF", "application/pdf", &limits()),
            Err(Error::Validation(msg)) if msg.contains("not allowed")
        );
    }

    #[test]
    fn test_limits_from_config_normalize() {
        let config = ImagesConfig {
            allowed_mime_types: vec!["IMAGE/JPEG".to_string()],
            ..ImagesConfig::default()
        };
        let limits = UploadLimits::from_config(&config);
        assert_eq!(limits.allowed_mime_types, vec!["image/jpeg"]);
    }
}
